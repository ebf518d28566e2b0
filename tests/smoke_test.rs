use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::StatusCode;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inference_gateway::test_util::{
    auth_entry_json, create_test_gateway, single_provider_entry, wait_until, TestGateway,
};
use inference_gateway::{
    routes, AppState, AuthTable, Config, HttpDispatcher, ModelTable, ReadyFlag, RequestResolver,
};

async fn send_chat(
    app: &axum::Router,
    api_key: Option<&str>,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let mut builder = http::Request::builder()
        .method(http::Method::POST)
        .uri("/v1/chat/completions")
        .header("Content-Type", "application/json");
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {key}"));
    }
    let request = builder
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// Gateway with one tenant (`tk_1`, alias "gpt" -> route_a) and one route
/// (route_a -> provider p1 / model m1 at the mock upstream).
async fn seeded_gateway(upstream: &MockServer) -> TestGateway {
    let gateway = create_test_gateway().await;
    gateway
        .store
        .put("api_key:tk_1", auth_entry_json(&[("gpt", "route_a")]));
    gateway.store.put(
        "model_table:route_a",
        single_provider_entry("p1", "m1", &upstream.uri()),
    );

    let auth_table = gateway.state.auth_table.clone();
    let model_table = gateway.state.model_table.clone();
    wait_until(move || auth_table.get("tk_1").is_some() && model_table.get("route_a").is_some())
        .await;
    gateway
}

fn mock_completion(id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "id": id, "object": "chat.completion" }))
}

#[tokio::test]
async fn test_request_resolves_alias_and_reaches_primary_provider() {
    let upstream = MockServer::start().await;
    // the upstream must see its own model name, not the alias or the
    // internal reference
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": "m1"})))
        .respond_with(mock_completion("cmpl-1"))
        .expect(1)
        .mount(&upstream)
        .await;

    let gateway = seeded_gateway(&upstream).await;
    let app = routes::chat::router(gateway.state.clone());

    let (status, body) = send_chat(
        &app,
        Some("tk_1"),
        json!({"model": "gpt", "messages": [{"role": "user", "content": "hi"}]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "cmpl-1");
}

#[tokio::test]
async fn test_unknown_alias_is_rejected() {
    let upstream = MockServer::start().await;
    let gateway = seeded_gateway(&upstream).await;
    let app = routes::chat::router(gateway.state.clone());

    let (status, _) = send_chat(&app, Some("tk_1"), json!({"model": "unknown"})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deleted_route_fails_while_auth_entry_survives() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(mock_completion("cmpl-1"))
        .mount(&upstream)
        .await;

    let gateway = seeded_gateway(&upstream).await;
    let app = routes::chat::router(gateway.state.clone());

    let (status, _) = send_chat(&app, Some("tk_1"), json!({"model": "gpt"})).await;
    assert_eq!(status, StatusCode::OK);

    gateway.store.delete("model_table:route_a");
    let model_table = gateway.state.model_table.clone();
    wait_until(move || model_table.get("route_a").is_none()).await;

    // the auth entry still resolves the alias; only the route lookup fails
    assert!(gateway.state.auth_table.get("tk_1").is_some());
    let (status, _) = send_chat(&app, Some("tk_1"), json!({"model": "gpt"})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_route_update_keeps_serving_previous_entry() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(mock_completion("cmpl-1"))
        .mount(&upstream)
        .await;

    let gateway = seeded_gateway(&upstream).await;
    let app = routes::chat::router(gateway.state.clone());

    gateway.store.put("model_table:route_a", b"{{{ not json".to_vec());
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status, body) = send_chat(&app, Some("tk_1"), json!({"model": "gpt"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "cmpl-1");
}

#[tokio::test]
async fn test_resolution_failures_are_indistinguishable() {
    let upstream = MockServer::start().await;
    let gateway = seeded_gateway(&upstream).await;
    let app = routes::chat::router(gateway.state.clone());

    let missing_key = send_chat(&app, None, json!({"model": "gpt"})).await;
    let unknown_key = send_chat(&app, Some("tk_9"), json!({"model": "gpt"})).await;
    let unknown_alias = send_chat(&app, Some("tk_1"), json!({"model": "nope"})).await;
    let spoofed = send_chat(&app, Some("tk_1"), json!({"model": "route:route_a"})).await;

    for (status, body) in [&missing_key, &unknown_key, &unknown_alias, &spoofed] {
        assert_eq!(*status, StatusCode::UNAUTHORIZED);
        assert_eq!(*body, missing_key.1);
    }
}

#[tokio::test]
async fn test_readiness_tracks_sync_state() {
    // a gateway whose sync never ran is live but not ready
    let auth_table = Arc::new(AuthTable::new());
    let model_table = Arc::new(ModelTable::new());
    let state = Arc::new(AppState {
        config: Config::default(),
        auth_table: auth_table.clone(),
        model_table: model_table.clone(),
        resolver: RequestResolver::new(auth_table, model_table),
        dispatcher: Arc::new(HttpDispatcher::new(Duration::from_secs(1))),
        auth_ready: ReadyFlag::default(),
        model_ready: ReadyFlag::default(),
    });
    let app = routes::health::router(state);

    let live = http::Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.clone().oneshot(live).await.unwrap().status(),
        StatusCode::OK
    );

    let ready = http::Request::builder()
        .uri("/health/ready")
        .body(Body::empty())
        .unwrap();
    assert_eq!(
        app.clone().oneshot(ready).await.unwrap().status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    // once sync has installed snapshots, an empty store still counts ready
    let gateway = create_test_gateway().await;
    let app = routes::health::router(gateway.state.clone());
    let ready = http::Request::builder()
        .uri("/health/ready")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.oneshot(ready).await.unwrap().status(), StatusCode::OK);
}
