use std::sync::Arc;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    auth_ready: bool,
    model_ready: bool,
}

/// Ready only once every namespace has a successfully installed snapshot.
/// "Not ready" is distinct from "ready but empty": an empty store still
/// counts as in sync.
async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let auth_ready = state.auth_ready.is_ready();
    let model_ready = state.model_ready.is_ready();

    let (status, label) = if auth_ready && model_ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    };
    (
        status,
        Json(ReadyResponse {
            status: label,
            auth_ready,
            model_ready,
        }),
    )
        .into_response()
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let body = format!(
        "# HELP gateway_up Whether the service is up\n\
         # TYPE gateway_up gauge\n\
         gateway_up 1\n\
         # HELP gateway_namespace_ready Whether a config namespace is in sync with the store\n\
         # TYPE gateway_namespace_ready gauge\n\
         gateway_namespace_ready{{namespace=\"auth\"}} {}\n\
         gateway_namespace_ready{{namespace=\"model\"}} {}\n\
         # HELP gateway_table_entries Entries currently loaded per namespace\n\
         # TYPE gateway_table_entries gauge\n\
         gateway_table_entries{{namespace=\"auth\"}} {}\n\
         gateway_table_entries{{namespace=\"model\"}} {}\n",
        state.auth_ready.is_ready() as u8,
        state.model_ready.is_ready() as u8,
        state.auth_table.len(),
        state.model_table.len(),
    );
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}
