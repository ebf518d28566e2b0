use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inference_gateway::store::ConfigChannel;
use inference_gateway::{
    logging, routes, AppState, AuthEntry, AuthTable, Config, HttpDispatcher, ModelEntry,
    ModelTable, ProviderDispatcher, RedisConfigChannel, RequestResolver, SyncService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting inference gateway");

    // an unreachable store is survivable: sync keeps retrying and the
    // namespaces report not-ready; only a malformed address is fatal here
    let channel: Arc<dyn ConfigChannel> = Arc::new(
        RedisConfigChannel::connect(&config.store.url, config.store.backoff()).await?,
    );

    let auth_table = Arc::new(AuthTable::new());
    let model_table = Arc::new(ModelTable::new());

    let auth_sync = SyncService::<AuthEntry>::new(
        channel.clone(),
        auth_table.clone(),
        config.namespaces.auth_prefix.clone(),
        config.store.backoff(),
    );
    let model_sync = SyncService::<ModelEntry>::new(
        channel.clone(),
        model_table.clone(),
        config.namespaces.model_prefix.clone(),
        config.store.backoff(),
    );
    let auth_ready = auth_sync.ready_flag();
    let model_ready = model_sync.ready_flag();
    tokio::spawn(auth_sync.run());
    tokio::spawn(model_sync.run());

    let resolver = RequestResolver::new(auth_table.clone(), model_table.clone());
    let dispatcher: Arc<dyn ProviderDispatcher> = Arc::new(HttpDispatcher::new(
        Duration::from_secs(config.dispatch.timeout_secs),
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        auth_table,
        model_table,
        resolver,
        dispatcher,
        auth_ready,
        model_ready,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = axum::Router::new()
        .merge(routes::health::router(state.clone()))
        .merge(routes::chat::router(state.clone()))
        .layer(axum::middleware::from_fn(logging::request_logger))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
