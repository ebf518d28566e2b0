//! Shared helpers for unit and integration tests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::{HttpDispatcher, ProviderDispatcher};
use crate::resolve::RequestResolver;
use crate::store::MemoryConfigChannel;
use crate::sync::{BackoffConfig, SyncService};
use crate::tables::{AuthEntry, AuthTable, ModelEntry, ModelTable};
use crate::AppState;

pub fn test_backoff() -> BackoffConfig {
    BackoffConfig {
        base_ms: 1,
        max_ms: 5,
        max_attempts: 3,
    }
}

/// Poll until the condition holds, panicking after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

/// Auth entry payload mapping aliases to routing ids.
pub fn auth_entry_json(aliases: &[(&str, &str)]) -> Vec<u8> {
    let map: serde_json::Map<String, serde_json::Value> = aliases
        .iter()
        .map(|(alias, id)| (alias.to_string(), serde_json::json!(id)))
        .collect();
    serde_json::to_vec(&map).expect("serializable map")
}

/// Model entry payload with a single provider, no credential.
pub fn single_provider_entry(provider: &str, model_name: &str, api_base: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "routing": [provider],
        "providers": {
            provider: {
                "type": "openai",
                "model_name": model_name,
                "api_base": api_base,
                "api_key_location": "none"
            }
        }
    }))
    .expect("serializable entry")
}

/// A gateway wired against an in-memory store with live sync tasks.
/// Dropping the harness aborts the tasks.
pub struct TestGateway {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryConfigChannel>,
    sync_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        for task in &self.sync_tasks {
            task.abort();
        }
    }
}

pub async fn create_test_gateway() -> TestGateway {
    create_test_gateway_with(Arc::new(HttpDispatcher::new(Duration::from_secs(5)))).await
}

/// Build a gateway with the given dispatcher, start both sync services and
/// wait until their first snapshots are installed.
pub async fn create_test_gateway_with(dispatcher: Arc<dyn ProviderDispatcher>) -> TestGateway {
    let store = Arc::new(MemoryConfigChannel::new());
    let config = Config::default();

    let auth_table = Arc::new(AuthTable::new());
    let model_table = Arc::new(ModelTable::new());

    let auth_sync = SyncService::<AuthEntry>::new(
        store.clone(),
        auth_table.clone(),
        config.namespaces.auth_prefix.clone(),
        test_backoff(),
    );
    let model_sync = SyncService::<ModelEntry>::new(
        store.clone(),
        model_table.clone(),
        config.namespaces.model_prefix.clone(),
        test_backoff(),
    );
    let auth_ready = auth_sync.ready_flag();
    let model_ready = model_sync.ready_flag();

    let sync_tasks = vec![
        tokio::spawn(auth_sync.run()),
        tokio::spawn(model_sync.run()),
    ];
    wait_until(|| auth_ready.is_ready() && model_ready.is_ready()).await;

    let resolver = RequestResolver::new(auth_table.clone(), model_table.clone());
    let state = Arc::new(AppState {
        config,
        auth_table,
        model_table,
        resolver,
        dispatcher,
        auth_ready,
        model_ready,
    });

    TestGateway {
        state,
        store,
        sync_tasks,
    }
}
