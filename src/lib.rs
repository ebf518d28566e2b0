//! Multi-tenant AI inference gateway: hot-reloadable model routing core.
//!
//! The control plane ([`sync`]) keeps two read-mostly tables current from
//! an external key-value store; the data plane ([`resolve`]) maps an
//! inbound request's API key and model alias to a provider routing policy
//! without ever blocking on the update path.

pub mod config;
pub mod dispatch;
pub mod logging;
pub mod resolve;
pub mod routes;
pub mod store;
pub mod sync;
pub mod tables;
pub mod test_util;

pub use config::Config;
pub use dispatch::{DispatchError, DispatchOutcome, HttpDispatcher, ProviderDispatcher};
pub use resolve::{RequestResolver, ResolveError, ResolvedRequest, ResolvedRoute};
pub use store::{ConfigChannel, MemoryConfigChannel, RedisConfigChannel};
pub use sync::{BackoffConfig, ReadyFlag, SyncService};
pub use tables::{
    AuthEntry, AuthTable, ModelEntry, ModelTable, ProviderConfig, RESERVED_PREFIX,
};

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub auth_table: Arc<AuthTable>,
    pub model_table: Arc<ModelTable>,
    pub resolver: RequestResolver,
    pub dispatcher: Arc<dyn ProviderDispatcher>,
    /// Readiness of the auth-key namespace sync.
    pub auth_ready: ReadyFlag,
    /// Readiness of the model-route namespace sync.
    pub model_ready: ReadyFlag,
}
