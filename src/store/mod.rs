//! Abstraction over the external configuration store.
//!
//! A [`ConfigChannel`] is anything that can hand out a bulk snapshot of a
//! key namespace and a live stream of per-key change events. Payloads are
//! opaque bytes here; parsing them is the sync service's job, which keeps
//! this layer decoupled from the entry schema.

mod memory;
mod redis;

pub use memory::MemoryConfigChannel;
pub use redis::RedisConfigChannel;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// What happened to a single key in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Delete,
    Expire,
}

/// A change notification for one key.
///
/// `value` may be `None` for transports whose notifications carry no
/// payload; the consumer re-fetches via [`ConfigChannel::fetch`].
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub key: String,
    pub kind: ChangeKind,
    pub value: Option<Vec<u8>>,
}

/// Item yielded by a change subscription.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Change(ChangeEvent),
    /// The underlying connection dropped and was re-established. Events may
    /// have been missed in between; the consumer must take a fresh snapshot.
    Resync,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("configuration store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid store address: {0}")]
    InvalidAddress(String),
}

/// Snapshot + change-stream access to one configuration store.
///
/// Implementations own their connections; they are never shared across
/// sync tasks. The subscribe stream reconnects internally on transient
/// failures (yielding [`ChannelEvent::Resync`]) and terminates only when
/// the reconnect budget is exhausted, which the consumer must treat as a
/// fatal event for the subscription, not silently ignore.
#[async_trait]
pub trait ConfigChannel: Send + Sync {
    /// All current entries whose key starts with `prefix`.
    async fn snapshot(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Live stream of change events for keys starting with `prefix`.
    async fn subscribe(&self, prefix: &str) -> Result<BoxStream<'static, ChannelEvent>, StoreError>;

    /// Current value of a single key, for notifications without payloads.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}
