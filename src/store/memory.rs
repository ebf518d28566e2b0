//! In-memory configuration channel for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::{ChangeEvent, ChangeKind, ChannelEvent, ConfigChannel, StoreError};

/// A [`ConfigChannel`] backed by a process-local map and a broadcast
/// channel. Mutations through [`put`](Self::put), [`delete`](Self::delete)
/// and [`expire`](Self::expire) are visible to snapshots and fan out to all
/// live subscriptions, mirroring the external store's behavior closely
/// enough to exercise the full sync cycle. [`set_offline`](Self::set_offline)
/// simulates a store outage end to end.
#[derive(Debug)]
pub struct MemoryConfigChannel {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    events: Mutex<broadcast::Sender<ChannelEvent>>,
    offline: AtomicBool,
}

impl MemoryConfigChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(HashMap::new()),
            events: Mutex::new(events),
            offline: AtomicBool::new(false),
        }
    }

    /// Set a key, delivering the payload inline with the change event.
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.clone());
        self.emit(key, ChangeKind::Set, Some(value));
    }

    pub fn delete(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.emit(key, ChangeKind::Delete, None);
    }

    /// Remove a key as if its TTL elapsed.
    pub fn expire(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        self.emit(key, ChangeKind::Expire, None);
    }

    /// Simulate a connection drop and re-establishment.
    pub fn emit_resync(&self) {
        let _ = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(ChannelEvent::Resync);
    }

    /// Take the store offline: every live subscription stream ends and
    /// snapshot, subscribe and fetch fail until it is brought back. The
    /// stored entries survive the outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if offline {
            // dropping the sender terminates all live subscription streams
            let (fresh, _) = broadcast::channel(256);
            *self.events.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
        }
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store offline".to_string()));
        }
        Ok(())
    }

    fn emit(&self, key: &str, kind: ChangeKind, value: Option<Vec<u8>>) {
        // send fails only when no subscription is live, which is fine
        let _ = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(ChannelEvent::Change(ChangeEvent {
                key: key.to_string(),
                kind,
                value,
            }));
    }
}

impl Default for MemoryConfigChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigChannel for MemoryConfigChannel {
    async fn snapshot(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        self.check_online()?;
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn subscribe(&self, prefix: &str) -> Result<BoxStream<'static, ChannelEvent>, StoreError> {
        self.check_online()?;
        let prefix = prefix.to_string();
        let receiver = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            futures_util::future::ready(match item {
                Ok(ChannelEvent::Change(change)) if change.key.starts_with(&prefix) => {
                    Some(ChannelEvent::Change(change))
                }
                Ok(ChannelEvent::Change(_)) => None,
                Ok(ChannelEvent::Resync) => Some(ChannelEvent::Resync),
                // a lagged receiver has missed events, same contract as a
                // dropped connection
                Err(BroadcastStreamRecvError::Lagged(_)) => Some(ChannelEvent::Resync),
            })
        });
        Ok(stream.boxed())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_online()?;
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }
}
