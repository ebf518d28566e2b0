//! Control-plane loop keeping the configuration tables current.
//!
//! One [`SyncService`] runs per managed namespace, as a long-lived task:
//! subscribe, install a full snapshot, then apply change events one key at
//! a time. Malformed updates are logged and dropped so a previously-good
//! entry is never erased by a bad one.

mod backoff;

pub use backoff::BackoffConfig;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use crate::store::{ChangeEvent, ChangeKind, ChannelEvent, ConfigChannel};
use crate::tables::{ConfigEntry, ConfigTable};

/// Per-namespace readiness signal.
///
/// False until the first snapshot is installed and whenever the service
/// has lost contact with the store; distinct from "ready but empty".
/// Requests keep being served from the last-good table either way.
#[derive(Debug, Clone, Default)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, ready: bool) {
        self.0.store(ready, Ordering::Release);
    }
}

/// Sync loop for one namespace of the configuration store.
///
/// The service is the single writer for its table; request handlers only
/// ever read. Aborting the task is safe at any point since no table lock
/// is held across an `await`.
pub struct SyncService<E: ConfigEntry> {
    channel: Arc<dyn ConfigChannel>,
    table: Arc<ConfigTable<E>>,
    prefix: String,
    ready: ReadyFlag,
    backoff: BackoffConfig,
}

impl<E: ConfigEntry> SyncService<E> {
    pub fn new(
        channel: Arc<dyn ConfigChannel>,
        table: Arc<ConfigTable<E>>,
        prefix: String,
        backoff: BackoffConfig,
    ) -> Self {
        Self {
            channel,
            table,
            prefix,
            ready: ReadyFlag::default(),
            backoff,
        }
    }

    /// Handle to this namespace's readiness signal.
    pub fn ready_flag(&self) -> ReadyFlag {
        self.ready.clone()
    }

    /// Run the sync cycle indefinitely.
    ///
    /// Subscribing before the snapshot closes the gap in which updates
    /// could be missed between the two; an event racing the snapshot is at
    /// worst re-applied against the fresher value.
    pub async fn run(self) {
        loop {
            let mut events = self.subscribe().await;
            self.install_snapshot().await;

            while let Some(event) = events.next().await {
                match event {
                    ChannelEvent::Change(change) => self.apply_event(change).await,
                    ChannelEvent::Resync => {
                        tracing::warn!(
                            namespace = E::NAMESPACE,
                            "change stream resynced; reloading snapshot"
                        );
                        self.ready.set(false);
                        self.install_snapshot().await;
                    }
                }
            }

            // the channel's reconnect budget ran out; start a fresh cycle
            self.ready.set(false);
            tracing::error!(
                namespace = E::NAMESPACE,
                "change stream terminated; restarting sync cycle"
            );
        }
    }

    /// Obtain a change subscription, retrying until the store cooperates.
    async fn subscribe(&self) -> BoxStream<'static, ChannelEvent> {
        let mut attempt: u32 = 0;
        loop {
            match self.channel.subscribe(&self.prefix).await {
                Ok(stream) => return stream,
                Err(e) => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt.min(self.backoff.max_attempts));
                    tracing::warn!(
                        namespace = E::NAMESPACE,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "store subscription failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fetch, parse and atomically install a full namespace snapshot,
    /// retrying until it succeeds. The namespace reports not-ready until
    /// the swap happens; consumers never observe a partially-built table.
    async fn install_snapshot(&self) {
        let mut attempt: u32 = 0;
        let raw_entries = loop {
            match self.channel.snapshot(&self.prefix).await {
                Ok(entries) => break entries,
                Err(e) => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt.min(self.backoff.max_attempts));
                    tracing::warn!(
                        namespace = E::NAMESPACE,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "snapshot failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let mut entries: HashMap<String, Arc<E>> = HashMap::with_capacity(raw_entries.len());
        for (key, raw) in raw_entries {
            let Some(id) = key.strip_prefix(&self.prefix) else {
                continue;
            };
            match E::parse(id, &raw) {
                Ok(entry) => {
                    entries.insert(id.to_string(), Arc::new(entry));
                }
                Err(e) => {
                    tracing::warn!(
                        namespace = E::NAMESPACE,
                        key = id,
                        error = %e,
                        "skipping malformed entry in snapshot"
                    );
                }
            }
        }

        let count = entries.len();
        self.table.replace_all(entries);
        self.ready.set(true);
        tracing::info!(namespace = E::NAMESPACE, entries = count, "snapshot installed");
    }

    /// Apply a single change event to the live table.
    async fn apply_event(&self, event: ChangeEvent) {
        let Some(id) = event.key.strip_prefix(&self.prefix) else {
            return;
        };
        match event.kind {
            ChangeKind::Set => {
                let raw = match event.value {
                    Some(raw) => Some(raw),
                    // notification without payload: re-fetch the key
                    None => match self.channel.fetch(&event.key).await {
                        Ok(raw) => raw,
                        Err(e) => {
                            tracing::warn!(
                                namespace = E::NAMESPACE,
                                key = id,
                                error = %e,
                                "could not fetch updated entry; keeping previous value"
                            );
                            return;
                        }
                    },
                };
                match raw {
                    Some(raw) => match E::parse(id, &raw) {
                        Ok(entry) => {
                            self.table.upsert(id.to_string(), entry);
                            tracing::debug!(namespace = E::NAMESPACE, key = id, "entry updated");
                        }
                        Err(e) => {
                            tracing::warn!(
                                namespace = E::NAMESPACE,
                                key = id,
                                error = %e,
                                "rejecting malformed entry; keeping previous value"
                            );
                        }
                    },
                    // the key vanished between the event and the fetch
                    None => {
                        self.table.remove(id);
                        tracing::debug!(namespace = E::NAMESPACE, key = id, "entry removed");
                    }
                }
            }
            ChangeKind::Delete | ChangeKind::Expire => {
                // a route disappearing is a normal lifecycle event
                self.table.remove(id);
                tracing::debug!(namespace = E::NAMESPACE, key = id, "entry removed");
            }
        }
    }
}
