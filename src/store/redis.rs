//! Redis-backed configuration channel.
//!
//! Snapshots use `SCAN`/`MGET`; the change stream rides on keyspace
//! notifications (`__keyspace@{db}__:{key}`), which carry the operation
//! name but no payload, so `Set` events are re-fetched by the consumer.

use redis::AsyncCommands;
use tokio::sync::mpsc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::sync::BackoffConfig;

use super::{ChangeEvent, ChangeKind, ChannelEvent, ConfigChannel, StoreError};

pub struct RedisConfigChannel {
    client: redis::Client,
    db: i64,
    backoff: BackoffConfig,
}

impl RedisConfigChannel {
    /// Open a channel against the given `redis://` URL.
    ///
    /// Only the address itself is validated here; an unreachable store is
    /// not fatal, the sync service keeps retrying and the affected
    /// namespaces report not-ready until a snapshot succeeds.
    pub async fn connect(url: &str, backoff: BackoffConfig) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::InvalidAddress(e.to_string()))?;
        let db = client.get_connection_info().redis.db;
        let channel = Self {
            client,
            db,
            backoff,
        };
        channel.enable_keyspace_notifications().await;
        Ok(channel)
    }

    /// Best effort: managed deployments often lock CONFIG down, in which
    /// case notifications must be enabled server-side.
    async fn enable_keyspace_notifications(&self) {
        match self.client.get_multiplexed_async_connection().await {
            Ok(mut con) => {
                let result: Result<(), redis::RedisError> = redis::cmd("CONFIG")
                    .arg("SET")
                    .arg("notify-keyspace-events")
                    .arg("Kg$x")
                    .query_async(&mut con)
                    .await;
                if let Err(e) = result {
                    tracing::warn!(
                        error = %e,
                        "could not enable keyspace notifications; assuming they are configured"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "configuration store unreachable at startup; sync will keep retrying"
                );
            }
        }
    }
}

#[async_trait]
impl ConfigChannel for RedisConfigChannel {
    async fn snapshot(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let pattern = format!("{prefix}*");

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<Vec<u8>>> = con.mget(&keys).await?;
        // a key can expire between SCAN and MGET; skip the gaps
        Ok(keys
            .into_iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|value| (key, value)))
            .collect())
    }

    async fn subscribe(&self, prefix: &str) -> Result<BoxStream<'static, ChannelEvent>, StoreError> {
        let (tx, rx) = mpsc::channel(64);
        let keyspace_prefix = format!("__keyspace@{}__:", self.db);
        let pattern = format!("{keyspace_prefix}{prefix}*");
        tokio::spawn(pump_events(
            self.client.clone(),
            keyspace_prefix,
            pattern,
            self.backoff,
            tx,
        ));
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        Ok(con.get(key).await?)
    }
}

/// Forward keyspace notifications into the subscription, reconnecting with
/// bounded backoff. Returning drops the sender, which ends the stream.
async fn pump_events(
    client: redis::Client,
    keyspace_prefix: String,
    pattern: String,
    backoff: BackoffConfig,
    tx: mpsc::Sender<ChannelEvent>,
) {
    let mut first_connection = true;
    loop {
        let mut attempt: u32 = 0;
        let pubsub = loop {
            match connect_pubsub(&client, &pattern).await {
                Ok(pubsub) => break pubsub,
                Err(e) => {
                    attempt += 1;
                    if attempt > backoff.max_attempts {
                        tracing::error!(
                            error = %e,
                            attempts = backoff.max_attempts,
                            "reconnect budget exhausted; terminating store subscription"
                        );
                        return;
                    }
                    let delay = backoff.delay(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "store subscription connect failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        if first_connection {
            first_connection = false;
        } else if tx.send(ChannelEvent::Resync).await.is_err() {
            return; // subscriber went away
        }

        let mut messages = pubsub.into_on_message();
        while let Some(msg) = messages.next().await {
            let Some(event) = keyspace_event(&keyspace_prefix, &msg) else {
                continue;
            };
            if tx.send(ChannelEvent::Change(event)).await.is_err() {
                return;
            }
        }
        tracing::warn!("store subscription lost; reconnecting");
    }
}

async fn connect_pubsub(
    client: &redis::Client,
    pattern: &str,
) -> Result<redis::aio::PubSub, redis::RedisError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(pattern).await?;
    Ok(pubsub)
}

/// Translate one keyspace notification into a change event.
///
/// The channel name carries the key, the payload carries the operation.
/// Payloads are never delivered inline over this transport.
fn keyspace_event(keyspace_prefix: &str, msg: &redis::Msg) -> Option<ChangeEvent> {
    let channel = msg.get_channel_name();
    let key = channel.strip_prefix(keyspace_prefix)?;
    let op: String = msg.get_payload().ok()?;
    let kind = match op.as_str() {
        "set" => ChangeKind::Set,
        "del" => ChangeKind::Delete,
        "expired" => ChangeKind::Expire,
        other => {
            tracing::debug!(key, op = other, "ignoring keyspace event");
            return None;
        }
    };
    Some(ChangeEvent {
        key: key.to_string(),
        kind,
        value: None,
    })
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
