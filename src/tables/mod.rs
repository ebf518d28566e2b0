//! Concurrently-readable configuration tables.
//!
//! Both tables follow the same single-writer/many-reader discipline: the
//! sync service is the only component that mutates them, request handlers
//! only read. Entries are stored behind `Arc` so a reader always observes a
//! whole entry, never a half-updated one.

mod auth;
mod model;

pub use auth::AuthEntry;
pub use model::{ApiKeyLocation, ModelEntry, ProviderConfig};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Prefix reserved for internal routing references. Tenant-supplied model
/// names and configured routing ids must never carry it.
pub const RESERVED_PREFIX: &str = "route:";

/// Errors produced while parsing or validating a configuration entry.
///
/// These never reach request callers: a rejected entry is logged and the
/// previously stored value (if any) is retained.
#[derive(Debug, thiserror::Error)]
pub enum EntryError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("routing id '{0}' uses the reserved prefix")]
    ReservedId(String),
    #[error("model alias is empty")]
    EmptyAlias,
    #[error("alias '{0}' uses the reserved prefix")]
    ReservedAlias(String),
    #[error("alias '{0}' maps to an invalid routing id")]
    InvalidAliasTarget(String),
    #[error("routing list is empty")]
    EmptyRouting,
    #[error("routing entry '{0}' has no provider config")]
    MissingProvider(String),
}

/// A configuration entry type that can be ingested from the external store.
pub trait ConfigEntry: Send + Sync + Sized + 'static {
    /// Namespace label used in logs ("auth", "model").
    const NAMESPACE: &'static str;

    /// Parse and validate a raw payload for the given entry id.
    fn parse(id: &str, raw: &[u8]) -> Result<Self, EntryError>;
}

/// Read-mostly concurrent map from entry id to a parsed entry.
///
/// Reads take a short read lock and clone the `Arc`; mutations take the
/// write lock for a single insert/remove (or one map swap for
/// `replace_all`). No lock is ever held across an `await`.
#[derive(Debug)]
pub struct ConfigTable<E> {
    entries: RwLock<HashMap<String, Arc<E>>>,
}

/// Map from tenant API key to that tenant's model alias mapping.
pub type AuthTable = ConfigTable<AuthEntry>;

/// Map from internal routing id to routing policy and provider configs.
pub type ModelTable = ConfigTable<ModelEntry>;

impl<E> ConfigTable<E> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up an entry. Callable from many concurrent request tasks.
    pub fn get(&self, id: &str) -> Option<Arc<E>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Atomically replace the whole table with a freshly parsed snapshot.
    pub fn replace_all(&self, entries: HashMap<String, Arc<E>>) {
        *self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner) = entries;
    }

    /// Insert or replace a single entry.
    pub fn upsert(&self, id: String, entry: E) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(entry));
    }

    /// Remove an entry. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> Default for ConfigTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_upsert_and_remove() {
        let table: ConfigTable<String> = ConfigTable::new();
        assert!(table.get("a").is_none());

        table.upsert("a".to_string(), "one".to_string());
        assert_eq!(table.get("a").as_deref(), Some(&"one".to_string()));

        assert!(table.remove("a"));
        assert!(table.get("a").is_none());
        // removing again behaves like a key that was never set
        assert!(!table.remove("a"));
    }

    #[test]
    fn test_replace_all_swaps_whole_map() {
        let table: ConfigTable<u32> = ConfigTable::new();
        table.upsert("old".to_string(), 1);

        let mut fresh = HashMap::new();
        fresh.insert("new".to_string(), Arc::new(2));
        table.replace_all(fresh);

        assert!(table.get("old").is_none());
        assert_eq!(table.get("new").as_deref(), Some(&2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_concurrent_readers_observe_whole_entries() {
        let table: Arc<ConfigTable<(u32, u32)>> = Arc::new(ConfigTable::new());
        table.upsert("k".to_string(), (0, 0));

        let reader_table = table.clone();
        let reader = std::thread::spawn(move || {
            for _ in 0..10_000 {
                if let Some(entry) = reader_table.get("k") {
                    // both fields come from the same generation
                    assert_eq!(entry.0, entry.1);
                }
            }
        });

        for i in 0..10_000u32 {
            table.upsert("k".to_string(), (i, i));
        }
        reader.join().unwrap();
    }
}
