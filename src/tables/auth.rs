//! Tenant auth entries: API key -> model alias mapping.

use std::collections::HashMap;

use serde::Deserialize;

use super::{ConfigEntry, EntryError, RESERVED_PREFIX};

/// One tenant's mapping from user-facing model alias to internal routing id.
///
/// Stored in the external store as a flat JSON object, e.g.
/// `{"gpt": "route_a", "fast": "route_b"}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct AuthEntry {
    aliases: HashMap<String, String>,
}

impl AuthEntry {
    /// Resolve a user-facing alias to its internal routing id.
    pub fn route_id(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl ConfigEntry for AuthEntry {
    const NAMESPACE: &'static str = "auth";

    fn parse(_id: &str, raw: &[u8]) -> Result<Self, EntryError> {
        let entry: AuthEntry = serde_json::from_slice(raw)?;
        for (alias, route_id) in &entry.aliases {
            if alias.is_empty() {
                return Err(EntryError::EmptyAlias);
            }
            if alias.starts_with(RESERVED_PREFIX) {
                return Err(EntryError::ReservedAlias(alias.clone()));
            }
            if route_id.is_empty() || route_id.starts_with(RESERVED_PREFIX) {
                return Err(EntryError::InvalidAliasTarget(alias.clone()));
            }
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_entry() {
        let raw = br#"{"gpt": "route_a", "fast": "route_b"}"#;
        let entry = AuthEntry::parse("tk_1", raw).unwrap();
        assert_eq!(entry.route_id("gpt"), Some("route_a"));
        assert_eq!(entry.route_id("fast"), Some("route_b"));
        assert_eq!(entry.route_id("other"), None);
        assert_eq!(entry.len(), 2);
    }

    #[test]
    fn test_parse_empty_mapping_is_valid() {
        let entry = AuthEntry::parse("tk_1", b"{}").unwrap();
        assert!(entry.is_empty());
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            AuthEntry::parse("tk_1", b"not json"),
            Err(EntryError::Json(_))
        ));
        assert!(matches!(
            AuthEntry::parse("tk_1", br#"["a", "b"]"#),
            Err(EntryError::Json(_))
        ));
    }

    #[test]
    fn test_parse_rejects_reserved_targets_and_aliases() {
        assert!(matches!(
            AuthEntry::parse("tk_1", br#"{"gpt": "route:sneaky"}"#),
            Err(EntryError::InvalidAliasTarget(_))
        ));
        assert!(matches!(
            AuthEntry::parse("tk_1", br#"{"route:gpt": "route_a"}"#),
            Err(EntryError::ReservedAlias(_))
        ));
        assert!(matches!(
            AuthEntry::parse("tk_1", br#"{"gpt": ""}"#),
            Err(EntryError::InvalidAliasTarget(_))
        ));
    }
}
