//! Model routing entries: internal routing id -> providers and preference order.

use std::collections::HashMap;

use serde::Deserialize;
use url::Url;

use super::{ConfigEntry, EntryError, RESERVED_PREFIX};

/// Where the provider expects its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    /// No credential is attached (local or unauthenticated upstreams).
    #[default]
    None,
    /// Credential is sent as a bearer token in the Authorization header.
    Header,
}

/// Configuration for one upstream provider within a model entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind, e.g. "openai" or "ollama".
    #[serde(rename = "type")]
    pub kind: String,
    /// The model name the upstream expects (may differ from every alias).
    pub model_name: String,
    /// Base URL of the upstream endpoint.
    pub api_base: Url,
    #[serde(default)]
    pub api_key_location: ApiKeyLocation,
    /// Upstream credential, used when `api_key_location` is `header`.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Routing policy for one internal routing id.
///
/// `routing` is the provider preference order (primary first, preserved
/// exactly as configured); `providers` holds the per-provider configs.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    routing: Vec<String>,
    providers: HashMap<String, ProviderConfig>,
}

impl ModelEntry {
    /// Providers in preference order, primary first.
    ///
    /// Validation at ingestion guarantees every routing name has a config.
    pub fn ordered_providers(&self) -> impl Iterator<Item = (&str, &ProviderConfig)> {
        self.routing
            .iter()
            .filter_map(|name| self.providers.get(name).map(|cfg| (name.as_str(), cfg)))
    }

    pub fn routing(&self) -> &[String] {
        &self.routing
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

impl ConfigEntry for ModelEntry {
    const NAMESPACE: &'static str = "model";

    fn parse(id: &str, raw: &[u8]) -> Result<Self, EntryError> {
        if id.starts_with(RESERVED_PREFIX) {
            return Err(EntryError::ReservedId(id.to_string()));
        }
        let entry: ModelEntry = serde_json::from_slice(raw)?;
        if entry.routing.is_empty() {
            return Err(EntryError::EmptyRouting);
        }
        for name in &entry.routing {
            if !entry.providers.contains_key(name) {
                return Err(EntryError::MissingProvider(name.clone()));
            }
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_entry(routing: &[&str], providers: &[&str]) -> Vec<u8> {
        let providers: serde_json::Map<String, serde_json::Value> = providers
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    serde_json::json!({
                        "type": "openai",
                        "model_name": format!("{name}-model"),
                        "api_base": "http://localhost:9000",
                        "api_key_location": "none"
                    }),
                )
            })
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "routing": routing,
            "providers": providers,
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_valid_entry_preserves_routing_order() {
        let raw = raw_entry(&["p2", "p1", "p3"], &["p1", "p2", "p3"]);
        let entry = ModelEntry::parse("route_a", &raw).unwrap();
        assert_eq!(entry.routing(), &["p2", "p1", "p3"]);

        let order: Vec<&str> = entry.ordered_providers().map(|(name, _)| name).collect();
        assert_eq!(order, vec!["p2", "p1", "p3"]);
        assert_eq!(entry.provider("p1").unwrap().model_name, "p1-model");
    }

    #[test]
    fn test_parse_rejects_routing_without_provider() {
        let raw = raw_entry(&["p1", "ghost"], &["p1"]);
        assert!(matches!(
            ModelEntry::parse("route_a", &raw),
            Err(EntryError::MissingProvider(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_parse_rejects_empty_routing() {
        let raw = raw_entry(&[], &["p1"]);
        assert!(matches!(
            ModelEntry::parse("route_a", &raw),
            Err(EntryError::EmptyRouting)
        ));
    }

    #[test]
    fn test_parse_rejects_reserved_id() {
        let raw = raw_entry(&["p1"], &["p1"]);
        assert!(matches!(
            ModelEntry::parse("route:route_a", &raw),
            Err(EntryError::ReservedId(_))
        ));
    }

    #[test]
    fn test_api_key_location_defaults_to_none() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "routing": ["p1"],
            "providers": {
                "p1": {
                    "type": "openai",
                    "model_name": "m1",
                    "api_base": "http://h"
                }
            }
        }))
        .unwrap();
        let entry = ModelEntry::parse("route_a", &raw).unwrap();
        let cfg = entry.provider("p1").unwrap();
        assert_eq!(cfg.api_key_location, ApiKeyLocation::None);
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn test_parse_rejects_invalid_api_base() {
        let raw = serde_json::to_vec(&serde_json::json!({
            "routing": ["p1"],
            "providers": {
                "p1": {
                    "type": "openai",
                    "model_name": "m1",
                    "api_base": "not a url"
                }
            }
        }))
        .unwrap();
        assert!(matches!(
            ModelEntry::parse("route_a", &raw),
            Err(EntryError::Json(_))
        ));
    }
}
