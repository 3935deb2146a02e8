// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Upcaster registry for schema-versioned event payloads.
//!
//! Every event type starts at schema version 1 and only ever gains fields
//! (with defaults), so most version bumps need a single upcaster that fills
//! in the new field. Upcasters are keyed by `(event_type, from_version)` and
//! each maps a JSON payload exactly one version forward; replay chains them
//! until the payload reaches the current version. An event whose version has
//! no chain to current is unsupported and goes to the dead-letter path
//! instead of blocking the stream.

use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use crate::domain::event::CURRENT_SCHEMA_VERSION;

/// Maps a payload one schema version forward.
pub type UpcastFn =
    Box<dyn Fn(serde_json::Value) -> Result<serde_json::Value, UpcastError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum UpcastError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("no upcaster registered for {event_type} v{version}")]
    UnsupportedVersion { event_type: String, version: u16 },

    #[error("upcast of {event_type} v{version} produced invalid payload: {message}")]
    InvalidPayload {
        event_type: String,
        version: u16,
        message: String,
    },
}

const KNOWN_EVENT_TYPES: &[&str] = &[
    "interaction_recorded",
    "memory_extracted",
    "memory_created",
    "memory_updated",
    "memory_promoted",
    "memory_decayed",
    "memory_merged",
    "decision_requested",
    "context_retrieved",
    "decision_made",
    "outcome_observed",
    "attribution_computed",
    "salience_adjusted",
    "causal_edge_created",
    "causal_strength_updated",
    "causal_cycle_detected",
    "causal_cycle_classified",
    "causal_graph_pruned",
];

pub struct UpcasterRegistry {
    current: RwLock<HashMap<String, u16>>,
    upcasters: RwLock<HashMap<(String, u16), UpcastFn>>,
}

impl UpcasterRegistry {
    /// Registry knowing every current event type at [`CURRENT_SCHEMA_VERSION`]
    /// with no historical upcasters.
    pub fn with_current_schemas() -> Self {
        let current = KNOWN_EVENT_TYPES
            .iter()
            .map(|t| (t.to_string(), CURRENT_SCHEMA_VERSION))
            .collect();
        Self {
            current: RwLock::new(current),
            upcasters: RwLock::new(HashMap::new()),
        }
    }

    /// Register an upcaster mapping `event_type` payloads from
    /// `from_version` to `from_version + 1`, raising the current version for
    /// that type if needed.
    pub fn register(
        &self,
        event_type: impl Into<String>,
        from_version: u16,
        upcaster: UpcastFn,
    ) {
        let event_type = event_type.into();
        {
            let mut current = self.current.write();
            let entry = current.entry(event_type.clone()).or_insert(from_version + 1);
            if *entry < from_version + 1 {
                *entry = from_version + 1;
            }
        }
        self.upcasters
            .write()
            .insert((event_type, from_version), upcaster);
    }

    pub fn current_version(&self, event_type: &str) -> Option<u16> {
        self.current.read().get(event_type).copied()
    }

    /// Whether a payload at `version` can be brought to the current version.
    pub fn supports(&self, event_type: &str, version: u16) -> bool {
        let Some(current) = self.current_version(event_type) else {
            return false;
        };
        if version == current {
            return true;
        }
        if version > current {
            return false;
        }
        let upcasters = self.upcasters.read();
        (version..current).all(|v| upcasters.contains_key(&(event_type.to_string(), v)))
    }

    /// Chain upcasters until the payload reaches the current version.
    /// Returns the payload unchanged when it is already current.
    pub fn upcast_to_current(
        &self,
        event_type: &str,
        version: u16,
        payload: serde_json::Value,
    ) -> Result<(serde_json::Value, u16), UpcastError> {
        let current = self
            .current_version(event_type)
            .ok_or_else(|| UpcastError::UnknownEventType(event_type.to_string()))?;

        let mut payload = payload;
        let mut version = version;
        while version < current {
            let upcasters = self.upcasters.read();
            let upcaster = upcasters
                .get(&(event_type.to_string(), version))
                .ok_or_else(|| UpcastError::UnsupportedVersion {
                    event_type: event_type.to_string(),
                    version,
                })?;
            payload = upcaster(payload)?;
            version += 1;
        }
        if version > current {
            return Err(UpcastError::UnsupportedVersion {
                event_type: event_type.to_string(),
                version,
            });
        }
        Ok((payload, version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_schemas_supported() {
        let registry = UpcasterRegistry::with_current_schemas();
        assert!(registry.supports("memory_created", CURRENT_SCHEMA_VERSION));
        assert!(!registry.supports("memory_created", CURRENT_SCHEMA_VERSION + 1));
        assert!(!registry.supports("unheard_of_event", 1));
    }

    #[test]
    fn test_upcast_chain_adds_defaulted_fields() {
        let registry = UpcasterRegistry::with_current_schemas();

        // v1 -> v2 of decision_made once gained `alternatives_considered`.
        registry.register(
            "decision_made",
            1,
            Box::new(|mut payload| {
                payload["alternatives_considered"] = json!([]);
                Ok(payload)
            }),
        );
        assert_eq!(registry.current_version("decision_made"), Some(2));
        assert!(registry.supports("decision_made", 1));
        assert!(registry.supports("decision_made", 2));

        let v1 = json!({"type": "decision_made", "confidence": 0.5});
        let (v2, version) = registry.upcast_to_current("decision_made", 1, v1).unwrap();
        assert_eq!(version, 2);
        assert_eq!(v2["alternatives_considered"], json!([]));
    }

    #[test]
    fn test_unsupported_version_is_an_error() {
        let registry = UpcasterRegistry::with_current_schemas();
        registry.register("decision_made", 1, Box::new(|payload| Ok(payload)));
        // v0 has no path: 0 -> 1 is missing.
        assert!(!registry.supports("decision_made", 0));
        assert!(matches!(
            registry.upcast_to_current("decision_made", 0, json!({})),
            Err(UpcastError::UnsupportedVersion { version: 0, .. })
        ));
    }
}
