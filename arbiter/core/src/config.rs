// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Engine configuration.
//!
//! Every component takes its own config struct at construction; there is no
//! process-wide mutable settings object. [`EngineConfig`] is the aggregate
//! loaded from `arbiter-config.yaml` at startup, with every field defaulted
//! so a missing file or section falls back to the documented defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::application::maintenance::MaintenanceConfig;
use crate::application::outcome_processor::AttributionConfig;
use crate::application::causal_graph::CausalGraphConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageSettings,
    pub attribution: AttributionConfig,
    pub maintenance: MaintenanceConfig,
    pub causal: CausalGraphConfig,
    pub coordinator: CoordinatorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// `in_memory` or `postgres`.
    pub backend: Backend,

    /// Connection string, required for the `postgres` backend.
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        let defaults = crate::application::projection::ProjectionCoordinatorConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_backoff_ms: defaults.initial_backoff_ms,
            poll_interval_ms: defaults.poll_interval_ms,
            batch_size: defaults.batch_size,
        }
    }
}

impl From<CoordinatorSettings> for crate::application::projection::ProjectionCoordinatorConfig {
    fn from(settings: CoordinatorSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff_ms: settings.initial_backoff_ms,
            poll_interval_ms: settings.poll_interval_ms,
            batch_size: settings.batch_size,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.storage.backend, Backend::InMemory);
        assert_eq!(config.attribution.attribution_rate, 0.2);
        assert_eq!(config.maintenance.promotion.min_decisions, 5);
        assert_eq!(config.maintenance.promotion.min_success_rate, 0.7);
        assert_eq!(config.causal.min_strength, 0.5);
        assert_eq!(config.causal.min_evidence, 5);
    }

    #[test]
    fn test_partial_yaml_overrides() {
        let config = EngineConfig::from_yaml_str(
            r#"
storage:
  backend: postgres
  database_url: postgres://arbiter@localhost/arbiter
attribution:
  attribution_rate: 0.1
causal:
  min_evidence: 3
"#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, Backend::Postgres);
        assert_eq!(config.attribution.attribution_rate, 0.1);
        assert_eq!(config.causal.min_evidence, 3);
        // Untouched sections keep their defaults.
        assert_eq!(config.causal.min_strength, 0.5);
        assert_eq!(config.maintenance.interval_seconds, 3600);
    }
}
