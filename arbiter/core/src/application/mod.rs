// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application layer for the Arbiter bounded context: services, projectors,
//! and background tasks.

pub mod causal_graph;
pub mod decision_tracker;
pub mod event_log;
pub mod maintenance;
pub mod memory_projector;
pub mod outcome_processor;
pub mod projection;
pub mod query;
pub mod upcaster;

pub use causal_graph::{
    CausalGraph, CausalGraphConfig, CausalGraphError, CausalPath, CausalProjector, EdgeEvidence,
};
pub use decision_tracker::{
    DecisionProjector, DecisionTracker, OutcomeSignal, StandardDecisionTracker,
};
pub use event_log::{EventDraft, EventLog, EventLogError};
pub use maintenance::{
    MaintenanceConfig, MaintenanceReport, MaintenanceRunner, MergeConfig, PromotionConfig,
};
pub use memory_projector::MemoryProjector;
pub use outcome_processor::{AttributionConfig, OutcomeProcessor};
pub use projection::{
    ProjectionCoordinator, ProjectionCoordinatorConfig, ProjectionError, Projector, ReplayError,
    ReplayOutcome,
};
pub use query::{DecisionSuccessRate, MemoryQuery, ProjectionStaleness, QueryService};
pub use upcaster::{UpcastError, UpcastFn, UpcasterRegistry};
