// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Event envelope and payload schemas for the Arbiter event log.
//!
//! Every fact the engine learns from — interactions, memory lifecycle,
//! decisions, outcomes, attribution, causal updates — is an immutable
//! [`EventEnvelope`] appended to the log. Read models are projections of
//! these events and carry no authority of their own.
//!
//! The payload is an internally-tagged variant keyed by `event_type`, one
//! concrete schema per type. Schemas are versioned from creation
//! (`schema_version` starts at 1); fields are never removed across versions,
//! only added with defaults so that replay of older events keeps working.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::causal::{CycleId, EdgeId, RelationshipType};
use crate::domain::decision::{OutcomeId, SessionId, SignalType, TraceId};
use crate::domain::memory::{ContentType, MemoryContent, MemoryId, TemporalLevel};
use crate::domain::salience::AdjustmentReason;

/// Schema version assigned to newly appended events.
pub const CURRENT_SCHEMA_VERSION: u16 = 1;

/// Tolerance for floating-point audit arithmetic (`previous + delta == new`).
pub const AUDIT_EPSILON: f64 = 1e-6;

/// Unique identifier of one appended event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Groups every event of one logical operation (e.g. all events of a single
/// decision trace share the trace's correlation id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of every mutable entity in the engine. All state is partitioned by
/// user; repositories key storage by this id so cross-user reads are
/// impossible by construction, not merely filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate roots events can belong to. Ordering is guaranteed per
/// aggregate, never across aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Interaction,
    Memory,
    Decision,
    CausalEdge,
    /// Graph-level facts (cycles, prune sweeps) that span many edges of one
    /// user's graph.
    CausalGraph,
}

/// Routing category, the first segment of the hierarchical routing key
/// `{category}.{event_type}.{user_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Interaction,
    Memory,
    Decision,
    Causal,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Interaction => "interaction",
            EventCategory::Memory => "memory",
            EventCategory::Decision => "decision",
            EventCategory::Causal => "causal",
        }
    }
}

/// Domain event payloads, tagged by `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Raw interaction captured by the (external) capture layer.
    InteractionRecorded {
        interaction_id: Uuid,
        source: String,
        content_hash: String,
    },

    /// The extraction pipeline identified a memory candidate in an
    /// interaction.
    MemoryExtracted {
        memory_id: MemoryId,
        interaction_id: Option<Uuid>,
        content_type: ContentType,
    },

    MemoryCreated {
        memory_id: MemoryId,
        content: MemoryContent,
        content_type: ContentType,
        temporal_level: TemporalLevel,
        base_salience: f64,
        /// Producer-supplied embedding; the content blob itself is opaque to
        /// this core, so similarity can only be computed upstream.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        embedding: Option<Vec<f32>>,
    },

    MemoryUpdated {
        memory_id: MemoryId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<MemoryContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<ContentType>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        embedding: Option<Vec<f32>>,
    },

    MemoryPromoted {
        memory_id: MemoryId,
        from_level: TemporalLevel,
        to_level: TemporalLevel,
        decision_count: u64,
        positive_outcomes: u64,
    },

    /// Decay results are computed by the maintenance task and recorded with
    /// both the previous and new salience so replay is deterministic.
    MemoryDecayed {
        memory_id: MemoryId,
        previous_salience: f64,
        new_salience: f64,
        idle_days: i64,
    },

    MemoryMerged {
        survivor_id: MemoryId,
        absorbed_id: MemoryId,
        similarity: f64,
        merged_retrieval_count: u64,
        merged_decision_count: u64,
    },

    DecisionRequested {
        trace_id: TraceId,
        session_id: SessionId,
    },

    ContextRetrieved {
        trace_id: TraceId,
        session_id: SessionId,
        memory_ids: Vec<MemoryId>,
        retrieval_scores: Vec<f64>,
        #[serde(default)]
        edge_ids: Vec<EdgeId>,
    },

    DecisionMade {
        trace_id: TraceId,
        decision_summary: String,
        confidence: f64,
        #[serde(default)]
        alternatives_considered: Vec<String>,
    },

    OutcomeObserved {
        outcome_id: OutcomeId,
        trace_id: TraceId,
        signal_type: SignalType,
        quality_score: f64,
        confidence: f64,
    },

    AttributionComputed {
        trace_id: TraceId,
        outcome_quality: f64,
        attribution_rate: f64,
        memory_attribution: BTreeMap<MemoryId, f64>,
        #[serde(default)]
        edge_attribution: BTreeMap<EdgeId, f64>,
    },

    /// Append-only audit record of one outcome-driven salience change.
    /// Invariant: `previous_adjustment + adjustment_delta == new_adjustment`
    /// within [`AUDIT_EPSILON`].
    SalienceAdjusted {
        memory_id: MemoryId,
        adjustment_delta: f64,
        previous_adjustment: f64,
        new_adjustment: f64,
        reason: AdjustmentReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_trace_id: Option<TraceId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_outcome_id: Option<OutcomeId>,
    },

    CausalEdgeCreated {
        edge_id: EdgeId,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
        relationship_type: RelationshipType,
        strength: f64,
        confidence: f64,
        #[serde(default)]
        activation_conditions: Vec<String>,
    },

    /// Same clamp-and-audit discipline as `SalienceAdjusted`.
    CausalStrengthUpdated {
        edge_id: EdgeId,
        strength_delta: f64,
        previous_strength: f64,
        new_strength: f64,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_trace_id: Option<TraceId>,
    },

    CausalCycleDetected {
        cycle_id: CycleId,
        edge_ids: Vec<EdgeId>,
        entity_path: Vec<Uuid>,
    },

    /// Manual-review verdict on a flagged cycle; resolution requires this to
    /// be recorded first.
    CausalCycleClassified {
        cycle_id: CycleId,
        classification: crate::domain::causal::CycleClassification,
    },

    CausalGraphPruned {
        edge_ids: Vec<EdgeId>,
        min_strength: f64,
        min_evidence: u64,
    },
}

impl EventPayload {
    /// Wire-level event type tag, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::InteractionRecorded { .. } => "interaction_recorded",
            EventPayload::MemoryExtracted { .. } => "memory_extracted",
            EventPayload::MemoryCreated { .. } => "memory_created",
            EventPayload::MemoryUpdated { .. } => "memory_updated",
            EventPayload::MemoryPromoted { .. } => "memory_promoted",
            EventPayload::MemoryDecayed { .. } => "memory_decayed",
            EventPayload::MemoryMerged { .. } => "memory_merged",
            EventPayload::DecisionRequested { .. } => "decision_requested",
            EventPayload::ContextRetrieved { .. } => "context_retrieved",
            EventPayload::DecisionMade { .. } => "decision_made",
            EventPayload::OutcomeObserved { .. } => "outcome_observed",
            EventPayload::AttributionComputed { .. } => "attribution_computed",
            EventPayload::SalienceAdjusted { .. } => "salience_adjusted",
            EventPayload::CausalEdgeCreated { .. } => "causal_edge_created",
            EventPayload::CausalStrengthUpdated { .. } => "causal_strength_updated",
            EventPayload::CausalCycleDetected { .. } => "causal_cycle_detected",
            EventPayload::CausalCycleClassified { .. } => "causal_cycle_classified",
            EventPayload::CausalGraphPruned { .. } => "causal_graph_pruned",
        }
    }

    pub fn category(&self) -> EventCategory {
        match self {
            EventPayload::InteractionRecorded { .. } => EventCategory::Interaction,
            EventPayload::MemoryExtracted { .. }
            | EventPayload::MemoryCreated { .. }
            | EventPayload::MemoryUpdated { .. }
            | EventPayload::MemoryPromoted { .. }
            | EventPayload::MemoryDecayed { .. }
            | EventPayload::MemoryMerged { .. }
            | EventPayload::SalienceAdjusted { .. } => EventCategory::Memory,
            EventPayload::DecisionRequested { .. }
            | EventPayload::ContextRetrieved { .. }
            | EventPayload::DecisionMade { .. }
            | EventPayload::OutcomeObserved { .. }
            | EventPayload::AttributionComputed { .. } => EventCategory::Decision,
            EventPayload::CausalEdgeCreated { .. }
            | EventPayload::CausalStrengthUpdated { .. }
            | EventPayload::CausalCycleDetected { .. }
            | EventPayload::CausalCycleClassified { .. }
            | EventPayload::CausalGraphPruned { .. } => EventCategory::Causal,
        }
    }

    /// The aggregate this event belongs to. Per-aggregate ordering is the
    /// only ordering guarantee the log makes.
    pub fn aggregate(&self, user_id: UserId) -> (AggregateType, Uuid) {
        match self {
            EventPayload::InteractionRecorded { interaction_id, .. } => {
                (AggregateType::Interaction, *interaction_id)
            }
            EventPayload::MemoryExtracted { memory_id, .. }
            | EventPayload::MemoryCreated { memory_id, .. }
            | EventPayload::MemoryUpdated { memory_id, .. }
            | EventPayload::MemoryPromoted { memory_id, .. }
            | EventPayload::MemoryDecayed { memory_id, .. }
            | EventPayload::SalienceAdjusted { memory_id, .. } => {
                (AggregateType::Memory, memory_id.0)
            }
            EventPayload::MemoryMerged { survivor_id, .. } => {
                (AggregateType::Memory, survivor_id.0)
            }
            EventPayload::DecisionRequested { trace_id, .. }
            | EventPayload::ContextRetrieved { trace_id, .. }
            | EventPayload::DecisionMade { trace_id, .. }
            | EventPayload::OutcomeObserved { trace_id, .. }
            | EventPayload::AttributionComputed { trace_id, .. } => {
                (AggregateType::Decision, trace_id.0)
            }
            EventPayload::CausalEdgeCreated { edge_id, .. }
            | EventPayload::CausalStrengthUpdated { edge_id, .. } => {
                (AggregateType::CausalEdge, edge_id.0)
            }
            EventPayload::CausalCycleDetected { .. }
            | EventPayload::CausalCycleClassified { .. }
            | EventPayload::CausalGraphPruned { .. } => (AggregateType::CausalGraph, user_id.0),
        }
    }

    /// Boundary validation. Rejected payloads are never appended and never
    /// retried.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            EventPayload::MemoryCreated { base_salience, .. } => {
                check_unit("base_salience", *base_salience)
            }
            EventPayload::MemoryPromoted {
                from_level,
                to_level,
                ..
            } => {
                if from_level.next() != Some(*to_level) {
                    return Err(ValidationError::MalformedEnvelope(format!(
                        "promotion must advance exactly one level, got {:?} -> {:?}",
                        from_level, to_level
                    )));
                }
                Ok(())
            }
            EventPayload::MemoryDecayed {
                previous_salience,
                new_salience,
                ..
            } => {
                check_unit("previous_salience", *previous_salience)?;
                check_unit("new_salience", *new_salience)?;
                if new_salience > previous_salience {
                    return Err(ValidationError::MalformedEnvelope(
                        "decay can only lower salience".to_string(),
                    ));
                }
                Ok(())
            }
            EventPayload::MemoryMerged { similarity, .. } => check_unit("similarity", *similarity),
            EventPayload::ContextRetrieved {
                memory_ids,
                retrieval_scores,
                ..
            } => {
                if memory_ids.is_empty() {
                    return Err(ValidationError::EmptyContext);
                }
                if memory_ids.len() != retrieval_scores.len() {
                    return Err(ValidationError::ScoreCountMismatch {
                        scores: retrieval_scores.len(),
                        memories: memory_ids.len(),
                    });
                }
                for score in retrieval_scores {
                    if !score.is_finite() || *score < 0.0 {
                        return Err(ValidationError::ScoreOutOfRange {
                            field: "retrieval_score",
                            value: *score,
                            min: 0.0,
                            max: f64::INFINITY,
                        });
                    }
                }
                Ok(())
            }
            EventPayload::DecisionMade { confidence, .. } => check_unit("confidence", *confidence),
            EventPayload::OutcomeObserved {
                quality_score,
                confidence,
                ..
            } => {
                check_signed_unit("quality_score", *quality_score)?;
                check_unit("confidence", *confidence)
            }
            EventPayload::AttributionComputed {
                outcome_quality,
                attribution_rate,
                ..
            } => {
                check_signed_unit("outcome_quality", *outcome_quality)?;
                check_unit("attribution_rate", *attribution_rate)
            }
            EventPayload::SalienceAdjusted {
                adjustment_delta,
                previous_adjustment,
                new_adjustment,
                ..
            } => {
                check_signed_unit("previous_adjustment", *previous_adjustment)?;
                check_signed_unit("new_adjustment", *new_adjustment)?;
                check_audit_arithmetic(*previous_adjustment, *adjustment_delta, *new_adjustment)
            }
            EventPayload::CausalEdgeCreated {
                strength,
                confidence,
                source_entity_id,
                target_entity_id,
                ..
            } => {
                if source_entity_id == target_entity_id {
                    return Err(ValidationError::MalformedEnvelope(
                        "causal edge cannot relate an entity to itself".to_string(),
                    ));
                }
                check_unit("strength", *strength)?;
                check_unit("confidence", *confidence)
            }
            EventPayload::CausalStrengthUpdated {
                strength_delta,
                previous_strength,
                new_strength,
                ..
            } => {
                check_unit("previous_strength", *previous_strength)?;
                check_unit("new_strength", *new_strength)?;
                check_audit_arithmetic(*previous_strength, *strength_delta, *new_strength)
            }
            EventPayload::CausalCycleDetected { edge_ids, .. } => {
                if edge_ids.is_empty() {
                    return Err(ValidationError::MalformedEnvelope(
                        "cycle must reference at least one edge".to_string(),
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn check_unit(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::ScoreOutOfRange {
            field,
            value,
            min: 0.0,
            max: 1.0,
        });
    }
    Ok(())
}

fn check_signed_unit(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
        return Err(ValidationError::ScoreOutOfRange {
            field,
            value,
            min: -1.0,
            max: 1.0,
        });
    }
    Ok(())
}

fn check_audit_arithmetic(previous: f64, delta: f64, new: f64) -> Result<(), ValidationError> {
    if (previous + delta - new).abs() > AUDIT_EPSILON {
        return Err(ValidationError::AdjustmentArithmetic {
            previous,
            delta,
            new,
        });
    }
    Ok(())
}

/// Envelope of one stored event. Reproduced exactly at the wire/storage
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: String,
    pub schema_version: u16,
    pub aggregate_type: AggregateType,
    pub aggregate_id: Uuid,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<EventId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub payload: EventPayload,
}

impl EventEnvelope {
    /// Hierarchical routing key `{category}.{event_type}.{user_id}` so
    /// consumers can subscribe by category, by type, or by user.
    pub fn routing_key(&self) -> String {
        format!(
            "{}.{}.{}",
            self.payload.category().as_str(),
            self.event_type,
            self.user_id.0
        )
    }

    /// Monthly storage partition this event belongs to.
    pub fn partition_key(&self) -> String {
        self.recorded_at.format("%Y-%m").to_string()
    }
}

/// An event together with its durable position in the log. Positions are
/// strictly increasing in recorded order and never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    pub position: u64,
    pub envelope: EventEnvelope,
}

/// Boundary rejections. Never appended, never retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field} = {value} outside [{min}, {max}]")]
    ScoreOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("decision context must reference at least one memory")]
    EmptyContext,

    #[error("{scores} retrieval scores for {memories} context memories")]
    ScoreCountMismatch { scores: usize, memories: usize },

    #[error("occurred_at {occurred_at} is later than recorded_at {recorded_at}")]
    OutOfOrderTimestamp {
        occurred_at: DateTime<Utc>,
        recorded_at: DateTime<Utc>,
    },

    #[error("audit arithmetic violated: {previous} + {delta} != {new}")]
    AdjustmentArithmetic { previous: f64, delta: f64, new: f64 },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}
