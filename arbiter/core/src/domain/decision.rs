// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Decision traces and observed outcomes.
//!
//! A [`DecisionTrace`] records one decision-making act: the memory context
//! that was retrieved, the decision made from it, and — asynchronously — the
//! outcomes observed and the attribution computed from them. After creation a
//! trace is updated exactly twice more (outcome, attribution) and is
//! otherwise immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::causal::EdgeId;
use crate::domain::event::UserId;
use crate::domain::memory::MemoryId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceId(pub Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutcomeId(pub Uuid);

impl OutcomeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OutcomeId {
    fn default() -> Self {
        Self::new()
    }
}

/// How an outcome signal was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    ExplicitPositive,
    ExplicitNegative,
    ImplicitPositive,
    ImplicitNegative,
    Correction,
    TaskCompleted,
    TaskAbandoned,
    Unknown,
}

/// One observed signal tied to a trace. Immutable once recorded; multiple
/// outcomes may attach to the same trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub outcome_id: OutcomeId,
    pub trace_id: TraceId,
    pub signal_type: SignalType,
    pub quality_score: f64,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
    /// Milliseconds between the decision and this observation; zero when the
    /// outcome arrived before the decision event was projected.
    pub latency_from_decision_ms: i64,
}

#[derive(Debug, Clone, Error)]
pub enum DecisionError {
    #[error("trace {0:?} already has attribution computed")]
    AlreadyAttributed(TraceId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub trace_id: TraceId,
    pub user_id: UserId,
    pub session_id: SessionId,
    /// Ordered, non-empty context; validated at the command boundary.
    pub context_memory_ids: Vec<MemoryId>,
    /// Per-memory relevance, parallel to `context_memory_ids`.
    pub retrieval_scores: Vec<f64>,
    /// Causal edges consulted for this decision.
    pub context_edge_ids: Vec<EdgeId>,
    pub decision_summary: Option<String>,
    pub confidence: Option<f64>,
    pub alternatives_considered: Vec<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub outcome_observed: bool,
    pub outcome_quality: Option<f64>,
    pub memory_attribution: BTreeMap<MemoryId, f64>,
    pub edge_attribution: BTreeMap<EdgeId, f64>,
    pub attribution_computed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DecisionTrace {
    pub fn new(
        trace_id: TraceId,
        user_id: UserId,
        session_id: SessionId,
        context_memory_ids: Vec<MemoryId>,
        retrieval_scores: Vec<f64>,
        context_edge_ids: Vec<EdgeId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id,
            user_id,
            session_id,
            context_memory_ids,
            retrieval_scores,
            context_edge_ids,
            decision_summary: None,
            confidence: None,
            alternatives_considered: Vec::new(),
            decided_at: None,
            outcome_observed: false,
            outcome_quality: None,
            memory_attribution: BTreeMap::new(),
            edge_attribution: BTreeMap::new(),
            attribution_computed_at: None,
            created_at,
        }
    }

    pub fn record_decision(
        &mut self,
        summary: String,
        confidence: f64,
        alternatives: Vec<String>,
        at: DateTime<Utc>,
    ) {
        self.decision_summary = Some(summary);
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self.alternatives_considered = alternatives;
        self.decided_at = Some(at);
    }

    pub fn observe_outcome(&mut self) {
        self.outcome_observed = true;
    }

    /// A trace is picked up by the attribution batch when an outcome exists
    /// and attribution has not run yet. `attribution_computed_at` is the
    /// natural uniqueness check that makes attribution idempotent under
    /// redelivery.
    pub fn needs_attribution(&self) -> bool {
        self.outcome_observed && self.attribution_computed_at.is_none()
    }

    pub fn apply_attribution(
        &mut self,
        outcome_quality: f64,
        memory_attribution: BTreeMap<MemoryId, f64>,
        edge_attribution: BTreeMap<EdgeId, f64>,
        at: DateTime<Utc>,
    ) -> Result<(), DecisionError> {
        if self.attribution_computed_at.is_some() {
            return Err(DecisionError::AlreadyAttributed(self.trace_id));
        }
        self.outcome_quality = Some(outcome_quality);
        self.memory_attribution = memory_attribution;
        self.edge_attribution = edge_attribution;
        self.attribution_computed_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace() -> DecisionTrace {
        DecisionTrace::new(
            TraceId::new(),
            UserId::new(),
            SessionId::new(),
            vec![MemoryId::new()],
            vec![1.0],
            vec![],
            Utc::now(),
        )
    }

    #[test]
    fn test_needs_attribution_lifecycle() {
        let mut t = trace();
        assert!(!t.needs_attribution());

        t.observe_outcome();
        assert!(t.needs_attribution());

        let mut attribution = BTreeMap::new();
        attribution.insert(t.context_memory_ids[0], 0.2);
        t.apply_attribution(1.0, attribution, BTreeMap::new(), Utc::now())
            .unwrap();
        assert!(!t.needs_attribution());
        assert_eq!(t.outcome_quality, Some(1.0));
    }

    #[test]
    fn test_attribution_applies_exactly_once() {
        let mut t = trace();
        t.observe_outcome();
        t.apply_attribution(0.5, BTreeMap::new(), BTreeMap::new(), Utc::now())
            .unwrap();
        assert!(matches!(
            t.apply_attribution(0.5, BTreeMap::new(), BTreeMap::new(), Utc::now())
                .unwrap_err(),
            DecisionError::AlreadyAttributed(_)
        ));
    }
}
