// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # DecisionTracker — decision traces and observed outcomes
//!
//! Commands validate at the boundary and append events; the projector builds
//! the DecisionTrace read model from them. Recording an outcome never
//! touches memory salience — attribution happens asynchronously in the
//! outcome processor, off the decision-recording path.
//!
//! All events of one trace share the trace's correlation id, so
//! `iterate_by_correlation` returns the full story of a decision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::application::event_log::{EventDraft, EventLog, EventLogError};
use crate::application::projection::{ProjectionError, Projector};
use crate::domain::causal::EdgeId;
use crate::domain::decision::{
    DecisionTrace, Outcome, OutcomeId, SessionId, SignalType, TraceId,
};
use crate::domain::event::{CorrelationId, EventId, EventPayload, StoredEvent, UserId};
use crate::domain::memory::MemoryId;
use crate::domain::repository::DecisionRepository;

/// One outcome signal handed to [`DecisionTracker::record_outcome`].
#[derive(Debug, Clone)]
pub struct OutcomeSignal {
    /// Producer-supplied id; redelivering the same `(trace_id, outcome_id)`
    /// pair is a no-op. `None` mints a fresh id.
    pub outcome_id: Option<OutcomeId>,
    pub signal_type: SignalType,
    pub quality_score: f64,
    pub confidence: f64,
    pub observed_at: Option<DateTime<Utc>>,
}

/// DecisionTracker interface
#[async_trait]
pub trait DecisionTracker: Send + Sync {
    /// Record the retrieved context of a decision-to-be. Fails with
    /// `EmptyContext` before anything is appended when `memory_ids` is
    /// empty; a failed call never creates a trace.
    async fn record_context(
        &self,
        user_id: UserId,
        session_id: SessionId,
        memory_ids: Vec<MemoryId>,
        retrieval_scores: Vec<f64>,
        edge_ids: Vec<EdgeId>,
    ) -> Result<TraceId, EventLogError>;

    async fn record_decision(
        &self,
        user_id: UserId,
        trace_id: TraceId,
        summary: String,
        confidence: f64,
        alternatives: Vec<String>,
    ) -> Result<(), EventLogError>;

    /// Append one outcome for a trace. Idempotent per
    /// `(trace_id, outcome_id)`; does not itself change memory salience.
    async fn record_outcome(
        &self,
        user_id: UserId,
        trace_id: TraceId,
        signal: OutcomeSignal,
    ) -> Result<OutcomeId, EventLogError>;
}

/// Standard implementation appending through the event log.
pub struct StandardDecisionTracker {
    log: Arc<EventLog>,
}

impl StandardDecisionTracker {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl DecisionTracker for StandardDecisionTracker {
    async fn record_context(
        &self,
        user_id: UserId,
        session_id: SessionId,
        memory_ids: Vec<MemoryId>,
        retrieval_scores: Vec<f64>,
        edge_ids: Vec<EdgeId>,
    ) -> Result<TraceId, EventLogError> {
        let trace_id = TraceId::new();
        let payload = EventPayload::ContextRetrieved {
            trace_id,
            session_id,
            memory_ids,
            retrieval_scores,
            edge_ids,
        };
        // Validation (including EmptyContext) happens inside append, before
        // anything is written.
        self.log
            .append(EventDraft::new(user_id, payload).correlated(CorrelationId(trace_id.0)))
            .await?;
        debug!(trace_id = %trace_id.0, "Recorded decision context");
        Ok(trace_id)
    }

    async fn record_decision(
        &self,
        user_id: UserId,
        trace_id: TraceId,
        summary: String,
        confidence: f64,
        alternatives: Vec<String>,
    ) -> Result<(), EventLogError> {
        let payload = EventPayload::DecisionMade {
            trace_id,
            decision_summary: summary,
            confidence,
            alternatives_considered: alternatives,
        };
        self.log
            .append(EventDraft::new(user_id, payload).correlated(CorrelationId(trace_id.0)))
            .await?;
        Ok(())
    }

    async fn record_outcome(
        &self,
        user_id: UserId,
        trace_id: TraceId,
        signal: OutcomeSignal,
    ) -> Result<OutcomeId, EventLogError> {
        let outcome_id = signal.outcome_id.unwrap_or_default();
        let payload = EventPayload::OutcomeObserved {
            outcome_id,
            trace_id,
            signal_type: signal.signal_type,
            quality_score: signal.quality_score,
            confidence: signal.confidence,
        };
        let draft = EventDraft::new(user_id, payload)
            .occurred_at(signal.observed_at.unwrap_or_else(Utc::now))
            .correlated(CorrelationId(trace_id.0))
            .idempotency_key(format!("outcome:{}:{}", trace_id.0, outcome_id.0));
        self.log.append(draft).await?;
        Ok(outcome_id)
    }
}

/// Builds the DecisionTrace/Outcome read model.
pub struct DecisionProjector {
    decisions: Arc<dyn DecisionRepository>,
    applied: RwLock<HashSet<EventId>>,
}

impl DecisionProjector {
    pub fn new(decisions: Arc<dyn DecisionRepository>) -> Self {
        Self {
            decisions,
            applied: RwLock::new(HashSet::new()),
        }
    }

    async fn load(
        &self,
        user_id: UserId,
        trace_id: TraceId,
    ) -> Result<DecisionTrace, ProjectionError> {
        self.decisions
            .find_trace(user_id, trace_id)
            .await?
            .ok_or_else(|| {
                ProjectionError::Retryable(format!("trace {:?} not yet projected", trace_id))
            })
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        let envelope = &event.envelope;
        let user_id = envelope.user_id;
        let occurred_at = envelope.occurred_at;

        match &envelope.payload {
            EventPayload::ContextRetrieved {
                trace_id,
                session_id,
                memory_ids,
                retrieval_scores,
                edge_ids,
            } => {
                if self.decisions.find_trace(user_id, *trace_id).await?.is_some() {
                    debug!(trace_id = %trace_id.0, "Trace already projected");
                    return Ok(());
                }
                let trace = DecisionTrace::new(
                    *trace_id,
                    user_id,
                    *session_id,
                    memory_ids.clone(),
                    retrieval_scores.clone(),
                    edge_ids.clone(),
                    occurred_at,
                );
                self.decisions.save_trace(&trace).await?;
            }

            EventPayload::DecisionMade {
                trace_id,
                decision_summary,
                confidence,
                alternatives_considered,
            } => {
                let mut trace = self.load(user_id, *trace_id).await?;
                trace.record_decision(
                    decision_summary.clone(),
                    *confidence,
                    alternatives_considered.clone(),
                    occurred_at,
                );
                self.decisions.save_trace(&trace).await?;
            }

            EventPayload::OutcomeObserved {
                outcome_id,
                trace_id,
                signal_type,
                quality_score,
                confidence,
            } => {
                let mut trace = self.load(user_id, *trace_id).await?;
                let latency_ms = trace
                    .decided_at
                    .map(|decided| (occurred_at - decided).num_milliseconds().max(0))
                    .unwrap_or(0);
                let outcome = Outcome {
                    outcome_id: *outcome_id,
                    trace_id: *trace_id,
                    signal_type: *signal_type,
                    quality_score: *quality_score,
                    confidence: *confidence,
                    observed_at: occurred_at,
                    latency_from_decision_ms: latency_ms,
                };
                self.decisions.save_outcome(&outcome).await?;
                trace.observe_outcome();
                self.decisions.save_trace(&trace).await?;
            }

            EventPayload::AttributionComputed {
                trace_id,
                outcome_quality,
                memory_attribution,
                edge_attribution,
                ..
            } => {
                let mut trace = self.load(user_id, *trace_id).await?;
                if trace.attribution_computed_at.is_some() {
                    debug!(trace_id = %trace_id.0, "Attribution already projected");
                    return Ok(());
                }
                trace
                    .apply_attribution(
                        *outcome_quality,
                        memory_attribution.clone(),
                        edge_attribution.clone(),
                        occurred_at,
                    )
                    .map_err(|e| ProjectionError::Fatal(e.to_string()))?;
                self.decisions.save_trace(&trace).await?;
            }

            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Projector for DecisionProjector {
    fn name(&self) -> &'static str {
        "decision-projector"
    }

    async fn apply(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        if self.applied.read().await.contains(&event.envelope.event_id) {
            debug!(position = event.position, "Event already applied, skipping");
            return Ok(());
        }
        self.handle(event).await?;
        self.applied.write().await.insert(event.envelope.event_id);
        Ok(())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        self.decisions.clear().await?;
        self.applied.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::upcaster::UpcasterRegistry;
    use crate::domain::event::ValidationError;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::repositories::InMemoryDecisionRepository;

    fn tracker() -> (StandardDecisionTracker, Arc<EventLog>) {
        let log = Arc::new(EventLog::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(UpcasterRegistry::with_current_schemas()),
            EventBus::with_default_capacity(),
        ));
        (StandardDecisionTracker::new(log.clone()), log)
    }

    fn signal(quality: f64) -> OutcomeSignal {
        OutcomeSignal {
            outcome_id: None,
            signal_type: SignalType::TaskCompleted,
            quality_score: quality,
            confidence: 0.9,
            observed_at: None,
        }
    }

    #[tokio::test]
    async fn test_empty_context_never_creates_a_trace() {
        let (tracker, log) = tracker();
        let err = tracker
            .record_context(UserId::new(), SessionId::new(), vec![], vec![], vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventLogError::Validation(ValidationError::EmptyContext)
        ));
        assert_eq!(log.latest_position().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_outcome_rejected_before_append() {
        let (tracker, log) = tracker();
        let user_id = UserId::new();
        let trace_id = tracker
            .record_context(
                user_id,
                SessionId::new(),
                vec![MemoryId::new()],
                vec![1.0],
                vec![],
            )
            .await
            .unwrap();

        let err = tracker
            .record_outcome(user_id, trace_id, signal(1.3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EventLogError::Validation(ValidationError::ScoreOutOfRange { .. })
        ));
        assert_eq!(log.latest_position().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_trace_events_share_a_correlation_chain() {
        let (tracker, log) = tracker();
        let user_id = UserId::new();
        let trace_id = tracker
            .record_context(
                user_id,
                SessionId::new(),
                vec![MemoryId::new()],
                vec![1.0],
                vec![],
            )
            .await
            .unwrap();
        tracker
            .record_decision(user_id, trace_id, "pick A".to_string(), 0.7, vec![])
            .await
            .unwrap();
        tracker
            .record_outcome(user_id, trace_id, signal(1.0))
            .await
            .unwrap();

        let chain = log
            .iterate_by_correlation(CorrelationId(trace_id.0))
            .await
            .unwrap();
        assert_eq!(chain.len(), 3);
    }

    #[tokio::test]
    async fn test_outcome_is_idempotent_per_outcome_id() {
        let (tracker, log) = tracker();
        let user_id = UserId::new();
        let trace_id = tracker
            .record_context(
                user_id,
                SessionId::new(),
                vec![MemoryId::new()],
                vec![1.0],
                vec![],
            )
            .await
            .unwrap();

        let outcome_id = OutcomeId::new();
        let mut repeated = signal(0.5);
        repeated.outcome_id = Some(outcome_id);
        tracker
            .record_outcome(user_id, trace_id, repeated.clone())
            .await
            .unwrap();
        tracker
            .record_outcome(user_id, trace_id, repeated)
            .await
            .unwrap();

        // Context + exactly one outcome event.
        assert_eq!(log.latest_position().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_projector_builds_trace_lifecycle() {
        let (tracker, log) = tracker();
        let decisions = Arc::new(InMemoryDecisionRepository::new());
        let projector = DecisionProjector::new(decisions.clone());
        let user_id = UserId::new();
        let memory_id = MemoryId::new();

        let trace_id = tracker
            .record_context(user_id, SessionId::new(), vec![memory_id], vec![1.0], vec![])
            .await
            .unwrap();
        tracker
            .record_decision(user_id, trace_id, "pick A".to_string(), 0.7, vec![])
            .await
            .unwrap();
        tracker
            .record_outcome(user_id, trace_id, signal(1.0))
            .await
            .unwrap();

        for event in log.store().read_range(0, None, 100).await.unwrap() {
            projector.apply(&event).await.unwrap();
        }

        let trace = decisions.find_trace(user_id, trace_id).await.unwrap().unwrap();
        assert_eq!(trace.context_memory_ids, vec![memory_id]);
        assert_eq!(trace.decision_summary.as_deref(), Some("pick A"));
        assert!(trace.outcome_observed);
        assert!(trace.needs_attribution());
        assert_eq!(
            decisions
                .outcomes_for_trace(user_id, trace_id)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
