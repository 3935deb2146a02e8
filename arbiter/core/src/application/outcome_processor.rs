// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # OutcomeProcessor — attribution of observed outcomes
//!
//! Runs in batches off the write path: finds traces whose outcome has been
//! observed but not attributed, distributes credit/blame proportionally to
//! each context memory's retrieval score
//! (`delta_i = quality * score_i / Σscore * attribution_rate`), and emits
//! one audited `SalienceAdjusted` event per memory. Causal edges referenced
//! by the decision get the same proportional treatment as
//! `CausalStrengthUpdated` events. A closing `AttributionComputed` event
//! stamps the trace, which is the natural uniqueness check that makes
//! re-processing a no-op under redelivery.
//!
//! The processor only ever *emits* events; the projectors move the read
//! models. New adjustments are clamped into range and the delta recomputed
//! from the clamp so the audit arithmetic always holds — a computed row that
//! still violates it is logged and the trace is left unattributed for
//! manual review, never silently corrected.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::event_log::{EventDraft, EventLog};
use crate::domain::causal::EdgeId;
use crate::domain::decision::{DecisionTrace, Outcome};
use crate::domain::event::{CorrelationId, EventPayload};
use crate::domain::memory::MemoryId;
use crate::domain::repository::{CausalEdgeRepository, DecisionRepository, MemoryRepository};
use crate::domain::salience::AdjustmentReason;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Fraction of the outcome signal distributed per attribution pass.
    pub attribution_rate: f64,

    /// Traces picked up per batch.
    pub batch_size: usize,

    /// How often the background loop runs (in seconds).
    pub interval_seconds: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            attribution_rate: 0.2,
            batch_size: 32,
            interval_seconds: 30,
        }
    }
}

pub struct OutcomeProcessor {
    log: Arc<EventLog>,
    decisions: Arc<dyn DecisionRepository>,
    memories: Arc<dyn MemoryRepository>,
    edges: Arc<dyn CausalEdgeRepository>,
    config: AttributionConfig,
    shutdown_token: CancellationToken,
}

impl OutcomeProcessor {
    pub fn new(
        log: Arc<EventLog>,
        decisions: Arc<dyn DecisionRepository>,
        memories: Arc<dyn MemoryRepository>,
        edges: Arc<dyn CausalEdgeRepository>,
        config: AttributionConfig,
    ) -> Self {
        Self {
            log,
            decisions,
            memories,
            edges,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the background attribution loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            interval_seconds = self.config.interval_seconds,
            attribution_rate = self.config.attribution_rate,
            "Starting outcome processor"
        );
        let mut tick = interval(Duration::from_secs(self.config.interval_seconds));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.process_pending().await {
                        Ok(attributed) if attributed > 0 => {
                            info!(attributed, "Attribution batch completed");
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Attribution batch failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping outcome processor");
                    break;
                }
            }
        }
    }

    /// Attribute every pending trace in one batch. Per-trace failures are
    /// isolated: a trace that cannot be attributed yet stays pending and is
    /// retried next cycle.
    pub async fn process_pending(&self) -> anyhow::Result<usize> {
        let pending = self.decisions.unattributed_traces(self.config.batch_size).await?;
        let mut attributed = 0;
        // Adjustments emitted earlier in this batch are not yet projected;
        // chain from the pending values so the audit rows stay consistent.
        let mut pending_adjustments: HashMap<MemoryId, f64> = HashMap::new();
        let mut pending_strengths: HashMap<EdgeId, f64> = HashMap::new();

        for trace in pending {
            match self
                .attribute(&trace, &mut pending_adjustments, &mut pending_strengths)
                .await
            {
                Ok(true) => attributed += 1,
                Ok(false) => {}
                Err(e) => warn!(trace_id = %trace.trace_id.0, "Attribution skipped: {}", e),
            }
        }
        Ok(attributed)
    }

    /// Aggregate outcome quality: confidence-weighted mean of every outcome
    /// attached to the trace.
    fn aggregate_quality(outcomes: &[Outcome]) -> f64 {
        let weight: f64 = outcomes.iter().map(|o| o.confidence).sum();
        if weight > 0.0 {
            outcomes
                .iter()
                .map(|o| o.quality_score * o.confidence)
                .sum::<f64>()
                / weight
        } else {
            outcomes.iter().map(|o| o.quality_score).sum::<f64>() / outcomes.len() as f64
        }
    }

    async fn attribute(
        &self,
        trace: &DecisionTrace,
        pending_adjustments: &mut HashMap<MemoryId, f64>,
        pending_strengths: &mut HashMap<EdgeId, f64>,
    ) -> anyhow::Result<bool> {
        // Natural uniqueness check: a trace is attributed exactly once.
        if !trace.needs_attribution() {
            return Ok(false);
        }
        let outcomes = self
            .decisions
            .outcomes_for_trace(trace.user_id, trace.trace_id)
            .await?;
        if outcomes.is_empty() {
            debug!(trace_id = %trace.trace_id.0, "Outcome rows not yet projected");
            return Ok(false);
        }
        let quality = Self::aggregate_quality(&outcomes);
        let source_outcome_id = match outcomes.as_slice() {
            [only] => Some(only.outcome_id),
            _ => None,
        };

        let score_sum: f64 = trace.retrieval_scores.iter().sum();
        let correlation = CorrelationId(trace.trace_id.0);
        let mut memory_attribution: BTreeMap<MemoryId, f64> = BTreeMap::new();
        let mut memory_events = Vec::new();

        for (index, memory_id) in trace.context_memory_ids.iter().enumerate() {
            let Some(memory) = self.memories.find_by_id(trace.user_id, *memory_id).await? else {
                debug!(memory_id = %memory_id.0, "Context memory not yet projected");
                return Ok(false);
            };
            // Zero score mass: split credit uniformly.
            let share = if score_sum > 0.0 {
                trace.retrieval_scores[index] / score_sum
            } else {
                1.0 / trace.context_memory_ids.len() as f64
            };
            let previous = *pending_adjustments
                .get(memory_id)
                .unwrap_or(&memory.outcome_adjustment);
            let new = (previous + quality * share * self.config.attribution_rate)
                .clamp(-1.0, 1.0);
            let delta = new - previous;

            if (previous + delta - new).abs() > crate::domain::event::AUDIT_EPSILON {
                error!(
                    trace_id = %trace.trace_id.0,
                    memory_id = %memory_id.0,
                    previous,
                    delta,
                    new,
                    "Computed adjustment violates audit arithmetic; trace left unattributed"
                );
                return Ok(false);
            }

            memory_attribution.insert(*memory_id, delta);
            memory_events.push((
                *memory_id,
                EventPayload::SalienceAdjusted {
                    memory_id: *memory_id,
                    adjustment_delta: delta,
                    previous_adjustment: previous,
                    new_adjustment: new,
                    reason: AdjustmentReason::OutcomeAttribution,
                    source_trace_id: Some(trace.trace_id),
                    source_outcome_id,
                },
                new,
            ));
        }

        // Same proportional scheme for the causal edges the decision
        // consulted; edges carry no retrieval score, so credit is uniform.
        let mut edge_attribution: BTreeMap<EdgeId, f64> = BTreeMap::new();
        let mut edge_events = Vec::new();
        let active_edges: Vec<_> = {
            let mut edges = Vec::new();
            for edge_id in &trace.context_edge_ids {
                let Some(edge) = self.edges.find_by_id(trace.user_id, *edge_id).await? else {
                    debug!(edge_id = %edge_id.0, "Context edge not yet projected");
                    return Ok(false);
                };
                if edge.is_active() {
                    edges.push(edge);
                }
            }
            edges
        };
        for edge in &active_edges {
            let share = 1.0 / active_edges.len() as f64;
            let previous = *pending_strengths.get(&edge.edge_id).unwrap_or(&edge.strength);
            let new = (previous + quality * share * self.config.attribution_rate).clamp(0.0, 1.0);
            let delta = new - previous;
            edge_attribution.insert(edge.edge_id, delta);
            edge_events.push((
                edge.edge_id,
                EventPayload::CausalStrengthUpdated {
                    edge_id: edge.edge_id,
                    strength_delta: delta,
                    previous_strength: previous,
                    new_strength: new,
                    reason: "outcome_attribution".to_string(),
                    source_trace_id: Some(trace.trace_id),
                },
                new,
            ));
        }

        // All inputs resolved; emit the whole attribution as events. The
        // idempotency keys make a re-run that raced the projector a no-op
        // at the log instead of a duplicate audit row.
        for (memory_id, payload, new) in memory_events {
            self.log
                .append(
                    EventDraft::new(trace.user_id, payload)
                        .correlated(correlation)
                        .idempotency_key(format!(
                            "adjustment:{}:{}",
                            trace.trace_id.0, memory_id.0
                        )),
                )
                .await?;
            pending_adjustments.insert(memory_id, new);
        }
        for (edge_id, payload, new) in edge_events {
            self.log
                .append(
                    EventDraft::new(trace.user_id, payload)
                        .correlated(correlation)
                        .idempotency_key(format!("strength:{}:{}", trace.trace_id.0, edge_id.0)),
                )
                .await?;
            pending_strengths.insert(edge_id, new);
        }
        self.log
            .append(
                EventDraft::new(
                    trace.user_id,
                    EventPayload::AttributionComputed {
                        trace_id: trace.trace_id,
                        outcome_quality: quality,
                        attribution_rate: self.config.attribution_rate,
                        memory_attribution,
                        edge_attribution,
                    },
                )
                .correlated(correlation)
                .idempotency_key(format!("attribution:{}", trace.trace_id.0)),
            )
            .await?;

        debug!(trace_id = %trace.trace_id.0, quality, "Attribution computed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::upcaster::UpcasterRegistry;
    use crate::domain::decision::{OutcomeId, SessionId, SignalType, TraceId};
    use crate::domain::event::UserId;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::repositories::{
        InMemoryCausalEdgeRepository, InMemoryDecisionRepository, InMemoryMemoryRepository,
    };

    struct Fixture {
        processor: OutcomeProcessor,
        log: Arc<EventLog>,
        decisions: Arc<InMemoryDecisionRepository>,
        memories: Arc<InMemoryMemoryRepository>,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(EventLog::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(UpcasterRegistry::with_current_schemas()),
            EventBus::with_default_capacity(),
        ));
        let decisions = Arc::new(InMemoryDecisionRepository::new());
        let memories = Arc::new(InMemoryMemoryRepository::new());
        let edges = Arc::new(InMemoryCausalEdgeRepository::new());
        Fixture {
            processor: OutcomeProcessor::new(
                log.clone(),
                decisions.clone(),
                memories.clone(),
                edges,
                AttributionConfig::default(),
            ),
            log,
            decisions,
            memories,
        }
    }

    async fn seed_trace(fixture: &Fixture, quality: f64) -> (UserId, TraceId, MemoryId) {
        use crate::domain::memory::{ContentType, Memory, MemoryContent, TemporalLevel};

        let user_id = UserId::new();
        let memory_id = MemoryId::new();
        let trace_id = TraceId::new();

        let memory = Memory::new(
            memory_id,
            user_id,
            MemoryContent::new(b"blob".to_vec()),
            ContentType::Preference,
            TemporalLevel::Immediate,
            0.6,
            Utc::now(),
        );
        fixture.memories.save(&memory).await.unwrap();

        let mut trace = DecisionTrace::new(
            trace_id,
            user_id,
            SessionId::new(),
            vec![memory_id],
            vec![1.0],
            vec![],
            Utc::now(),
        );
        trace.observe_outcome();
        fixture.decisions.save_trace(&trace).await.unwrap();
        fixture
            .decisions
            .save_outcome(&Outcome {
                outcome_id: OutcomeId::new(),
                trace_id,
                signal_type: SignalType::TaskCompleted,
                quality_score: quality,
                confidence: 1.0,
                observed_at: Utc::now(),
                latency_from_decision_ms: 5,
            })
            .await
            .unwrap();

        (user_id, trace_id, memory_id)
    }

    #[tokio::test]
    async fn test_full_positive_outcome_yields_rate_sized_delta() {
        let fixture = fixture();
        let (_, trace_id, memory_id) = seed_trace(&fixture, 1.0).await;

        assert_eq!(fixture.processor.process_pending().await.unwrap(), 1);

        let events = fixture.log.store().read_range(0, None, 100).await.unwrap();
        let adjustment = events
            .iter()
            .find_map(|e| match &e.envelope.payload {
                EventPayload::SalienceAdjusted {
                    memory_id: m,
                    adjustment_delta,
                    previous_adjustment,
                    new_adjustment,
                    ..
                } if *m == memory_id => {
                    Some((*adjustment_delta, *previous_adjustment, *new_adjustment))
                }
                _ => None,
            })
            .expect("salience adjustment emitted");
        assert!((adjustment.0 - 0.2).abs() < 1e-9);
        assert_eq!(adjustment.1, 0.0);
        assert!((adjustment.2 - 0.2).abs() < 1e-9);

        let computed = events.iter().any(|e| {
            matches!(
                &e.envelope.payload,
                EventPayload::AttributionComputed { trace_id: t, .. } if *t == trace_id
            )
        });
        assert!(computed);
    }

    #[tokio::test]
    async fn test_attributed_trace_is_not_reprocessed() {
        let fixture = fixture();
        let (user_id, trace_id, _) = seed_trace(&fixture, 1.0).await;

        assert_eq!(fixture.processor.process_pending().await.unwrap(), 1);

        // Simulate the projector stamping the trace.
        let mut trace = fixture
            .decisions
            .find_trace(user_id, trace_id)
            .await
            .unwrap()
            .unwrap();
        trace
            .apply_attribution(1.0, BTreeMap::new(), BTreeMap::new(), Utc::now())
            .unwrap();
        fixture.decisions.save_trace(&trace).await.unwrap();

        let before = fixture.log.latest_position().await.unwrap();
        assert_eq!(fixture.processor.process_pending().await.unwrap(), 0);
        assert_eq!(fixture.log.latest_position().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_batch_chains_adjustments_for_shared_memory() {
        let fixture = fixture();
        let (user_id, _, memory_id) = seed_trace(&fixture, 1.0).await;

        // Second unattributed trace over the same memory, same batch.
        let trace_id = TraceId::new();
        let mut trace = DecisionTrace::new(
            trace_id,
            user_id,
            SessionId::new(),
            vec![memory_id],
            vec![1.0],
            vec![],
            Utc::now() + chrono::Duration::milliseconds(1),
        );
        trace.observe_outcome();
        fixture.decisions.save_trace(&trace).await.unwrap();
        fixture
            .decisions
            .save_outcome(&Outcome {
                outcome_id: OutcomeId::new(),
                trace_id,
                signal_type: SignalType::TaskCompleted,
                quality_score: 1.0,
                confidence: 1.0,
                observed_at: Utc::now(),
                latency_from_decision_ms: 5,
            })
            .await
            .unwrap();

        assert_eq!(fixture.processor.process_pending().await.unwrap(), 2);

        // Second adjustment chains off the first: 0.0 -> 0.2 -> 0.4.
        let events = fixture.log.store().read_range(0, None, 100).await.unwrap();
        let rows: Vec<(f64, f64)> = events
            .iter()
            .filter_map(|e| match &e.envelope.payload {
                EventPayload::SalienceAdjusted {
                    previous_adjustment,
                    new_adjustment,
                    ..
                } => Some((*previous_adjustment, *new_adjustment)),
                _ => None,
            })
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], (0.0, 0.2));
        assert!((rows[1].0 - 0.2).abs() < 1e-9);
        assert!((rows[1].1 - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_trace_without_outcome_rows_waits() {
        let fixture = fixture();
        let (user_id, trace_id, memory_id) = seed_trace(&fixture, 1.0).await;

        // Replace with a trace flagged observed but whose outcome row has
        // not been projected yet.
        fixture.decisions.clear().await.unwrap();
        let mut trace = DecisionTrace::new(
            trace_id,
            user_id,
            SessionId::new(),
            vec![memory_id],
            vec![1.0],
            vec![],
            Utc::now(),
        );
        trace.observe_outcome();
        fixture.decisions.save_trace(&trace).await.unwrap();

        assert_eq!(fixture.processor.process_pending().await.unwrap(), 0);
        assert_eq!(fixture.log.latest_position().await.unwrap(), 0);
    }
}
