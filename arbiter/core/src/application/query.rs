// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Read-side query surface.
//!
//! Queries return the latest consistent projection and never surface
//! processing lag as an error; callers that care can ask for the staleness
//! indicator (per-projector checkpoint vs. log head). Every query takes the
//! owning user id, and the repositories key storage by it, so no query can
//! return another user's rows.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::application::causal_graph::{collect_paths, CausalPath};
use crate::domain::event::UserId;
use crate::domain::memory::{Memory, TemporalLevel};
use crate::domain::repository::{
    CausalEdgeRepository, CheckpointRepository, DecisionRepository, EventStore, MemoryRepository,
    RepositoryError,
};

/// Optional filters for [`QueryService::get_memories`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryQuery {
    pub temporal_level: Option<TemporalLevel>,
    pub min_effective_salience: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionSuccessRate {
    pub total: u64,
    pub positive: u64,
    pub negative: u64,
    pub rate: f64,
}

/// How far a projector trails the log head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionStaleness {
    pub projector: String,
    pub checkpoint: u64,
    pub latest_position: u64,
}

impl ProjectionStaleness {
    pub fn lag(&self) -> u64 {
        self.latest_position.saturating_sub(self.checkpoint)
    }
}

pub struct QueryService {
    memories: Arc<dyn MemoryRepository>,
    decisions: Arc<dyn DecisionRepository>,
    edges: Arc<dyn CausalEdgeRepository>,
    checkpoints: Arc<dyn CheckpointRepository>,
    store: Arc<dyn EventStore>,
    projector_names: Vec<String>,
}

impl QueryService {
    pub fn new(
        memories: Arc<dyn MemoryRepository>,
        decisions: Arc<dyn DecisionRepository>,
        edges: Arc<dyn CausalEdgeRepository>,
        checkpoints: Arc<dyn CheckpointRepository>,
        store: Arc<dyn EventStore>,
        projector_names: Vec<String>,
    ) -> Self {
        Self {
            memories,
            decisions,
            edges,
            checkpoints,
            store,
            projector_names,
        }
    }

    /// Active memories ordered by effective salience, strongest first.
    pub async fn get_memories(
        &self,
        user_id: UserId,
        query: MemoryQuery,
    ) -> Result<Vec<Memory>, RepositoryError> {
        let mut memories: Vec<Memory> = self
            .memories
            .list_for_user(user_id)
            .await?
            .into_iter()
            .filter(|m| m.is_active())
            .filter(|m| {
                query
                    .temporal_level
                    .map(|level| m.temporal_level == level)
                    .unwrap_or(true)
            })
            .filter(|m| {
                query
                    .min_effective_salience
                    .map(|min| m.effective_salience() >= min)
                    .unwrap_or(true)
            })
            .collect();
        memories.sort_by(|a, b| {
            b.effective_salience()
                .partial_cmp(&a.effective_salience())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(memories)
    }

    /// Outcome tally over the trailing window: `positive` counts outcomes
    /// with positive quality, `negative` the opposite sign, `total` every
    /// observed outcome (neutral included). The rate is
    /// `positive / (positive + negative)`, 0.0 when nothing is signed.
    pub async fn get_decision_success_rate(
        &self,
        user_id: UserId,
        window_days: i64,
    ) -> Result<DecisionSuccessRate, RepositoryError> {
        let cutoff = Utc::now() - Duration::days(window_days);
        let mut total = 0u64;
        let mut positive = 0u64;
        let mut negative = 0u64;

        for trace in self.decisions.list_traces_for_user(user_id).await? {
            for outcome in self
                .decisions
                .outcomes_for_trace(user_id, trace.trace_id)
                .await?
            {
                if outcome.observed_at < cutoff {
                    continue;
                }
                total += 1;
                if outcome.quality_score > 0.0 {
                    positive += 1;
                } else if outcome.quality_score < 0.0 {
                    negative += 1;
                }
            }
        }

        let signed = positive + negative;
        let rate = if signed > 0 {
            positive as f64 / signed as f64
        } else {
            0.0
        };
        Ok(DecisionSuccessRate {
            total,
            positive,
            negative,
            rate,
        })
    }

    /// Directed paths out of `source_entity` across the user's active graph.
    pub async fn get_causal_paths(
        &self,
        user_id: UserId,
        source_entity: Uuid,
        max_hops: usize,
    ) -> Result<Vec<CausalPath>, RepositoryError> {
        let edges = self.edges.list_active_for_user(user_id).await?;
        Ok(collect_paths(&edges, source_entity, max_hops))
    }

    /// Per-projector lag behind the log head.
    pub async fn staleness(&self) -> Result<Vec<ProjectionStaleness>, RepositoryError> {
        let latest_position = self.store.latest_position().await?;
        let mut report = Vec::with_capacity(self.projector_names.len());
        for name in &self.projector_names {
            report.push(ProjectionStaleness {
                projector: name.clone(),
                checkpoint: self.checkpoints.get(name).await?,
                latest_position,
            });
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::decision::{
        DecisionTrace, Outcome, OutcomeId, SessionId, SignalType, TraceId,
    };
    use crate::domain::memory::{ContentType, MemoryContent, MemoryId};
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::repositories::{
        InMemoryCausalEdgeRepository, InMemoryCheckpointRepository, InMemoryDecisionRepository,
        InMemoryMemoryRepository,
    };

    struct Fixture {
        service: QueryService,
        memories: Arc<InMemoryMemoryRepository>,
        decisions: Arc<InMemoryDecisionRepository>,
    }

    fn fixture() -> Fixture {
        let memories = Arc::new(InMemoryMemoryRepository::new());
        let decisions = Arc::new(InMemoryDecisionRepository::new());
        let edges = Arc::new(InMemoryCausalEdgeRepository::new());
        let checkpoints = Arc::new(InMemoryCheckpointRepository::new());
        let store = Arc::new(InMemoryEventStore::new());
        Fixture {
            service: QueryService::new(
                memories.clone(),
                decisions.clone(),
                edges,
                checkpoints,
                store,
                vec!["memory-projector".to_string()],
            ),
            memories,
            decisions,
        }
    }

    fn memory(user_id: UserId, base: f64, level: TemporalLevel) -> Memory {
        let mut m = Memory::new(
            MemoryId::new(),
            user_id,
            MemoryContent::new(base.to_le_bytes().to_vec()),
            ContentType::Fact,
            TemporalLevel::Immediate,
            base,
            Utc::now(),
        );
        m.temporal_level = level;
        m
    }

    #[tokio::test]
    async fn test_memories_ordered_and_filtered() {
        let fixture = fixture();
        let user_id = UserId::new();
        fixture
            .memories
            .save(&memory(user_id, 0.9, TemporalLevel::Immediate))
            .await
            .unwrap();
        fixture
            .memories
            .save(&memory(user_id, 0.3, TemporalLevel::Immediate))
            .await
            .unwrap();
        fixture
            .memories
            .save(&memory(user_id, 0.7, TemporalLevel::Situational))
            .await
            .unwrap();

        let all = fixture
            .service
            .get_memories(user_id, MemoryQuery::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all
            .windows(2)
            .all(|w| w[0].effective_salience() >= w[1].effective_salience()));

        let strong = fixture
            .service
            .get_memories(
                user_id,
                MemoryQuery {
                    min_effective_salience: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(strong.len(), 2);

        let situational = fixture
            .service
            .get_memories(
                user_id,
                MemoryQuery {
                    temporal_level: Some(TemporalLevel::Situational),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(situational.len(), 1);

        // Another user sees nothing.
        let other = fixture
            .service
            .get_memories(UserId::new(), MemoryQuery::default())
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_success_rate_over_window() {
        let fixture = fixture();
        let user_id = UserId::new();
        let trace_id = TraceId::new();
        fixture
            .decisions
            .save_trace(&DecisionTrace::new(
                trace_id,
                user_id,
                SessionId::new(),
                vec![MemoryId::new()],
                vec![1.0],
                vec![],
                Utc::now(),
            ))
            .await
            .unwrap();

        let qualities = [1.0, 0.5, -0.5, 0.0];
        for quality in qualities {
            fixture
                .decisions
                .save_outcome(&Outcome {
                    outcome_id: OutcomeId::new(),
                    trace_id,
                    signal_type: SignalType::TaskCompleted,
                    quality_score: quality,
                    confidence: 1.0,
                    observed_at: Utc::now(),
                    latency_from_decision_ms: 0,
                })
                .await
                .unwrap();
        }
        // Outside the window.
        fixture
            .decisions
            .save_outcome(&Outcome {
                outcome_id: OutcomeId::new(),
                trace_id,
                signal_type: SignalType::ExplicitNegative,
                quality_score: -1.0,
                confidence: 1.0,
                observed_at: Utc::now() - Duration::days(30),
                latency_from_decision_ms: 0,
            })
            .await
            .unwrap();

        let rate = fixture
            .service
            .get_decision_success_rate(user_id, 7)
            .await
            .unwrap();
        assert_eq!(rate.total, 4);
        assert_eq!(rate.positive, 2);
        assert_eq!(rate.negative, 1);
        assert!((rate.rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_staleness_reports_lag_not_error() {
        let fixture = fixture();
        let staleness = fixture.service.staleness().await.unwrap();
        assert_eq!(staleness.len(), 1);
        assert_eq!(staleness[0].lag(), 0);
    }
}
