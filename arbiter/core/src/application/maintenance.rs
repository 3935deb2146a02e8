// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Maintenance runner — the engine's background metabolism.
//!
//! One interval loop runs per-user batches of decay evaluation, promotion
//! evaluation, merge detection, causal pruning, and cycle detection. Results
//! are recorded as events (never applied directly to read models), so the
//! engine's own upkeep is auditable and replays deterministically: a
//! `MemoryDecayed` event carries the computed previous/new salience, and the
//! projector applies those values verbatim regardless of wall-clock.
//!
//! Users are processed sequentially within a cycle, so no two maintenance
//! passes ever touch the same user concurrently.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::causal_graph::CausalGraph;
use crate::application::event_log::{EventDraft, EventLog};
use crate::domain::event::{EventPayload, UserId};
use crate::domain::memory::{Memory, MemoryId};
use crate::domain::repository::MemoryRepository;
use crate::infrastructure::embedding::cosine_similarity;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Minimum decisions a memory must have informed at its current level.
    pub min_decisions: u64,

    /// Minimum `positive_outcomes / decision_count`.
    pub min_success_rate: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            min_decisions: 5,
            min_success_rate: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Cosine similarity above which two memories are near-duplicates.
    pub similarity_threshold: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// How often to run a maintenance cycle (in seconds).
    pub interval_seconds: u64,

    /// Whether maintenance is enabled.
    pub enabled: bool,

    pub promotion: PromotionConfig,
    pub merge: MergeConfig,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            enabled: true,
            promotion: PromotionConfig::default(),
            merge: MergeConfig::default(),
        }
    }
}

/// What one maintenance cycle did.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaintenanceReport {
    pub decayed: usize,
    pub promoted: usize,
    pub merged: usize,
    pub pruned_edges: usize,
    pub cycles_flagged: usize,
}

pub struct MaintenanceRunner {
    log: Arc<EventLog>,
    memories: Arc<dyn MemoryRepository>,
    graph: Arc<CausalGraph>,
    config: MaintenanceConfig,
    shutdown_token: CancellationToken,
}

impl MaintenanceRunner {
    pub fn new(
        log: Arc<EventLog>,
        memories: Arc<dyn MemoryRepository>,
        graph: Arc<CausalGraph>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            log,
            memories,
            graph,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the maintenance background task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("Maintenance runner is disabled");
            return;
        }
        info!(
            interval_seconds = self.config.interval_seconds,
            "Starting maintenance runner"
        );
        let mut tick = interval(Duration::from_secs(self.config.interval_seconds));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => info!(
                            decayed = report.decayed,
                            promoted = report.promoted,
                            merged = report.merged,
                            pruned_edges = report.pruned_edges,
                            cycles_flagged = report.cycles_flagged,
                            "Maintenance cycle completed"
                        ),
                        Err(e) => warn!("Maintenance cycle failed: {}", e),
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping maintenance runner");
                    break;
                }
            }
        }
    }

    /// One full cycle over every known user. Per-user failures are isolated.
    pub async fn run_cycle(&self) -> anyhow::Result<MaintenanceReport> {
        let mut report = MaintenanceReport::default();
        for user_id in self.memories.user_ids().await? {
            match self.run_user_cycle(user_id).await {
                Ok(user_report) => {
                    report.decayed += user_report.decayed;
                    report.promoted += user_report.promoted;
                    report.merged += user_report.merged;
                    report.pruned_edges += user_report.pruned_edges;
                    report.cycles_flagged += user_report.cycles_flagged;
                }
                Err(e) => warn!(user_id = %user_id.0, "User maintenance failed: {}", e),
            }
        }
        Ok(report)
    }

    async fn run_user_cycle(&self, user_id: UserId) -> anyhow::Result<MaintenanceReport> {
        let now = Utc::now();
        let mut report = MaintenanceReport::default();
        let memories = self.memories.list_for_user(user_id).await?;
        let active: Vec<&Memory> = memories.iter().filter(|m| m.is_active()).collect();

        // Decay pass: evaluate idle spans and record results as events.
        for memory in &active {
            if let Some(candidate) = memory.decay_candidate(now) {
                self.log
                    .append(EventDraft::new(
                        user_id,
                        EventPayload::MemoryDecayed {
                            memory_id: memory.memory_id,
                            previous_salience: candidate.previous_salience,
                            new_salience: candidate.new_salience,
                            idle_days: candidate.idle_days,
                        },
                    ))
                    .await?;
                report.decayed += 1;
            }
        }

        // Promotion pass: one level at a time, window and counters checked
        // against the read model.
        for memory in &active {
            if memory.promotion_eligible(
                now,
                self.config.promotion.min_decisions,
                self.config.promotion.min_success_rate,
            ) {
                let Some(to_level) = memory.temporal_level.next() else {
                    continue;
                };
                debug!(
                    memory_id = %memory.memory_id.0,
                    from = ?memory.temporal_level,
                    to = ?to_level,
                    "Promoting memory"
                );
                self.log
                    .append(EventDraft::new(
                        user_id,
                        EventPayload::MemoryPromoted {
                            memory_id: memory.memory_id,
                            from_level: memory.temporal_level,
                            to_level,
                            decision_count: memory.decision_count,
                            positive_outcomes: memory.positive_outcomes,
                        },
                    ))
                    .await?;
                report.promoted += 1;
            }
        }

        report.merged = self.merge_pass(user_id, &active).await?;
        report.pruned_edges = self.graph.prune(user_id).await?;
        report.cycles_flagged = self.graph.detect_cycles(user_id).await?.len();
        Ok(report)
    }

    /// Find near-duplicate pairs (identical content hash, or embedding
    /// cosine above the threshold) and merge each pair into the
    /// higher-salience survivor. At most one merge per memory per cycle.
    async fn merge_pass(&self, user_id: UserId, active: &[&Memory]) -> anyhow::Result<usize> {
        let mut merged = 0;
        let mut involved: HashSet<MemoryId> = HashSet::new();

        for (i, a) in active.iter().enumerate() {
            for b in active.iter().skip(i + 1) {
                if involved.contains(&a.memory_id) || involved.contains(&b.memory_id) {
                    continue;
                }
                let similarity = if a.content.content_hash == b.content.content_hash {
                    1.0
                } else {
                    match (&a.embedding, &b.embedding) {
                        (Some(ea), Some(eb)) => cosine_similarity(ea, eb),
                        _ => continue,
                    }
                };
                if similarity < self.config.merge.similarity_threshold {
                    continue;
                }

                let (survivor, absorbed) = if a.effective_salience() >= b.effective_salience() {
                    (a, b)
                } else {
                    (b, a)
                };
                debug!(
                    survivor = %survivor.memory_id.0,
                    absorbed = %absorbed.memory_id.0,
                    similarity,
                    "Merging near-duplicate memories"
                );
                self.log
                    .append(EventDraft::new(
                        user_id,
                        EventPayload::MemoryMerged {
                            survivor_id: survivor.memory_id,
                            absorbed_id: absorbed.memory_id,
                            similarity,
                            merged_retrieval_count: survivor.retrieval_count
                                + absorbed.retrieval_count,
                            merged_decision_count: survivor.decision_count
                                + absorbed.decision_count,
                        },
                    ))
                    .await?;
                involved.insert(survivor.memory_id);
                involved.insert(absorbed.memory_id);
                merged += 1;
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::causal_graph::CausalGraphConfig;
    use crate::application::upcaster::UpcasterRegistry;
    use crate::domain::memory::{ContentType, MemoryContent, TemporalLevel};
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::repositories::{
        InMemoryCausalEdgeRepository, InMemoryMemoryRepository,
    };
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        runner: MaintenanceRunner,
        log: Arc<EventLog>,
        memories: Arc<InMemoryMemoryRepository>,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(EventLog::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(UpcasterRegistry::with_current_schemas()),
            EventBus::with_default_capacity(),
        ));
        let memories = Arc::new(InMemoryMemoryRepository::new());
        let graph = Arc::new(CausalGraph::new(
            log.clone(),
            Arc::new(InMemoryCausalEdgeRepository::new()),
            CausalGraphConfig::default(),
        ));
        Fixture {
            runner: MaintenanceRunner::new(
                log.clone(),
                memories.clone(),
                graph,
                MaintenanceConfig::default(),
            ),
            log,
            memories,
        }
    }

    fn memory(user_id: UserId, blob: &[u8], base: f64, days_old: i64) -> Memory {
        Memory::new(
            MemoryId::new(),
            user_id,
            MemoryContent::new(blob.to_vec()),
            ContentType::Fact,
            TemporalLevel::Immediate,
            base,
            Utc::now() - ChronoDuration::days(days_old),
        )
    }

    async fn decay_events(fixture: &Fixture) -> Vec<(f64, f64, i64)> {
        fixture
            .log
            .store()
            .read_range(0, None, 1000)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|e| match e.envelope.payload {
                EventPayload::MemoryDecayed {
                    previous_salience,
                    new_salience,
                    idle_days,
                    ..
                } => Some((previous_salience, new_salience, idle_days)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_decay_pass_floors_long_idle_memory() {
        let fixture = fixture();
        let user_id = UserId::new();
        fixture
            .memories
            .save(&memory(user_id, b"idle", 0.6, 14))
            .await
            .unwrap();

        let report = fixture.runner.run_cycle().await.unwrap();
        assert_eq!(report.decayed, 1);

        let events = decay_events(&fixture).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, 0.6);
        assert_eq!(events[0].1, crate::domain::memory::SALIENCE_FLOOR);
        assert_eq!(events[0].2, 14);
    }

    #[tokio::test]
    async fn test_promotion_pass_emits_single_step() {
        let fixture = fixture();
        let user_id = UserId::new();
        let mut m = memory(user_id, b"proved", 0.6, 20);
        for _ in 0..5 {
            m.record_decision(Utc::now());
        }
        for _ in 0..4 {
            m.record_outcome(1.0);
        }
        m.record_outcome(-1.0);
        // Keep the decay pass out of the picture.
        m.last_used = Utc::now();
        fixture.memories.save(&m).await.unwrap();

        let report = fixture.runner.run_cycle().await.unwrap();
        assert_eq!(report.promoted, 1);

        let promoted = fixture
            .log
            .store()
            .read_range(0, None, 100)
            .await
            .unwrap()
            .into_iter()
            .find_map(|e| match e.envelope.payload {
                EventPayload::MemoryPromoted {
                    from_level,
                    to_level,
                    ..
                } => Some((from_level, to_level)),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            promoted,
            (TemporalLevel::Immediate, TemporalLevel::Situational)
        );
    }

    #[tokio::test]
    async fn test_merge_pass_picks_higher_salience_survivor() {
        let fixture = fixture();
        let user_id = UserId::new();
        let strong = memory(user_id, b"duplicate", 0.8, 0);
        let weak = memory(user_id, b"duplicate", 0.4, 0);
        fixture.memories.save(&strong).await.unwrap();
        fixture.memories.save(&weak).await.unwrap();

        let report = fixture.runner.run_cycle().await.unwrap();
        assert_eq!(report.merged, 1);

        let merged = fixture
            .log
            .store()
            .read_range(0, None, 100)
            .await
            .unwrap()
            .into_iter()
            .find_map(|e| match e.envelope.payload {
                EventPayload::MemoryMerged {
                    survivor_id,
                    absorbed_id,
                    similarity,
                    ..
                } => Some((survivor_id, absorbed_id, similarity)),
                _ => None,
            })
            .unwrap();
        assert_eq!(merged.0, strong.memory_id);
        assert_eq!(merged.1, weak.memory_id);
        assert_eq!(merged.2, 1.0);
    }

    #[tokio::test]
    async fn test_fresh_memory_triggers_no_events() {
        let fixture = fixture();
        let user_id = UserId::new();
        fixture
            .memories
            .save(&memory(user_id, b"fresh", 0.6, 0))
            .await
            .unwrap();

        let report = fixture.runner.run_cycle().await.unwrap();
        assert_eq!(report.decayed, 0);
        assert_eq!(report.promoted, 0);
        assert_eq!(report.merged, 0);
        assert_eq!(fixture.log.latest_position().await.unwrap(), 0);
    }
}
