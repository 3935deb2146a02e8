// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Memory projector — builds the Memory read model from the log.
//!
//! Handles the memory lifecycle events plus the decision-side events that
//! move usage counters (retrievals, decisions, outcomes) and the audited
//! salience adjustments emitted by attribution. Outcome and decision
//! handlers read the decision-trace read model for the context memory list;
//! that read is allowed to be stale and is retried with backoff while the
//! sibling projector catches up.
//!
//! Idempotency: an applied-event set makes redelivery of the same stored
//! event a no-op, on top of the natural per-handler checks (existing memory
//! id on create, matching `previous_adjustment` on adjust).

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::application::projection::{ProjectionError, Projector};
use crate::domain::event::{EventId, EventPayload, StoredEvent, UserId};
use crate::domain::memory::{Memory, MemoryId};
use crate::domain::repository::{DecisionRepository, MemoryRepository};
use crate::domain::salience::SalienceAdjustment;

pub struct MemoryProjector {
    memories: Arc<dyn MemoryRepository>,
    decisions: Arc<dyn DecisionRepository>,
    applied: RwLock<HashSet<EventId>>,
}

impl MemoryProjector {
    pub fn new(memories: Arc<dyn MemoryRepository>, decisions: Arc<dyn DecisionRepository>) -> Self {
        Self {
            memories,
            decisions,
            applied: RwLock::new(HashSet::new()),
        }
    }

    async fn load(
        &self,
        user_id: UserId,
        memory_id: MemoryId,
    ) -> Result<Memory, ProjectionError> {
        self.memories
            .find_by_id(user_id, memory_id)
            .await?
            .ok_or_else(|| {
                ProjectionError::Retryable(format!(
                    "memory {:?} not yet projected",
                    memory_id
                ))
            })
    }

    async fn context_memories(
        &self,
        user_id: UserId,
        trace_id: crate::domain::decision::TraceId,
    ) -> Result<Vec<MemoryId>, ProjectionError> {
        let trace = self
            .decisions
            .find_trace(user_id, trace_id)
            .await?
            .ok_or_else(|| {
                ProjectionError::Retryable(format!("trace {:?} not yet projected", trace_id))
            })?;
        Ok(trace.context_memory_ids)
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        let envelope = &event.envelope;
        let user_id = envelope.user_id;
        let occurred_at = envelope.occurred_at;

        match &envelope.payload {
            EventPayload::MemoryCreated {
                memory_id,
                content,
                content_type,
                temporal_level,
                base_salience,
                embedding,
            } => {
                if self.memories.find_by_id(user_id, *memory_id).await?.is_some() {
                    debug!(memory_id = %memory_id.0, "Memory already projected");
                    return Ok(());
                }
                if let Some(duplicate) = self
                    .memories
                    .find_by_content_hash(user_id, &content.content_hash)
                    .await?
                {
                    debug!(
                        memory_id = %memory_id.0,
                        duplicate = %duplicate.memory_id.0,
                        "Exact content duplicate; the merge pass will consolidate"
                    );
                }
                let mut memory = Memory::new(
                    *memory_id,
                    user_id,
                    content.clone(),
                    *content_type,
                    *temporal_level,
                    *base_salience,
                    occurred_at,
                );
                memory.embedding = embedding.clone();
                self.memories.save(&memory).await?;
            }

            EventPayload::MemoryUpdated {
                memory_id,
                content,
                content_type,
                embedding,
            } => {
                let mut memory = self.load(user_id, *memory_id).await?;
                if let Some(content) = content {
                    memory.content = content.clone();
                }
                if let Some(content_type) = content_type {
                    memory.content_type = *content_type;
                }
                if let Some(embedding) = embedding {
                    memory.embedding = Some(embedding.clone());
                }
                self.memories.save(&memory).await?;
            }

            EventPayload::MemoryPromoted {
                memory_id, to_level, ..
            } => {
                let mut memory = self.load(user_id, *memory_id).await?;
                memory
                    .promote(*to_level, occurred_at)
                    .map_err(|e| ProjectionError::Fatal(e.to_string()))?;
                self.memories.save(&memory).await?;
            }

            EventPayload::MemoryDecayed {
                memory_id,
                new_salience,
                idle_days,
                ..
            } => {
                let mut memory = self.load(user_id, *memory_id).await?;
                memory.apply_decay(*new_salience, occurred_at);
                self.memories.save(&memory).await?;
                debug!(
                    memory_id = %memory_id.0,
                    idle_days,
                    new_salience,
                    "Applied decay"
                );
            }

            EventPayload::MemoryMerged {
                survivor_id,
                absorbed_id,
                ..
            } => {
                let mut survivor = self.load(user_id, *survivor_id).await?;
                let mut absorbed = self.load(user_id, *absorbed_id).await?;
                if !absorbed.is_active() {
                    debug!(absorbed_id = %absorbed_id.0, "Merge already applied");
                    return Ok(());
                }
                survivor
                    .absorb(&mut absorbed, occurred_at)
                    .map_err(|e| ProjectionError::Fatal(e.to_string()))?;
                self.memories.save(&survivor).await?;
                self.memories.save(&absorbed).await?;
            }

            EventPayload::ContextRetrieved { memory_ids, .. } => {
                for memory_id in memory_ids {
                    let mut memory = self.load(user_id, *memory_id).await?;
                    memory.record_retrieval(occurred_at);
                    self.memories.save(&memory).await?;
                }
            }

            EventPayload::DecisionMade { trace_id, .. } => {
                for memory_id in self.context_memories(user_id, *trace_id).await? {
                    let mut memory = self.load(user_id, memory_id).await?;
                    memory.record_decision(occurred_at);
                    self.memories.save(&memory).await?;
                }
            }

            EventPayload::OutcomeObserved {
                trace_id,
                quality_score,
                ..
            } => {
                for memory_id in self.context_memories(user_id, *trace_id).await? {
                    let mut memory = self.load(user_id, memory_id).await?;
                    if memory.record_outcome(*quality_score) {
                        warn!(
                            memory_id = %memory_id.0,
                            base_salience = memory.base_salience,
                            "Repeat-failure penalty applied"
                        );
                    }
                    self.memories.save(&memory).await?;
                }
            }

            EventPayload::SalienceAdjusted {
                memory_id,
                adjustment_delta,
                previous_adjustment,
                new_adjustment,
                reason,
                source_trace_id,
                source_outcome_id,
            } => {
                let mut memory = self.load(user_id, *memory_id).await?;
                let row = SalienceAdjustment {
                    memory_id: *memory_id,
                    adjustment_delta: *adjustment_delta,
                    previous_adjustment: *previous_adjustment,
                    new_adjustment: *new_adjustment,
                    reason: *reason,
                    source_trace_id: *source_trace_id,
                    source_outcome_id: *source_outcome_id,
                    adjusted_at: occurred_at,
                };
                if let Err(e) = memory.apply_adjustment(&row) {
                    error!(
                        memory_id = %memory_id.0,
                        "Salience adjustment contradicts audit trail: {}", e
                    );
                    return Err(ProjectionError::AttributionInconsistency(e.to_string()));
                }
                self.memories.apply_adjustment(&memory, &row).await?;
            }

            _ => {}
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Projector for MemoryProjector {
    fn name(&self) -> &'static str {
        "memory-projector"
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
        self.memories.clear().await?;
        self.applied.write().await.clear();
        Ok(())
    }
}
