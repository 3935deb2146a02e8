// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persistence contracts, one repository per aggregate root.
//!
//! Interfaces live in the domain layer and are implemented in
//! `crate::infrastructure`: in-memory backends for development and testing,
//! PostgreSQL for production. Every read-model method takes the owning
//! [`UserId`]; storage is keyed by it, so a repository cannot hand back
//! another user's rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::causal::{CausalEdge, CycleId, CycleReport, EdgeId};
use crate::domain::decision::{DecisionTrace, Outcome, OutcomeId, TraceId};
use crate::domain::event::{
    AggregateType, CorrelationId, EventEnvelope, StoredEvent, UserId,
};
use crate::domain::memory::{Memory, MemoryId};
use crate::domain::salience::SalienceAdjustment;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Result of appending one envelope.
#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    pub position: u64,
    /// The idempotency key had been seen before; `position` is the original
    /// append and nothing was written.
    pub deduplicated: bool,
}

/// Durable, append-only, ordered event storage — the single source of truth.
/// Append is the only mutation this trait exposes.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, envelope: EventEnvelope) -> Result<AppendOutcome, RepositoryError>;

    /// Events with `from_exclusive < position <= to_inclusive`, in recorded
    /// order, at most `limit`. Restartable by passing the last seen position.
    async fn read_range(
        &self,
        from_exclusive: u64,
        to_inclusive: Option<u64>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, RepositoryError>;

    async fn read_aggregate(
        &self,
        aggregate_type: AggregateType,
        aggregate_id: Uuid,
        from_exclusive: u64,
        to_inclusive: Option<u64>,
    ) -> Result<Vec<StoredEvent>, RepositoryError>;

    async fn read_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<StoredEvent>, RepositoryError>;

    /// Position of the newest event, 0 when the log is empty.
    async fn latest_position(&self) -> Result<u64, RepositoryError>;

    /// Monthly partition keys currently holding events, oldest first.
    async fn partitions(&self) -> Result<Vec<String>, RepositoryError>;
}

/// Memory read model plus its salience-adjustment audit rows. The audit row
/// and the memory it adjusts are written as one unit: both succeed or
/// neither is visible.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn save(&self, memory: &Memory) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        user_id: UserId,
        memory_id: MemoryId,
    ) -> Result<Option<Memory>, RepositoryError>;

    async fn find_by_content_hash(
        &self,
        user_id: UserId,
        content_hash: &str,
    ) -> Result<Option<Memory>, RepositoryError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Memory>, RepositoryError>;

    async fn user_ids(&self) -> Result<Vec<UserId>, RepositoryError>;

    /// Atomically persist the adjusted memory together with its audit row.
    async fn apply_adjustment(
        &self,
        memory: &Memory,
        row: &SalienceAdjustment,
    ) -> Result<(), RepositoryError>;

    async fn list_adjustments(
        &self,
        user_id: UserId,
        memory_id: MemoryId,
    ) -> Result<Vec<SalienceAdjustment>, RepositoryError>;

    /// Drop all state; used when a projection is rebuilt from the log.
    async fn clear(&self) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DecisionRepository: Send + Sync {
    async fn save_trace(&self, trace: &DecisionTrace) -> Result<(), RepositoryError>;

    async fn find_trace(
        &self,
        user_id: UserId,
        trace_id: TraceId,
    ) -> Result<Option<DecisionTrace>, RepositoryError>;

    async fn list_traces_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<DecisionTrace>, RepositoryError>;

    /// Traces with an observed outcome and no attribution yet, any user,
    /// oldest first. Each trace carries its own `user_id`.
    async fn unattributed_traces(
        &self,
        limit: usize,
    ) -> Result<Vec<DecisionTrace>, RepositoryError>;

    /// Idempotent per `(trace_id, outcome_id)`: saving the same outcome
    /// twice leaves one row.
    async fn save_outcome(&self, outcome: &Outcome) -> Result<(), RepositoryError>;

    async fn find_outcome(
        &self,
        trace_id: TraceId,
        outcome_id: OutcomeId,
    ) -> Result<Option<Outcome>, RepositoryError>;

    async fn outcomes_for_trace(
        &self,
        user_id: UserId,
        trace_id: TraceId,
    ) -> Result<Vec<Outcome>, RepositoryError>;

    async fn clear(&self) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CausalEdgeRepository: Send + Sync {
    async fn save(&self, edge: &CausalEdge) -> Result<(), RepositoryError>;

    async fn find_by_id(
        &self,
        user_id: UserId,
        edge_id: EdgeId,
    ) -> Result<Option<CausalEdge>, RepositoryError>;

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<CausalEdge>, RepositoryError>;

    async fn list_active_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CausalEdge>, RepositoryError>;

    async fn save_cycle(&self, report: &CycleReport) -> Result<(), RepositoryError>;

    async fn find_cycle(
        &self,
        user_id: UserId,
        cycle_id: CycleId,
    ) -> Result<Option<CycleReport>, RepositoryError>;

    async fn open_cycles(&self, user_id: UserId) -> Result<Vec<CycleReport>, RepositoryError>;

    async fn cycles_for_user(&self, user_id: UserId) -> Result<Vec<CycleReport>, RepositoryError>;

    async fn clear(&self) -> Result<(), RepositoryError>;
}

/// One checkpoint per projector: the position of the last successfully
/// applied event.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn get(&self, projector: &str) -> Result<u64, RepositoryError>;

    async fn set(&self, projector: &str, position: u64) -> Result<(), RepositoryError>;
}

/// An event a projector gave up on: retries exhausted, no upcaster, or an
/// audit inconsistency. Parked for manual review instead of blocking the
/// stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub projector: String,
    pub event: StoredEvent,
    pub error: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    async fn push(&self, letter: DeadLetter) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<DeadLetter>, RepositoryError>;
}
