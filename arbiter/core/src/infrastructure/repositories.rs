// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory read-model repositories.
//!
//! Every map is keyed by `(UserId, ..)` so a lookup cannot cross user
//! boundaries. These back development and tests; all of them are rebuildable
//! from the event log via the projection coordinator.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::domain::causal::{CausalEdge, CycleId, CycleReport, EdgeId};
use crate::domain::decision::{DecisionTrace, Outcome, OutcomeId, TraceId};
use crate::domain::event::UserId;
use crate::domain::memory::{Memory, MemoryId};
use crate::domain::repository::{
    CausalEdgeRepository, CheckpointRepository, DeadLetter, DeadLetterRepository,
    DecisionRepository, MemoryRepository, RepositoryError,
};
use crate::domain::salience::SalienceAdjustment;

#[derive(Default)]
struct MemoryState {
    memories: HashMap<(UserId, MemoryId), Memory>,
    adjustments: HashMap<(UserId, MemoryId), Vec<SalienceAdjustment>>,
}

pub struct InMemoryMemoryRepository {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryMemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }
}

impl Default for InMemoryMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryRepository for InMemoryMemoryRepository {
    async fn save(&self, memory: &Memory) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .memories
            .insert((memory.user_id, memory.memory_id), memory.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        user_id: UserId,
        memory_id: MemoryId,
    ) -> Result<Option<Memory>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.memories.get(&(user_id, memory_id)).cloned())
    }

    async fn find_by_content_hash(
        &self,
        user_id: UserId,
        content_hash: &str,
    ) -> Result<Option<Memory>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .memories
            .values()
            .find(|m| {
                m.user_id == user_id && m.is_active() && m.content.content_hash == content_hash
            })
            .cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Memory>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .memories
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn user_ids(&self) -> Result<Vec<UserId>, RepositoryError> {
        let state = self.state.read().await;
        let mut users: Vec<UserId> = state.memories.keys().map(|(u, _)| *u).collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn apply_adjustment(
        &self,
        memory: &Memory,
        row: &SalienceAdjustment,
    ) -> Result<(), RepositoryError> {
        // Single write-lock section: the adjusted memory and its audit row
        // become visible together or not at all.
        let mut state = self.state.write().await;
        state
            .memories
            .insert((memory.user_id, memory.memory_id), memory.clone());
        state
            .adjustments
            .entry((memory.user_id, row.memory_id))
            .or_default()
            .push(row.clone());
        Ok(())
    }

    async fn list_adjustments(
        &self,
        user_id: UserId,
        memory_id: MemoryId,
    ) -> Result<Vec<SalienceAdjustment>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .adjustments
            .get(&(user_id, memory_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.memories.clear();
        state.adjustments.clear();
        Ok(())
    }
}

#[derive(Default)]
struct DecisionState {
    traces: HashMap<(UserId, TraceId), DecisionTrace>,
    outcomes: HashMap<(TraceId, OutcomeId), Outcome>,
}

pub struct InMemoryDecisionRepository {
    state: Arc<RwLock<DecisionState>>,
}

impl InMemoryDecisionRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(DecisionState::default())),
        }
    }
}

impl Default for InMemoryDecisionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionRepository for InMemoryDecisionRepository {
    async fn save_trace(&self, trace: &DecisionTrace) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .traces
            .insert((trace.user_id, trace.trace_id), trace.clone());
        Ok(())
    }

    async fn find_trace(
        &self,
        user_id: UserId,
        trace_id: TraceId,
    ) -> Result<Option<DecisionTrace>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.traces.get(&(user_id, trace_id)).cloned())
    }

    async fn list_traces_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<DecisionTrace>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .traces
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn unattributed_traces(
        &self,
        limit: usize,
    ) -> Result<Vec<DecisionTrace>, RepositoryError> {
        let state = self.state.read().await;
        let mut pending: Vec<DecisionTrace> = state
            .traces
            .values()
            .filter(|t| t.needs_attribution())
            .cloned()
            .collect();
        pending.sort_by_key(|t| t.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn save_outcome(&self, outcome: &Outcome) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .outcomes
            .entry((outcome.trace_id, outcome.outcome_id))
            .or_insert_with(|| outcome.clone());
        Ok(())
    }

    async fn find_outcome(
        &self,
        trace_id: TraceId,
        outcome_id: OutcomeId,
    ) -> Result<Option<Outcome>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.outcomes.get(&(trace_id, outcome_id)).cloned())
    }

    async fn outcomes_for_trace(
        &self,
        user_id: UserId,
        trace_id: TraceId,
    ) -> Result<Vec<Outcome>, RepositoryError> {
        let state = self.state.read().await;
        if !state.traces.contains_key(&(user_id, trace_id)) {
            return Ok(Vec::new());
        }
        let mut outcomes: Vec<Outcome> = state
            .outcomes
            .values()
            .filter(|o| o.trace_id == trace_id)
            .cloned()
            .collect();
        outcomes.sort_by_key(|o| o.observed_at);
        Ok(outcomes)
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.traces.clear();
        state.outcomes.clear();
        Ok(())
    }
}

#[derive(Default)]
struct CausalState {
    edges: HashMap<(UserId, EdgeId), CausalEdge>,
    cycles: HashMap<(UserId, CycleId), CycleReport>,
}

pub struct InMemoryCausalEdgeRepository {
    state: Arc<RwLock<CausalState>>,
}

impl InMemoryCausalEdgeRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(CausalState::default())),
        }
    }
}

impl Default for InMemoryCausalEdgeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CausalEdgeRepository for InMemoryCausalEdgeRepository {
    async fn save(&self, edge: &CausalEdge) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.edges.insert((edge.user_id, edge.edge_id), edge.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        user_id: UserId,
        edge_id: EdgeId,
    ) -> Result<Option<CausalEdge>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.edges.get(&(user_id, edge_id)).cloned())
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<CausalEdge>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_active_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<CausalEdge>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .edges
            .values()
            .filter(|e| e.user_id == user_id && e.is_active())
            .cloned()
            .collect())
    }

    async fn save_cycle(&self, report: &CycleReport) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state
            .cycles
            .insert((report.user_id, report.cycle_id), report.clone());
        Ok(())
    }

    async fn find_cycle(
        &self,
        user_id: UserId,
        cycle_id: CycleId,
    ) -> Result<Option<CycleReport>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.cycles.get(&(user_id, cycle_id)).cloned())
    }

    async fn open_cycles(&self, user_id: UserId) -> Result<Vec<CycleReport>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .cycles
            .values()
            .filter(|c| c.user_id == user_id && c.is_open())
            .cloned()
            .collect())
    }

    async fn cycles_for_user(&self, user_id: UserId) -> Result<Vec<CycleReport>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .cycles
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        state.edges.clear();
        state.cycles.clear();
        Ok(())
    }
}

/// Checkpoints are hot (written once per applied event), hence the
/// lock-sharded map.
pub struct InMemoryCheckpointRepository {
    checkpoints: DashMap<String, u64>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self {
            checkpoints: DashMap::new(),
        }
    }
}

impl Default for InMemoryCheckpointRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryCheckpointRepository {
    async fn get(&self, projector: &str) -> Result<u64, RepositoryError> {
        Ok(self
            .checkpoints
            .get(projector)
            .map(|entry| *entry)
            .unwrap_or(0))
    }

    async fn set(&self, projector: &str, position: u64) -> Result<(), RepositoryError> {
        self.checkpoints.insert(projector.to_string(), position);
        Ok(())
    }
}

pub struct InMemoryDeadLetterRepository {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterRepository {
    pub fn new() -> Self {
        Self {
            letters: Mutex::new(Vec::new()),
        }
    }
}

impl Default for InMemoryDeadLetterRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterRepository for InMemoryDeadLetterRepository {
    async fn push(&self, letter: DeadLetter) -> Result<(), RepositoryError> {
        self.letters
            .lock()
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .push(letter);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<DeadLetter>, RepositoryError> {
        Ok(self
            .letters
            .lock()
            .map_err(|e| RepositoryError::Database(e.to_string()))?
            .clone())
    }
}
