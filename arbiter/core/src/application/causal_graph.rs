// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # CausalGraph — evidence-backed cause/effect claims per user
//!
//! Commands append events; the projector maintains the edge read model.
//! Cycle detection is an explicit directed DFS with a visited-on-this-path
//! set over `causes`/`enables` edges, bounded in depth — never an accident
//! of reference cycles in the object graph. Detected cycles are flagged for
//! a `feedback_loop` vs `modeling_error` verdict and are never auto-removed.
//! Pruning runs periodically, off the write path, and only retires edges
//! that are both weak and under-evidenced.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::event_log::{EventDraft, EventLog, EventLogError};
use crate::application::projection::{ProjectionError, Projector};
use crate::domain::causal::{
    CausalEdge, CycleClassification, CycleId, CycleReport, EdgeId, RelationshipType,
};
use crate::domain::event::{AUDIT_EPSILON, EventId, EventPayload, StoredEvent, UserId};
use crate::domain::repository::{CausalEdgeRepository, RepositoryError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CausalGraphConfig {
    /// Edges below this strength are prune candidates.
    pub min_strength: f64,

    /// Edges below this evidence count are prune candidates.
    pub min_evidence: u64,

    /// Depth bound for the cycle-detection DFS.
    pub max_cycle_depth: usize,
}

impl Default for CausalGraphConfig {
    fn default() -> Self {
        Self {
            min_strength: 0.5,
            min_evidence: 5,
            max_cycle_depth: 32,
        }
    }
}

#[derive(Debug, Error)]
pub enum CausalGraphError {
    #[error("causal edge not found: {0:?}")]
    EdgeNotFound(EdgeId),

    #[error("cycle not found: {0:?}")]
    CycleNotFound(CycleId),

    #[error("cycle {0:?} is already classified")]
    CycleAlreadyClassified(CycleId),

    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}

/// Discovery context for a new edge.
#[derive(Debug, Clone)]
pub struct EdgeEvidence {
    pub strength: f64,
    pub confidence: f64,
    pub activation_conditions: Vec<String>,
}

/// A directed path through the active graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalPath {
    pub entities: Vec<Uuid>,
    pub edges: Vec<EdgeId>,
    /// Product of edge strengths along the path.
    pub combined_strength: f64,
}

pub struct CausalGraph {
    log: Arc<EventLog>,
    edges: Arc<dyn CausalEdgeRepository>,
    config: CausalGraphConfig,
}

impl CausalGraph {
    pub fn new(
        log: Arc<EventLog>,
        edges: Arc<dyn CausalEdgeRepository>,
        config: CausalGraphConfig,
    ) -> Self {
        Self { log, edges, config }
    }

    pub async fn add_edge(
        &self,
        user_id: UserId,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
        relationship_type: RelationshipType,
        evidence: EdgeEvidence,
    ) -> Result<EdgeId, CausalGraphError> {
        let edge_id = EdgeId::new();
        self.log
            .append(EventDraft::new(
                user_id,
                EventPayload::CausalEdgeCreated {
                    edge_id,
                    source_entity_id,
                    target_entity_id,
                    relationship_type,
                    strength: evidence.strength,
                    confidence: evidence.confidence,
                    activation_conditions: evidence.activation_conditions,
                },
            ))
            .await?;
        Ok(edge_id)
    }

    /// Audited strength change; the clamp-and-audit discipline matches
    /// salience adjustments.
    pub async fn update_strength(
        &self,
        user_id: UserId,
        edge_id: EdgeId,
        delta: f64,
        reason: impl Into<String>,
    ) -> Result<(), CausalGraphError> {
        let edge = self
            .edges
            .find_by_id(user_id, edge_id)
            .await?
            .ok_or(CausalGraphError::EdgeNotFound(edge_id))?;
        let previous = edge.strength;
        let new = (previous + delta).clamp(0.0, 1.0);
        self.log
            .append(EventDraft::new(
                user_id,
                EventPayload::CausalStrengthUpdated {
                    edge_id,
                    strength_delta: new - previous,
                    previous_strength: previous,
                    new_strength: new,
                    reason: reason.into(),
                    source_trace_id: None,
                },
            ))
            .await?;
        Ok(())
    }

    /// Flag every directed cycle reachable over active `causes`/`enables`
    /// edges that has not been reported before. Returns the newly flagged
    /// reports; resolution waits for an explicit classification.
    pub async fn detect_cycles(&self, user_id: UserId) -> Result<Vec<CycleReport>, CausalGraphError> {
        let edges = self.edges.list_active_for_user(user_id).await?;
        let cycles = find_cycles(&edges, self.config.max_cycle_depth);

        let known: HashSet<Vec<EdgeId>> = self
            .edges
            .cycles_for_user(user_id)
            .await?
            .into_iter()
            .map(|report| canonical_cycle(&report.edge_ids))
            .collect();

        let mut flagged = Vec::new();
        for cycle in cycles {
            let canonical = canonical_cycle(&cycle.edge_ids);
            if known.contains(&canonical) {
                continue;
            }
            let cycle_id = CycleId::new();
            warn!(
                cycle_id = %cycle_id.0,
                edges = cycle.edge_ids.len(),
                "Causal cycle detected, awaiting classification"
            );
            self.log
                .append(EventDraft::new(
                    user_id,
                    EventPayload::CausalCycleDetected {
                        cycle_id,
                        edge_ids: cycle.edge_ids.clone(),
                        entity_path: cycle.entity_path.clone(),
                    },
                ))
                .await?;
            flagged.push(CycleReport::new(
                cycle_id,
                user_id,
                cycle.edge_ids,
                cycle.entity_path,
                Utc::now(),
            ));
        }
        Ok(flagged)
    }

    /// Record the manual-review verdict for a flagged cycle.
    pub async fn classify_cycle(
        &self,
        user_id: UserId,
        cycle_id: CycleId,
        classification: CycleClassification,
    ) -> Result<(), CausalGraphError> {
        let report = self
            .edges
            .find_cycle(user_id, cycle_id)
            .await?
            .ok_or(CausalGraphError::CycleNotFound(cycle_id))?;
        if !report.is_open() {
            return Err(CausalGraphError::CycleAlreadyClassified(cycle_id));
        }
        self.log
            .append(EventDraft::new(
                user_id,
                EventPayload::CausalCycleClassified {
                    cycle_id,
                    classification,
                },
            ))
            .await?;
        Ok(())
    }

    /// Retire every edge below both thresholds. Periodic; never called
    /// inline with a write.
    pub async fn prune(&self, user_id: UserId) -> Result<usize, CausalGraphError> {
        let edges = self.edges.list_active_for_user(user_id).await?;
        let candidates: Vec<EdgeId> = edges
            .iter()
            .filter(|e| e.prune_candidate(self.config.min_strength, self.config.min_evidence))
            .map(|e| e.edge_id)
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }
        let pruned = candidates.len();
        info!(user_id = %user_id.0, pruned, "Pruning weak causal edges");
        self.log
            .append(EventDraft::new(
                user_id,
                EventPayload::CausalGraphPruned {
                    edge_ids: candidates,
                    min_strength: self.config.min_strength,
                    min_evidence: self.config.min_evidence,
                },
            ))
            .await?;
        Ok(pruned)
    }

    /// All simple directed paths out of `source_entity`, any relationship
    /// type, up to `max_hops` edges.
    pub async fn causal_paths(
        &self,
        user_id: UserId,
        source_entity: Uuid,
        max_hops: usize,
    ) -> Result<Vec<CausalPath>, CausalGraphError> {
        let edges = self.edges.list_active_for_user(user_id).await?;
        Ok(collect_paths(&edges, source_entity, max_hops))
    }
}

struct FoundCycle {
    edge_ids: Vec<EdgeId>,
    entity_path: Vec<Uuid>,
}

/// DFS with a visited-on-this-path set; each cycle is reported once in
/// canonical rotation.
fn find_cycles(edges: &[CausalEdge], max_depth: usize) -> Vec<FoundCycle> {
    let mut adjacency: HashMap<Uuid, Vec<&CausalEdge>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.relationship_type.cycle_forming()) {
        adjacency.entry(edge.source_entity_id).or_default().push(edge);
    }

    let mut found: Vec<FoundCycle> = Vec::new();
    let mut seen: HashSet<Vec<EdgeId>> = HashSet::new();

    for start in adjacency.keys().copied() {
        let mut path_edges: Vec<&CausalEdge> = Vec::new();
        let mut on_path: Vec<Uuid> = vec![start];
        dfs(
            start,
            &adjacency,
            max_depth,
            &mut path_edges,
            &mut on_path,
            &mut seen,
            &mut found,
        );
    }
    found
}

fn dfs<'a>(
    node: Uuid,
    adjacency: &HashMap<Uuid, Vec<&'a CausalEdge>>,
    remaining_depth: usize,
    path_edges: &mut Vec<&'a CausalEdge>,
    on_path: &mut Vec<Uuid>,
    seen: &mut HashSet<Vec<EdgeId>>,
    found: &mut Vec<FoundCycle>,
) {
    if remaining_depth == 0 {
        return;
    }
    let Some(outgoing) = adjacency.get(&node) else {
        return;
    };
    for edge in outgoing {
        if let Some(cycle_start) = on_path.iter().position(|n| *n == edge.target_entity_id) {
            // Directed path returned to a node on the current path.
            let mut cycle_edges: Vec<EdgeId> =
                path_edges[cycle_start..].iter().map(|e| e.edge_id).collect();
            cycle_edges.push(edge.edge_id);
            let canonical = canonical_cycle(&cycle_edges);
            if seen.insert(canonical) {
                found.push(FoundCycle {
                    entity_path: on_path[cycle_start..].to_vec(),
                    edge_ids: cycle_edges,
                });
            }
            continue;
        }
        path_edges.push(edge);
        on_path.push(edge.target_entity_id);
        dfs(
            edge.target_entity_id,
            adjacency,
            remaining_depth - 1,
            path_edges,
            on_path,
            seen,
            found,
        );
        path_edges.pop();
        on_path.pop();
    }
}

/// Rotate a cycle's edge list so the smallest edge id leads; makes the same
/// cycle comparable regardless of the DFS entry point.
fn canonical_cycle(edge_ids: &[EdgeId]) -> Vec<EdgeId> {
    if edge_ids.is_empty() {
        return Vec::new();
    }
    let min_index = edge_ids
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| *id)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut rotated = Vec::with_capacity(edge_ids.len());
    rotated.extend_from_slice(&edge_ids[min_index..]);
    rotated.extend_from_slice(&edge_ids[..min_index]);
    rotated
}

/// All simple paths out of `source`, bounded by `max_hops`.
pub fn collect_paths(edges: &[CausalEdge], source: Uuid, max_hops: usize) -> Vec<CausalPath> {
    let mut adjacency: HashMap<Uuid, Vec<&CausalEdge>> = HashMap::new();
    for edge in edges.iter().filter(|e| e.is_active()) {
        adjacency.entry(edge.source_entity_id).or_default().push(edge);
    }

    let mut paths = Vec::new();
    let mut entities = vec![source];
    let mut path_edges: Vec<&CausalEdge> = Vec::new();
    walk_paths(source, &adjacency, max_hops, &mut entities, &mut path_edges, &mut paths);
    paths
}

fn walk_paths<'a>(
    node: Uuid,
    adjacency: &HashMap<Uuid, Vec<&'a CausalEdge>>,
    remaining_hops: usize,
    entities: &mut Vec<Uuid>,
    path_edges: &mut Vec<&'a CausalEdge>,
    paths: &mut Vec<CausalPath>,
) {
    if remaining_hops == 0 {
        return;
    }
    let Some(outgoing) = adjacency.get(&node) else {
        return;
    };
    for edge in outgoing {
        if entities.contains(&edge.target_entity_id) {
            continue;
        }
        entities.push(edge.target_entity_id);
        path_edges.push(edge);
        paths.push(CausalPath {
            entities: entities.clone(),
            edges: path_edges.iter().map(|e| e.edge_id).collect(),
            combined_strength: path_edges.iter().map(|e| e.strength).product(),
        });
        walk_paths(
            edge.target_entity_id,
            adjacency,
            remaining_hops - 1,
            entities,
            path_edges,
            paths,
        );
        path_edges.pop();
        entities.pop();
    }
}

/// Builds the causal-edge and cycle-report read models.
pub struct CausalProjector {
    edges: Arc<dyn CausalEdgeRepository>,
    applied: RwLock<HashSet<EventId>>,
}

impl CausalProjector {
    pub fn new(edges: Arc<dyn CausalEdgeRepository>) -> Self {
        Self {
            edges,
            applied: RwLock::new(HashSet::new()),
        }
    }

    async fn handle(&self, event: &StoredEvent) -> Result<(), ProjectionError> {
        let envelope = &event.envelope;
        let user_id = envelope.user_id;
        let occurred_at = envelope.occurred_at;

        match &envelope.payload {
            EventPayload::CausalEdgeCreated {
                edge_id,
                source_entity_id,
                target_entity_id,
                relationship_type,
                strength,
                confidence,
                activation_conditions,
            } => {
                if self.edges.find_by_id(user_id, *edge_id).await?.is_some() {
                    debug!(edge_id = %edge_id.0, "Edge already projected");
                    return Ok(());
                }
                let edge = CausalEdge::new(
                    *edge_id,
                    user_id,
                    *source_entity_id,
                    *target_entity_id,
                    *relationship_type,
                    *strength,
                    *confidence,
                    activation_conditions.clone(),
                    occurred_at,
                );
                self.edges.save(&edge).await?;
            }

            EventPayload::CausalStrengthUpdated {
                edge_id,
                strength_delta,
                previous_strength,
                new_strength,
                ..
            } => {
                let mut edge = self
                    .edges
                    .find_by_id(user_id, *edge_id)
                    .await?
                    .ok_or_else(|| {
                        ProjectionError::Retryable(format!(
                            "edge {:?} not yet projected",
                            edge_id
                        ))
                    })?;
                if (edge.strength - new_strength).abs() <= AUDIT_EPSILON {
                    debug!(edge_id = %edge_id.0, "Strength update already applied");
                    return Ok(());
                }
                edge.apply_strength_update(
                    *previous_strength,
                    *strength_delta,
                    *new_strength,
                    occurred_at,
                )
                .map_err(|e| ProjectionError::AttributionInconsistency(e.to_string()))?;
                self.edges.save(&edge).await?;
            }

            EventPayload::CausalCycleDetected {
                cycle_id,
                edge_ids,
                entity_path,
            } => {
                if self.edges.find_cycle(user_id, *cycle_id).await?.is_some() {
                    return Ok(());
                }
                let report = CycleReport::new(
                    *cycle_id,
                    user_id,
                    edge_ids.clone(),
                    entity_path.clone(),
                    occurred_at,
                );
                self.edges.save_cycle(&report).await?;
            }

            EventPayload::CausalCycleClassified {
                cycle_id,
                classification,
            } => {
                let mut report = self
                    .edges
                    .find_cycle(user_id, *cycle_id)
                    .await?
                    .ok_or_else(|| {
                        ProjectionError::Retryable(format!(
                            "cycle {:?} not yet projected",
                            cycle_id
                        ))
                    })?;
                if !report.is_open() {
                    return Ok(());
                }
                report
                    .classify(*classification, occurred_at)
                    .map_err(|e| ProjectionError::Fatal(e.to_string()))?;
                self.edges.save_cycle(&report).await?;
            }

            EventPayload::CausalGraphPruned { edge_ids, .. } => {
                for edge_id in edge_ids {
                    let Some(mut edge) = self.edges.find_by_id(user_id, *edge_id).await? else {
                        continue;
                    };
                    edge.retire(occurred_at);
                    self.edges.save(&edge).await?;
                }
            }

            _ => {}
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Projector for CausalProjector {
    fn name(&self) -> &'static str {
        "causal-projector"
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
        self.edges.clear().await?;
        self.applied.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::upcaster::UpcasterRegistry;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::event_store::InMemoryEventStore;
    use crate::infrastructure::repositories::InMemoryCausalEdgeRepository;

    struct Fixture {
        graph: CausalGraph,
        projector: CausalProjector,
        log: Arc<EventLog>,
        edges: Arc<InMemoryCausalEdgeRepository>,
    }

    fn fixture() -> Fixture {
        let log = Arc::new(EventLog::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(UpcasterRegistry::with_current_schemas()),
            EventBus::with_default_capacity(),
        ));
        let edges = Arc::new(InMemoryCausalEdgeRepository::new());
        Fixture {
            graph: CausalGraph::new(log.clone(), edges.clone(), CausalGraphConfig::default()),
            projector: CausalProjector::new(edges.clone()),
            log,
            edges,
        }
    }

    async fn project_all(fixture: &Fixture) {
        for event in fixture.log.store().read_range(0, None, 1000).await.unwrap() {
            fixture.projector.apply(&event).await.unwrap();
        }
    }

    fn evidence(strength: f64) -> EdgeEvidence {
        EdgeEvidence {
            strength,
            confidence: 0.6,
            activation_conditions: vec![],
        }
    }

    #[tokio::test]
    async fn test_add_edge_and_update_strength() {
        let fixture = fixture();
        let user_id = UserId::new();
        let edge_id = fixture
            .graph
            .add_edge(
                user_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                RelationshipType::Causes,
                evidence(0.3),
            )
            .await
            .unwrap();
        project_all(&fixture).await;

        fixture
            .graph
            .update_strength(user_id, edge_id, 0.05, "corroborating outcome")
            .await
            .unwrap();
        project_all(&fixture).await;

        let edge = fixture
            .edges
            .find_by_id(user_id, edge_id)
            .await
            .unwrap()
            .unwrap();
        assert!((edge.strength - 0.35).abs() < 1e-9);
        assert_eq!(edge.evidence_count, 1);
    }

    #[tokio::test]
    async fn test_strength_clamped_and_audited() {
        let fixture = fixture();
        let user_id = UserId::new();
        let edge_id = fixture
            .graph
            .add_edge(
                user_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                RelationshipType::Enables,
                evidence(0.9),
            )
            .await
            .unwrap();
        project_all(&fixture).await;

        // +0.5 clamps at 1.0; the recorded delta reflects the clamp.
        fixture
            .graph
            .update_strength(user_id, edge_id, 0.5, "strong corroboration")
            .await
            .unwrap();
        let events = fixture.log.store().read_range(0, None, 100).await.unwrap();
        let update = events
            .iter()
            .find_map(|e| match &e.envelope.payload {
                EventPayload::CausalStrengthUpdated {
                    strength_delta,
                    previous_strength,
                    new_strength,
                    ..
                } => Some((*strength_delta, *previous_strength, *new_strength)),
                _ => None,
            })
            .unwrap();
        assert!((update.0 - 0.1).abs() < 1e-9);
        assert_eq!(update.1, 0.9);
        assert_eq!(update.2, 1.0);
    }

    #[tokio::test]
    async fn test_detect_cycles_flags_causes_loop_once() {
        let fixture = fixture();
        let user_id = UserId::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        fixture
            .graph
            .add_edge(user_id, a, b, RelationshipType::Causes, evidence(0.8))
            .await
            .unwrap();
        fixture
            .graph
            .add_edge(user_id, b, c, RelationshipType::Enables, evidence(0.8))
            .await
            .unwrap();
        fixture
            .graph
            .add_edge(user_id, c, a, RelationshipType::Causes, evidence(0.8))
            .await
            .unwrap();
        project_all(&fixture).await;

        let flagged = fixture.graph.detect_cycles(user_id).await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].edge_ids.len(), 3);
        project_all(&fixture).await;

        // Re-detection of a known cycle does not re-flag it.
        assert!(fixture.graph.detect_cycles(user_id).await.unwrap().is_empty());
        assert_eq!(fixture.edges.open_cycles(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_correlates_does_not_form_cycles() {
        let fixture = fixture();
        let user_id = UserId::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        fixture
            .graph
            .add_edge(user_id, a, b, RelationshipType::Correlates, evidence(0.9))
            .await
            .unwrap();
        fixture
            .graph
            .add_edge(user_id, b, a, RelationshipType::Correlates, evidence(0.9))
            .await
            .unwrap();
        project_all(&fixture).await;

        assert!(fixture.graph.detect_cycles(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_classification_recorded() {
        let fixture = fixture();
        let user_id = UserId::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        fixture
            .graph
            .add_edge(user_id, a, b, RelationshipType::Causes, evidence(0.8))
            .await
            .unwrap();
        fixture
            .graph
            .add_edge(user_id, b, a, RelationshipType::Causes, evidence(0.8))
            .await
            .unwrap();
        project_all(&fixture).await;

        let flagged = fixture.graph.detect_cycles(user_id).await.unwrap();
        project_all(&fixture).await;
        let cycle_id = flagged[0].cycle_id;

        fixture
            .graph
            .classify_cycle(user_id, cycle_id, CycleClassification::FeedbackLoop)
            .await
            .unwrap();
        project_all(&fixture).await;

        let report = fixture
            .edges
            .find_cycle(user_id, cycle_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.classification, Some(CycleClassification::FeedbackLoop));
        assert!(matches!(
            fixture
                .graph
                .classify_cycle(user_id, cycle_id, CycleClassification::ModelingError)
                .await
                .unwrap_err(),
            CausalGraphError::CycleAlreadyClassified(_)
        ));
    }

    #[tokio::test]
    async fn test_prune_removes_weak_thin_edges_only() {
        let fixture = fixture();
        let user_id = UserId::new();
        let weak = fixture
            .graph
            .add_edge(
                user_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                RelationshipType::Causes,
                evidence(0.3),
            )
            .await
            .unwrap();
        let strong = fixture
            .graph
            .add_edge(
                user_id,
                Uuid::new_v4(),
                Uuid::new_v4(),
                RelationshipType::Causes,
                evidence(0.8),
            )
            .await
            .unwrap();
        project_all(&fixture).await;

        // Three corroborations: 0.3 -> 0.45, evidence 3 — still weak, still thin.
        for _ in 0..3 {
            fixture
                .graph
                .update_strength(user_id, weak, 0.05, "outcome_attribution")
                .await
                .unwrap();
            project_all(&fixture).await;
        }
        let edge = fixture.edges.find_by_id(user_id, weak).await.unwrap().unwrap();
        assert!((edge.strength - 0.45).abs() < 1e-9);
        assert_eq!(edge.evidence_count, 3);

        assert_eq!(fixture.graph.prune(user_id).await.unwrap(), 1);
        project_all(&fixture).await;

        let weak_edge = fixture.edges.find_by_id(user_id, weak).await.unwrap().unwrap();
        assert!(!weak_edge.is_active());
        let strong_edge = fixture
            .edges
            .find_by_id(user_id, strong)
            .await
            .unwrap()
            .unwrap();
        assert!(strong_edge.is_active());
    }

    #[tokio::test]
    async fn test_causal_paths_bounded_by_hops() {
        let fixture = fixture();
        let user_id = UserId::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        fixture
            .graph
            .add_edge(user_id, a, b, RelationshipType::Causes, evidence(0.5))
            .await
            .unwrap();
        fixture
            .graph
            .add_edge(user_id, b, c, RelationshipType::Causes, evidence(0.5))
            .await
            .unwrap();
        project_all(&fixture).await;

        let one_hop = fixture.graph.causal_paths(user_id, a, 1).await.unwrap();
        assert_eq!(one_hop.len(), 1);

        let two_hops = fixture.graph.causal_paths(user_id, a, 4).await.unwrap();
        assert_eq!(two_hops.len(), 2);
        let longest = two_hops.iter().find(|p| p.edges.len() == 2).unwrap();
        assert_eq!(longest.entities, vec![a, b, c]);
        assert!((longest.combined_strength - 0.25).abs() < 1e-9);
    }
}
