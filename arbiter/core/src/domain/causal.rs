// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Causal edges — directed, evidence-backed claims that one entity causes,
//! prevents, enables, or correlates with another.
//!
//! Strength updates follow the same clamp-and-audit discipline as salience
//! adjustments. Edges are never hard-deleted: pruning closes the validity
//! window and the event history keeps the full record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::event::{AUDIT_EPSILON, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleId(pub Uuid);

impl CycleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Causes,
    Prevents,
    Enables,
    Correlates,
}

impl RelationshipType {
    /// Only `causes` and `enables` edges participate in cycle detection;
    /// `correlates` is symmetric and never forms a cycle by definition.
    pub fn cycle_forming(&self) -> bool {
        matches!(self, RelationshipType::Causes | RelationshipType::Enables)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CausalError {
    #[error("strength update expects previous {expected}, edge {edge_id:?} holds {actual}")]
    StrengthMismatch {
        edge_id: EdgeId,
        expected: f64,
        actual: f64,
    },

    #[error("strength arithmetic violated: {previous} + {delta} != {new}")]
    StrengthArithmetic { previous: f64, delta: f64, new: f64 },

    #[error("edge {0:?} is no longer active")]
    EdgeRetired(EdgeId),

    #[error("cycle {0:?} is already classified")]
    AlreadyClassified(CycleId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalEdge {
    pub edge_id: EdgeId,
    pub user_id: UserId,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relationship_type: RelationshipType,
    pub strength: f64,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub activation_conditions: Vec<String>,
    pub evidence_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl CausalEdge {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        edge_id: EdgeId,
        user_id: UserId,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
        relationship_type: RelationshipType,
        strength: f64,
        confidence: f64,
        activation_conditions: Vec<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            edge_id,
            user_id,
            source_entity_id,
            target_entity_id,
            relationship_type,
            strength: strength.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            valid_from: created_at,
            valid_until: None,
            activation_conditions,
            evidence_count: 0,
            last_updated: created_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.valid_until.is_none()
    }

    /// Apply one audited strength update. The stored strength must match the
    /// update's `previous` field and the arithmetic must hold exactly.
    pub fn apply_strength_update(
        &mut self,
        previous: f64,
        delta: f64,
        new: f64,
        at: DateTime<Utc>,
    ) -> Result<(), CausalError> {
        if !self.is_active() {
            return Err(CausalError::EdgeRetired(self.edge_id));
        }
        if (self.strength - previous).abs() > AUDIT_EPSILON {
            return Err(CausalError::StrengthMismatch {
                edge_id: self.edge_id,
                expected: previous,
                actual: self.strength,
            });
        }
        if (previous + delta - new).abs() > AUDIT_EPSILON {
            return Err(CausalError::StrengthArithmetic {
                previous,
                delta,
                new,
            });
        }
        self.strength = new.clamp(0.0, 1.0);
        self.evidence_count += 1;
        self.last_updated = at;
        Ok(())
    }

    /// Weak *and* under-evidenced edges are prune candidates. An edge with
    /// enough corroboration survives even at low strength; a strong claim
    /// survives even with thin evidence.
    pub fn prune_candidate(&self, min_strength: f64, min_evidence: u64) -> bool {
        self.is_active() && self.strength < min_strength && self.evidence_count < min_evidence
    }

    pub fn retire(&mut self, at: DateTime<Utc>) {
        if self.valid_until.is_none() {
            self.valid_until = Some(at);
        }
    }
}

/// Verdict on a flagged cycle. A feedback loop is a legitimate dynamic of
/// the modelled system; a modeling error means at least one edge claim is
/// wrong and needs operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleClassification {
    FeedbackLoop,
    ModelingError,
}

/// A detected directed cycle over `causes`/`enables` edges, awaiting an
/// explicit classification before any resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub user_id: UserId,
    pub edge_ids: Vec<EdgeId>,
    pub entity_path: Vec<Uuid>,
    pub detected_at: DateTime<Utc>,
    pub classification: Option<CycleClassification>,
    pub classified_at: Option<DateTime<Utc>>,
}

impl CycleReport {
    pub fn new(
        cycle_id: CycleId,
        user_id: UserId,
        edge_ids: Vec<EdgeId>,
        entity_path: Vec<Uuid>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cycle_id,
            user_id,
            edge_ids,
            entity_path,
            detected_at,
            classification: None,
            classified_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.classification.is_none()
    }

    pub fn classify(
        &mut self,
        classification: CycleClassification,
        at: DateTime<Utc>,
    ) -> Result<(), CausalError> {
        if self.classification.is_some() {
            return Err(CausalError::AlreadyClassified(self.cycle_id));
        }
        self.classification = Some(classification);
        self.classified_at = Some(at);
        Ok(())
    }
}
