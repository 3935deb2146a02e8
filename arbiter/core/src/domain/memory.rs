// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Memory aggregate — one unit of knowledge about a user.
//!
//! A memory's importance is split into a slow-moving `base_salience` (decayed
//! by disuse, penalised by repeated failure) and a fast-moving
//! `outcome_adjustment` (driven by attributed decision outcomes). The
//! `effective_salience` read by retrieval is always derived from the two,
//! never stored independently.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::event::{AUDIT_EPSILON, UserId};
use crate::domain::salience::SalienceAdjustment;

/// Salience never decays below this floor; decay lowers, it does not delete.
pub const SALIENCE_FLOOR: f64 = 0.05;

/// Extra base-salience loss applied per negative occurrence once failures
/// outnumber successes two to one.
pub const REPEAT_FAILURE_PENALTY: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of knowledge a memory encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Fact,
    Preference,
    Event,
    Goal,
    Constraint,
    Relationship,
    Skill,
    Context,
}

/// Ordered durability category. Promotion only ever moves one level up;
/// the categorical level of a memory never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalLevel {
    Immediate = 1,
    Situational = 2,
    Seasonal = 3,
    Identity = 4,
}

impl TemporalLevel {
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn next(&self) -> Option<TemporalLevel> {
        match self {
            TemporalLevel::Immediate => Some(TemporalLevel::Situational),
            TemporalLevel::Situational => Some(TemporalLevel::Seasonal),
            TemporalLevel::Seasonal => Some(TemporalLevel::Identity),
            TemporalLevel::Identity => None,
        }
    }

    /// Days a memory must be observed at this level before it can be
    /// promoted to the next.
    pub fn observation_window_days(&self) -> Option<i64> {
        match self {
            TemporalLevel::Immediate => Some(14),
            TemporalLevel::Situational => Some(60),
            TemporalLevel::Seasonal => Some(180),
            TemporalLevel::Identity => None,
        }
    }

    /// Disuse half-life for base-salience decay.
    pub fn half_life_days(&self) -> f64 {
        match self {
            TemporalLevel::Immediate => 2.0,
            TemporalLevel::Situational => 14.0,
            TemporalLevel::Seasonal => 90.0,
            TemporalLevel::Identity => 365.0,
        }
    }
}

/// Opaque, already-encrypted content blob plus its SHA-256 hash. The hash is
/// the only thing this core ever inspects (exact-duplicate detection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryContent {
    pub blob: Vec<u8>,
    pub content_hash: String,
}

impl MemoryContent {
    pub fn new(blob: Vec<u8>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(&blob);
        let content_hash = format!("{:x}", hasher.finalize());
        Self { blob, content_hash }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("temporal level never decreases: {current:?} -> {requested:?}")]
    NonMonotonicPromotion {
        current: TemporalLevel,
        requested: TemporalLevel,
    },

    #[error("promotion advances exactly one level: {current:?} -> {requested:?}")]
    SkippedLevel {
        current: TemporalLevel,
        requested: TemporalLevel,
    },

    #[error("memory {0:?} is already at the identity level")]
    AtTopLevel(MemoryId),

    #[error(
        "adjustment expects previous {expected}, memory {memory_id:?} holds {actual}"
    )]
    AdjustmentMismatch {
        memory_id: MemoryId,
        expected: f64,
        actual: f64,
    },

    #[error("memory {0:?} is no longer active")]
    Inactive(MemoryId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: MemoryId,
    pub user_id: UserId,
    pub content: MemoryContent,
    pub content_type: ContentType,
    pub temporal_level: TemporalLevel,
    pub valid_from: DateTime<Utc>,
    /// `None` means currently active. Logical deletion only.
    pub valid_until: Option<DateTime<Utc>>,
    pub base_salience: f64,
    /// Materialised cache of the salience-adjustment audit log. Only
    /// [`Memory::apply_adjustment`] writes it.
    pub outcome_adjustment: f64,
    pub retrieval_count: u64,
    pub decision_count: u64,
    pub positive_outcomes: u64,
    pub negative_outcomes: u64,
    pub promoted_from_level: Option<TemporalLevel>,
    /// Producer-supplied embedding of the (opaque) content.
    pub embedding: Option<Vec<f32>>,
    /// When the memory entered its current temporal level.
    pub level_entered_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    /// Anchor of the last applied decay, so repeated maintenance cycles do
    /// not re-decay the same idle span.
    pub last_decayed_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn new(
        memory_id: MemoryId,
        user_id: UserId,
        content: MemoryContent,
        content_type: ContentType,
        temporal_level: TemporalLevel,
        base_salience: f64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            memory_id,
            user_id,
            content,
            content_type,
            temporal_level,
            valid_from: created_at,
            valid_until: None,
            base_salience: base_salience.clamp(0.0, 1.0),
            outcome_adjustment: 0.0,
            retrieval_count: 0,
            decision_count: 0,
            positive_outcomes: 0,
            negative_outcomes: 0,
            promoted_from_level: None,
            embedding: None,
            level_entered_at: created_at,
            last_used: created_at,
            last_decayed_at: None,
        }
    }

    /// Current importance in `[0, 1]`. Always derived.
    pub fn effective_salience(&self) -> f64 {
        (self.base_salience + self.outcome_adjustment).clamp(0.0, 1.0)
    }

    pub fn is_active(&self) -> bool {
        self.valid_until.is_none()
    }

    pub fn record_retrieval(&mut self, at: DateTime<Utc>) {
        self.retrieval_count += 1;
        self.last_used = self.last_used.max(at);
    }

    pub fn record_decision(&mut self, at: DateTime<Utc>) {
        self.decision_count += 1;
        self.last_used = self.last_used.max(at);
    }

    /// Count one observed outcome by the sign of its quality score; a
    /// neutral (zero) outcome moves neither counter. A negative outcome
    /// additionally costs [`REPEAT_FAILURE_PENALTY`] of base salience once
    /// failures outnumber successes two to one; returns whether that penalty
    /// applied.
    pub fn record_outcome(&mut self, quality_score: f64) -> bool {
        if quality_score > 0.0 {
            self.positive_outcomes += 1;
            return false;
        }
        if quality_score < 0.0 {
            self.negative_outcomes += 1;
            if self.negative_outcomes > self.positive_outcomes * 2 {
                self.base_salience =
                    (self.base_salience - REPEAT_FAILURE_PENALTY).max(SALIENCE_FLOOR);
                return true;
            }
        }
        false
    }

    /// Half-life decay candidate for the idle span since the last use or the
    /// last applied decay. `None` when there is nothing to decay.
    pub fn decay_candidate(&self, as_of: DateTime<Utc>) -> Option<DecayCandidate> {
        if !self.is_active() || self.base_salience <= SALIENCE_FLOOR {
            return None;
        }
        let anchor = match self.last_decayed_at {
            Some(decayed) => decayed.max(self.last_used),
            None => self.last_used,
        };
        let idle_days = (as_of - anchor).num_days();
        if idle_days < 1 {
            return None;
        }
        let half_life = self.temporal_level.half_life_days();
        let factor = 0.5_f64.powf(idle_days as f64 / half_life);
        let new_salience = (self.base_salience * factor).max(SALIENCE_FLOOR);
        Some(DecayCandidate {
            previous_salience: self.base_salience,
            new_salience,
            idle_days,
        })
    }

    /// Apply a decay result that was recorded as an event.
    pub fn apply_decay(&mut self, new_salience: f64, at: DateTime<Utc>) {
        self.base_salience = new_salience.max(SALIENCE_FLOOR);
        self.last_decayed_at = Some(at);
    }

    /// Apply one audited outcome adjustment. The audit row is the source of
    /// truth; the cached `outcome_adjustment` must match its `previous`
    /// field or the row is inconsistent with this memory's history.
    pub fn apply_adjustment(&mut self, row: &SalienceAdjustment) -> Result<(), MemoryError> {
        if (self.outcome_adjustment - row.previous_adjustment).abs() > AUDIT_EPSILON {
            return Err(MemoryError::AdjustmentMismatch {
                memory_id: self.memory_id,
                expected: row.previous_adjustment,
                actual: self.outcome_adjustment,
            });
        }
        self.outcome_adjustment = row.new_adjustment.clamp(-1.0, 1.0);
        Ok(())
    }

    /// Whether this memory qualifies for promotion to the next level:
    /// observed at the current level for its full window, at least
    /// `min_decisions` decisions, and a success rate of `min_success_rate`.
    pub fn promotion_eligible(
        &self,
        as_of: DateTime<Utc>,
        min_decisions: u64,
        min_success_rate: f64,
    ) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(window_days) = self.temporal_level.observation_window_days() else {
            return false;
        };
        if as_of - self.level_entered_at < Duration::days(window_days) {
            return false;
        }
        if self.decision_count < min_decisions {
            return false;
        }
        let outcomes = self.positive_outcomes as f64;
        outcomes / self.decision_count as f64 >= min_success_rate
    }

    /// Advance the temporal level. Exactly one step, never downward.
    pub fn promote(&mut self, to: TemporalLevel, at: DateTime<Utc>) -> Result<(), MemoryError> {
        if to.rank() <= self.temporal_level.rank() {
            return Err(MemoryError::NonMonotonicPromotion {
                current: self.temporal_level,
                requested: to,
            });
        }
        match self.temporal_level.next() {
            Some(next) if next == to => {
                self.promoted_from_level = Some(self.temporal_level);
                self.temporal_level = to;
                self.level_entered_at = at;
                Ok(())
            }
            Some(_) => Err(MemoryError::SkippedLevel {
                current: self.temporal_level,
                requested: to,
            }),
            None => Err(MemoryError::AtTopLevel(self.memory_id)),
        }
    }

    /// Absorb a near-duplicate into this memory. Counters are summed; the
    /// absorbed memory is closed with `valid_until`.
    pub fn absorb(&mut self, absorbed: &mut Memory, at: DateTime<Utc>) -> Result<(), MemoryError> {
        if !absorbed.is_active() {
            return Err(MemoryError::Inactive(absorbed.memory_id));
        }
        self.retrieval_count += absorbed.retrieval_count;
        self.decision_count += absorbed.decision_count;
        self.positive_outcomes += absorbed.positive_outcomes;
        self.negative_outcomes += absorbed.negative_outcomes;
        self.last_used = self.last_used.max(absorbed.last_used);
        absorbed.valid_until = Some(at);
        Ok(())
    }
}

/// Result of evaluating decay for one memory, recorded verbatim in a
/// `MemoryDecayed` event so replay is deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayCandidate {
    pub previous_salience: f64,
    pub new_salience: f64,
    pub idle_days: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::salience::AdjustmentReason;

    fn memory(base: f64, level: TemporalLevel, created_at: DateTime<Utc>) -> Memory {
        Memory::new(
            MemoryId::new(),
            UserId::new(),
            MemoryContent::new(b"opaque".to_vec()),
            ContentType::Preference,
            level,
            base,
            created_at,
        )
    }

    #[test]
    fn test_effective_salience_derived_and_bounded() {
        let mut m = memory(0.6, TemporalLevel::Immediate, Utc::now());
        assert_eq!(m.effective_salience(), 0.6);

        m.outcome_adjustment = 0.7;
        assert_eq!(m.effective_salience(), 1.0);

        m.outcome_adjustment = -1.0;
        assert_eq!(m.effective_salience(), 0.0);
    }

    #[test]
    fn test_adjustment_requires_matching_previous() {
        let mut m = memory(0.6, TemporalLevel::Immediate, Utc::now());
        let row = SalienceAdjustment {
            memory_id: m.memory_id,
            adjustment_delta: 0.2,
            previous_adjustment: 0.1,
            new_adjustment: 0.3,
            reason: AdjustmentReason::OutcomeAttribution,
            source_trace_id: None,
            source_outcome_id: None,
            adjusted_at: Utc::now(),
        };
        assert!(matches!(
            m.apply_adjustment(&row).unwrap_err(),
            MemoryError::AdjustmentMismatch { .. }
        ));

        let ok = SalienceAdjustment {
            previous_adjustment: 0.0,
            new_adjustment: 0.2,
            ..row
        };
        m.apply_adjustment(&ok).unwrap();
        assert_eq!(m.outcome_adjustment, 0.2);
        assert!((m.effective_salience() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_decay_hits_floor_after_fourteen_idle_days() {
        let created = Utc::now() - Duration::days(14);
        let m = memory(0.6, TemporalLevel::Immediate, created);

        // 0.6 * 0.5^(14/2) ≈ 0.0047, floored.
        let candidate = m.decay_candidate(Utc::now()).unwrap();
        assert_eq!(candidate.idle_days, 14);
        assert_eq!(candidate.new_salience, SALIENCE_FLOOR);
    }

    #[test]
    fn test_decay_anchor_prevents_recompounding() {
        let created = Utc::now() - Duration::days(3);
        let mut m = memory(0.6, TemporalLevel::Immediate, created);

        let first = m.decay_candidate(Utc::now()).unwrap();
        m.apply_decay(first.new_salience, Utc::now());

        // Same instant again: the idle span was consumed by the first decay.
        assert!(m.decay_candidate(Utc::now()).is_none());
    }

    #[test]
    fn test_repeat_failures_penalise_base_salience() {
        let mut m = memory(0.6, TemporalLevel::Immediate, Utc::now());
        m.record_outcome(1.0);

        assert!(!m.record_outcome(-0.5));
        assert!(!m.record_outcome(-0.5));
        assert_eq!(m.base_salience, 0.6);

        // Third failure: 3 > 1 * 2.
        assert!(m.record_outcome(-0.5));
        assert!((m.base_salience - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_neutral_outcome_moves_no_counter() {
        let mut m = memory(0.6, TemporalLevel::Immediate, Utc::now());
        assert!(!m.record_outcome(0.0));
        assert_eq!(m.positive_outcomes, 0);
        assert_eq!(m.negative_outcomes, 0);
    }

    #[test]
    fn test_promotion_is_monotonic_single_step() {
        let created = Utc::now() - Duration::days(20);
        let mut m = memory(0.6, TemporalLevel::Immediate, created);
        for _ in 0..5 {
            m.record_decision(Utc::now());
        }
        for _ in 0..4 {
            m.record_outcome(1.0);
        }
        m.record_outcome(-1.0);

        assert!(m.promotion_eligible(Utc::now(), 5, 0.7));

        assert!(matches!(
            m.promote(TemporalLevel::Seasonal, Utc::now()).unwrap_err(),
            MemoryError::SkippedLevel { .. }
        ));
        m.promote(TemporalLevel::Situational, Utc::now()).unwrap();
        assert_eq!(m.temporal_level, TemporalLevel::Situational);
        assert_eq!(m.promoted_from_level, Some(TemporalLevel::Immediate));

        assert!(matches!(
            m.promote(TemporalLevel::Immediate, Utc::now()).unwrap_err(),
            MemoryError::NonMonotonicPromotion { .. }
        ));
    }

    #[test]
    fn test_promotion_needs_full_window() {
        let created = Utc::now() - Duration::days(5);
        let mut m = memory(0.6, TemporalLevel::Immediate, created);
        for _ in 0..5 {
            m.record_decision(Utc::now());
            m.record_outcome(1.0);
        }
        assert!(!m.promotion_eligible(Utc::now(), 5, 0.7));
    }

    #[test]
    fn test_absorb_sums_counters_and_closes_absorbed() {
        let now = Utc::now();
        let mut survivor = memory(0.8, TemporalLevel::Immediate, now);
        let mut absorbed = memory(0.4, TemporalLevel::Immediate, now);
        survivor.retrieval_count = 3;
        absorbed.retrieval_count = 2;
        absorbed.decision_count = 4;

        survivor.absorb(&mut absorbed, now).unwrap();
        assert_eq!(survivor.retrieval_count, 5);
        assert_eq!(survivor.decision_count, 4);
        assert_eq!(absorbed.valid_until, Some(now));

        assert!(matches!(
            survivor.absorb(&mut absorbed, now).unwrap_err(),
            MemoryError::Inactive(_)
        ));
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = MemoryContent::new(b"same bytes".to_vec());
        let b = MemoryContent::new(b"same bytes".to_vec());
        let c = MemoryContent::new(b"other bytes".to_vec());
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, c.content_hash);
    }
}
