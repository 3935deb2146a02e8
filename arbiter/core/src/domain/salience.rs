// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Append-only audit trail of outcome-driven salience changes.
//!
//! The audit rows are the source of truth for a memory's
//! `outcome_adjustment`; the field on the aggregate is a materialised cache
//! recomputable by summing rows in order. Every row satisfies
//! `previous_adjustment + adjustment_delta == new_adjustment` within
//! [`crate::domain::event::AUDIT_EPSILON`] — violations are surfaced as
//! attribution inconsistencies, never clamped away.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::decision::{OutcomeId, TraceId};
use crate::domain::event::AUDIT_EPSILON;
use crate::domain::memory::MemoryId;

/// Why an adjustment was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Proportional credit/blame from an attributed decision outcome.
    OutcomeAttribution,
    /// Operator intervention during manual review.
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalienceAdjustment {
    pub memory_id: MemoryId,
    pub adjustment_delta: f64,
    pub previous_adjustment: f64,
    pub new_adjustment: f64,
    pub reason: AdjustmentReason,
    pub source_trace_id: Option<TraceId>,
    pub source_outcome_id: Option<OutcomeId>,
    pub adjusted_at: DateTime<Utc>,
}

impl SalienceAdjustment {
    pub fn is_consistent(&self) -> bool {
        (self.previous_adjustment + self.adjustment_delta - self.new_adjustment).abs()
            <= AUDIT_EPSILON
    }
}
