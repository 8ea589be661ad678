use serde::Serialize;
use std::time::Instant;

use crate::{
    classifier::{Decision, Outcome},
    ledger::DeltaId,
};

use super::RecordId;

/// Where a tentative idle delta was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaTarget {
    /// A ledger record; `receipt` is present when a non-zero delta is still
    /// reversible.
    Record {
        id: RecordId,
        receipt: Option<DeltaId>,
    },
    /// The in-memory accumulator of a document that has never been saved.
    Session,
    /// A document running untracked; only session-local time moves.
    Untracked,
}

/// The single idle-gap decision awaiting confirmation, answer, undo or expiry.
/// While it exists the displayed total already includes `applied_delta`.
#[derive(Debug, Clone)]
pub struct PendingDecision {
    pub idle_seconds: u64,
    pub decision: Decision,
    pub confidence: f64,
    pub suggestion: Option<Outcome>,
    /// Outcome currently reflected in the total.
    pub applied: Outcome,
    pub applied_delta: u64,
    /// End of the undo window for auto-decisions, prompt timeout otherwise.
    pub expires_at: Instant,
    pub target: DeltaTarget,
}

impl PendingDecision {
    pub fn is_prompt(&self) -> bool {
        self.decision == Decision::Prompt
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    pub fn summary(&self, now: Instant) -> PendingSummary {
        PendingSummary {
            idle_seconds: self.idle_seconds,
            decision: self.decision,
            confidence: self.confidence,
            suggestion: self.suggestion,
            applied: self.applied,
            expires_in_secs: self.expires_at.saturating_duration_since(now).as_secs(),
        }
    }
}

/// Serializable view of a pending decision for the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub idle_seconds: u64,
    pub decision: Decision,
    pub confidence: f64,
    pub suggestion: Option<Outcome>,
    pub applied: Outcome,
    pub expires_in_secs: u64,
}
