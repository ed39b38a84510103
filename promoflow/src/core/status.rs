//! Request status and per-pair promotion state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a promotion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for approval.
    Pending,
    /// Approved; consumed once applied.
    Approved,
    /// Closed without merging.
    Rejected,
    /// Replaced by a newer candidate before approval.
    Superseded,
}

impl Default for RequestStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Superseded => write!(f, "superseded"),
        }
    }
}

impl RequestStatus {
    /// Returns true if the request will never change status again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Superseded)
    }

    /// Returns true if a transition from `self` to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved | Self::Rejected | Self::Superseded)
        )
    }
}

/// Promotion state of an adjacent `(from, to)` environment pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairState {
    /// Nothing to promote.
    Idle,
    /// `from` holds a digest that `to` has not received or been offered.
    CandidateAvailable,
    /// A pending request carries the candidate.
    Proposed,
    /// `to` records the candidate.
    Promoted,
}

impl Default for PairState {
    fn default() -> Self {
        Self::Idle
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CandidateAvailable => write!(f, "candidate_available"),
            Self::Proposed => write!(f, "proposed"),
            Self::Promoted => write!(f, "promoted"),
        }
    }
}

impl PairState {
    /// All states, for exhaustive metric exports.
    pub const ALL: [Self; 4] = [
        Self::Idle,
        Self::CandidateAvailable,
        Self::Proposed,
        Self::Promoted,
    ];
}
