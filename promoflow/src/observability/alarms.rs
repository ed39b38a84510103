//! Operator-visible alarms for failures that exhausted their retry bound.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::core::{Digest, Environment};

/// What needs operator attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    /// An approved promotion could not be written.
    ApplyExhausted,
    /// An approved promotion's source moved before it could be written.
    SourceChanged,
    /// A change proposal could not be opened.
    EmitExhausted,
    /// A superseded change proposal could not be closed.
    WithdrawExhausted,
    /// A successful build could not be recorded in `dev`.
    BuildWriteExhausted,
    /// The next hop could not be evaluated after a write.
    CascadeFailed,
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApplyExhausted => write!(f, "apply_exhausted"),
            Self::SourceChanged => write!(f, "source_changed"),
            Self::EmitExhausted => write!(f, "emit_exhausted"),
            Self::WithdrawExhausted => write!(f, "withdraw_exhausted"),
            Self::BuildWriteExhausted => write!(f, "build_write_exhausted"),
            Self::CascadeFailed => write!(f, "cascade_failed"),
        }
    }
}

/// A persistent alarm; stays active until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAlarm {
    /// Alarm ID.
    pub id: Uuid,
    /// Alarm kind.
    pub kind: AlarmKind,
    /// Target environment of the affected promotion.
    pub to: Environment,
    /// Digest of the affected promotion.
    pub digest: Digest,
    /// Last failure message.
    pub message: String,
    /// How many times the same failure was raised while active.
    pub occurrences: u32,
    /// First raised.
    pub raised_at: DateTime<Utc>,
    /// Most recently raised.
    pub last_raised_at: DateTime<Utc>,
    /// Whether an operator has acknowledged it.
    pub acknowledged: bool,
}

/// Queryable store of operator alarms.
#[derive(Debug, Default)]
pub struct AlarmBoard {
    alarms: RwLock<Vec<OperatorAlarm>>,
}

impl AlarmBoard {
    /// Creates an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises an alarm. Repeats of an active alarm for the same
    /// `(kind, to, digest)` are folded into it.
    pub fn raise(
        &self,
        kind: AlarmKind,
        to: Environment,
        digest: &Digest,
        message: impl Into<String>,
    ) -> OperatorAlarm {
        let message = message.into();
        let now = Utc::now();
        let mut alarms = self.alarms.write();

        if let Some(existing) = alarms
            .iter_mut()
            .find(|a| !a.acknowledged && a.kind == kind && a.to == to && &a.digest == digest)
        {
            existing.occurrences = existing.occurrences.saturating_add(1);
            existing.message = message;
            existing.last_raised_at = now;
            return existing.clone();
        }

        let alarm = OperatorAlarm {
            id: Uuid::new_v4(),
            kind,
            to,
            digest: digest.clone(),
            message,
            occurrences: 1,
            raised_at: now,
            last_raised_at: now,
            acknowledged: false,
        };
        tracing::error!(
            alarm_id = %alarm.id,
            kind = %kind,
            to = %to,
            digest = %digest,
            message = %alarm.message,
            "Operator alarm raised"
        );
        alarms.push(alarm.clone());
        alarm
    }

    /// Acknowledges an alarm. Returns false if no such alarm exists.
    pub fn acknowledge(&self, id: Uuid) -> bool {
        self.alarms
            .write()
            .iter_mut()
            .find(|a| a.id == id)
            .map(|a| a.acknowledged = true)
            .is_some()
    }

    /// Alarms not yet acknowledged.
    #[must_use]
    pub fn active(&self) -> Vec<OperatorAlarm> {
        self.alarms
            .read()
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// Every alarm ever raised.
    #[must_use]
    pub fn all(&self) -> Vec<OperatorAlarm> {
        self.alarms.read().clone()
    }

    /// Number of unacknowledged alarms.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.alarms.read().iter().filter(|a| !a.acknowledged).count()
    }
}
