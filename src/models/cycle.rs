//! Response cycle model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for a response cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Worker is pulling chunks from the generator.
    Running,
    /// Cancellation requested; worker has not unwound yet.
    Stopping,
    /// Worker observed the cancellation flag and stopped quietly.
    Cancelled,
    /// A confirmation gate was reached without run-code approval.
    Denied,
    /// Generator sequence was exhausted.
    Completed,
    /// Generator raised; an error chunk was emitted.
    Failed,
}

impl CycleStatus {
    /// Whether the worker has finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Denied | Self::Completed | Self::Failed
        )
    }
}

/// One run of the delegated generator, from trigger to termination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseCycle {
    /// Unique cycle identifier.
    pub id: String,
    /// Current lifecycle status.
    pub status: CycleStatus,
    /// Whether the first confirmation gate is auto-approved.
    pub run_code: bool,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
}

impl ResponseCycle {
    /// Construct a running cycle with a generated identifier.
    #[must_use]
    pub fn new(run_code: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: CycleStatus::Running,
            run_code,
            started_at: Utc::now(),
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: CycleStatus) -> bool {
        match (self.status, next) {
            (CycleStatus::Running, _) => next != CycleStatus::Running,
            (CycleStatus::Stopping, next) => next.is_terminal(),
            _ => false,
        }
    }

    /// Move to `next` if the transition is permitted; returns whether it moved.
    pub fn transition(&mut self, next: CycleStatus) -> bool {
        if self.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}
