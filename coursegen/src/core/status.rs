//! Run and stage status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Submitted, not yet picked up by a runner.
    #[default]
    Pending,
    /// A runner is driving the run.
    Running,
    /// Every stage succeeded.
    Completed,
    /// Some stage exhausted its retry budget.
    Failed,
    /// Cancellation stopped the run before it could complete.
    Cancelled,
}

impl RunStatus {
    /// Returns true if no further automatic progress will happen.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The status of one stage within a run.
///
/// ```text
/// blocked -> ready -> running -> succeeded
///                       |-> retry_pending -> ready
///                       |-> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Waiting on dependencies.
    #[default]
    Blocked,
    /// Dependencies succeeded; waiting for a concurrency slot.
    Ready,
    /// An attempt is in flight.
    Running,
    /// The last attempt failed and a retry is scheduled.
    RetryPending,
    /// The output was validated and recorded.
    Succeeded,
    /// The retry budget is exhausted.
    Failed,
}

impl StageStatus {
    /// Returns true for `succeeded` and `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true if the runner may move a stage from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Blocked, Self::Ready)
                | (Self::Ready, Self::Running)
                | (Self::Running, Self::Succeeded | Self::RetryPending | Self::Failed)
                | (Self::RetryPending, Self::Ready)
        )
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Blocked => write!(f, "blocked"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::RetryPending => write!(f, "retry_pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
