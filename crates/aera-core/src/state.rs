//! Shared state types for client front ends.

use serde::Serialize;

/// What a client shows next to its reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncIndicator {
    Synced,
    PendingSync { pending: usize },
    Failed { failed: usize, pending: usize },
}

impl SyncIndicator {
    /// Failures take precedence over pending work
    #[must_use]
    pub const fn from_counts(pending: usize, failed: usize) -> Self {
        if failed > 0 {
            Self::Failed { failed, pending }
        } else if pending > 0 {
            Self::PendingSync { pending }
        } else {
            Self::Synced
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::PendingSync { .. } => "pending sync",
            Self::Failed { .. } => "sync failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_take_precedence() {
        assert_eq!(SyncIndicator::from_counts(0, 0), SyncIndicator::Synced);
        assert_eq!(
            SyncIndicator::from_counts(3, 0),
            SyncIndicator::PendingSync { pending: 3 }
        );
        assert_eq!(
            SyncIndicator::from_counts(3, 1),
            SyncIndicator::Failed {
                failed: 1,
                pending: 3
            }
        );
    }
}
