//! The four-state verification lifecycle shared by every document kind.
//!
//! ```text
//! UNSUBMITTED ──submit──▶ PENDING ──approve──▶ VERIFIED (terminal)
//!                            │  ▲
//!                     reject │  │ resubmit
//!                            ▼  │
//!                          FAILED
//! ```

use std::fmt;

use super::domain::Verification;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single verifiable document.
///
/// `Unsubmitted` is never persisted; it stands for the absence of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Unsubmitted,
    Pending,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            VerificationStatus::Unsubmitted => "UNSUBMITTED",
            VerificationStatus::Pending => "PENDING",
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::Failed => "FAILED",
        }
    }

    /// Pending and verified records occupy their owner key.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            VerificationStatus::Pending | VerificationStatus::Verified
        )
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, VerificationStatus::Verified)
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reviewer verdict on a pending document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    pub const fn target(self) -> VerificationStatus {
        match self {
            ReviewDecision::Approve => VerificationStatus::Verified,
            ReviewDecision::Reject => VerificationStatus::Failed,
        }
    }
}

/// Resulting state and reason after a legal review transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewTransition {
    pub status: VerificationStatus,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot move document from {from} to {to}")]
    InvalidTransition {
        from: VerificationStatus,
        to: VerificationStatus,
    },
    #[error("a non-empty rejection reason is required")]
    MissingReason,
}

/// Owners may submit when nothing occupies the key or the last attempt failed.
pub const fn can_submit(status: VerificationStatus) -> bool {
    matches!(
        status,
        VerificationStatus::Unsubmitted | VerificationStatus::Failed
    )
}

/// A missing row reads as UNSUBMITTED.
pub fn status_of(verification: Option<&Verification>) -> VerificationStatus {
    verification.map_or(VerificationStatus::Unsubmitted, |verification| {
        verification.status
    })
}

/// Validate a reviewer decision against the current status.
pub fn apply_review_decision(
    status: VerificationStatus,
    decision: ReviewDecision,
    reason: Option<&str>,
) -> Result<ReviewTransition, TransitionError> {
    if status != VerificationStatus::Pending {
        return Err(TransitionError::InvalidTransition {
            from: status,
            to: decision.target(),
        });
    }

    match decision {
        ReviewDecision::Approve => Ok(ReviewTransition {
            status: VerificationStatus::Verified,
            failure_reason: None,
        }),
        ReviewDecision::Reject => {
            let reason = reason
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .ok_or(TransitionError::MissingReason)?;
            Ok(ReviewTransition {
                status: VerificationStatus::Failed,
                failure_reason: Some(reason.to_string()),
            })
        }
    }
}
