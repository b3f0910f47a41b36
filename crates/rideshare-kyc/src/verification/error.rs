use std::fmt;

use serde::Serialize;

use super::domain::{DocumentKind, DocumentRef};
use super::repository::StoreError;
use super::status::{TransitionError, VerificationStatus};
use super::upload::StorageError;

/// Field-level validation message surfaced verbatim to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every way a submission, registration, or review can fail.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("no authenticated session")]
    AuthenticationFailed,
    #[error("owner not found: {0}")]
    OwnerNotFound(String),
    #[error("document {} {} not found", .0.kind, .0.id)]
    DocumentNotFound(DocumentRef),
    #[error("validation failed: {}", join_fields(.0))]
    ValidationFailed(Vec<FieldError>),
    #[error("{kind} already uploaded and awaiting or past review")]
    DocumentAlreadyUploaded { kind: DocumentKind },
    #[error("an active verified insurance policy exists until {expires_on}")]
    ActivePolicyExists { expires_on: chrono::NaiveDate },
    #[error("{field} is already registered to another owner")]
    DuplicateEntry { field: &'static str },
    #[error("evidence upload failed: {0}")]
    UploadFailed(#[source] StorageError),
    #[error("cannot move document from {from} to {to}")]
    InvalidTransition {
        from: VerificationStatus,
        to: VerificationStatus,
    },
    #[error("document changed since it was loaded (expected revision {expected}, found {found})")]
    StaleReview { expected: u32, found: u32 },
    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl VerificationError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed(vec![FieldError::new(field, message)])
    }

    /// Stable machine-readable code for responses and audit records.
    pub const fn code(&self) -> &'static str {
        match self {
            VerificationError::AuthenticationFailed => "authentication_failed",
            VerificationError::OwnerNotFound(_) => "owner_not_found",
            VerificationError::DocumentNotFound(_) => "document_not_found",
            VerificationError::ValidationFailed(_) => "validation_failed",
            VerificationError::DocumentAlreadyUploaded { .. } => "document_already_uploaded",
            VerificationError::ActivePolicyExists { .. } => "active_policy_exists",
            VerificationError::DuplicateEntry { .. } => "duplicate_entry",
            VerificationError::UploadFailed(_) => "upload_failed",
            VerificationError::InvalidTransition { .. } => "invalid_transition",
            VerificationError::StaleReview { .. } => "stale_review",
            VerificationError::Persistence(_) => "persistence_error",
        }
    }

    /// Infrastructure failures are logged in full and shown to callers generically.
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            VerificationError::UploadFailed(_) | VerificationError::Persistence(_)
        )
    }

    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            VerificationError::ValidationFailed(fields) => fields,
            _ => &[],
        }
    }
}

/// Unique constraints are the last line of defence under concurrent writers;
/// the ones with a domain meaning surface as the matching domain error.
impl From<StoreError> for VerificationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict("identity_cards.id_number") => {
                VerificationError::DuplicateEntry { field: "id_number" }
            }
            StoreError::Conflict("cars.plate") => VerificationError::DuplicateEntry { field: "plate" },
            StoreError::Conflict("identity_cards.user_id") => {
                VerificationError::DocumentAlreadyUploaded {
                    kind: DocumentKind::IdentityCard,
                }
            }
            StoreError::Conflict("driver_licenses.driver_id") => {
                VerificationError::DocumentAlreadyUploaded {
                    kind: DocumentKind::DriverLicense,
                }
            }
            StoreError::Conflict("insurance_policies.insured_car_id") => {
                VerificationError::DocumentAlreadyUploaded {
                    kind: DocumentKind::Insurance,
                }
            }
            StoreError::Conflict("vehicle_cards.driver_car_id_card_type") => {
                VerificationError::DocumentAlreadyUploaded {
                    kind: DocumentKind::VehicleCard,
                }
            }
            other => VerificationError::Persistence(other),
        }
    }
}

impl From<TransitionError> for VerificationError {
    fn from(value: TransitionError) -> Self {
        match value {
            TransitionError::InvalidTransition { from, to } => {
                VerificationError::InvalidTransition { from, to }
            }
            TransitionError::MissingReason => {
                VerificationError::invalid("reason", "a rejection reason is required")
            }
        }
    }
}
