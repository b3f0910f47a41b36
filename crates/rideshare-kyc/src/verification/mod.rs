//! Verification lifecycle shared by identity cards, driver licenses,
//! insurance policies, and vehicle cards.

pub mod domain;
pub mod error;
pub mod memory;
pub mod progress;
pub mod registry;
pub mod repository;
pub mod review;
pub mod router;
pub mod service;
pub mod status;
pub(crate) mod uniqueness;
pub mod upload;

#[cfg(test)]
mod tests;

pub use domain::{
    Brand, Car, CarId, CarModel, CardType, DocumentFiles, DocumentId, DocumentKind, DocumentRef,
    Driver, DriverCar, DriverCarId, DriverLicense, IdentityCard, InsurancePolicy, InsuredCar,
    FileKind, Insurer, InsurerId, StoredDocument, User, UserId, Verification, VehicleCard,
};
pub use error::{FieldError, VerificationError};
pub use memory::{InMemoryBlobStore, InMemoryVerificationStore};
pub use progress::{
    is_complete, next_step, CarStatusView, DocumentStatusView, InsuranceStatusView,
    OnboardingSnapshot, OnboardingStep, SnapshotView,
};
pub use registry::{
    CarReceipt, CarRegistration, DocumentSubmission, DriverLicenseSubmission,
    IdentityCardSubmission, InsuranceSubmission, SubmissionReceipt, VehicleCardSubmission,
};
pub use repository::{
    AuditRecord, AuditSink, Clock, Notifier, NotifyError, StoreError, SystemClock, UnitOfWork,
    VerificationEvent, VerificationStore,
};
pub use review::{PendingDocument, ReviewOutcome, ReviewRequest, ReviewerSession};
pub use router::{verification_router, CALLER_HEADER, REVIEWER_HEADER};
pub use service::{CallerSession, Collaborators, ProgressUpdate, VerificationService};
pub use status::{
    apply_review_decision, can_submit, status_of, ReviewDecision, VerificationStatus,
};
pub use upload::{BlobStore, Evidence, StorageError};
