use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::domain::{DocumentKind, UserId};
use super::error::VerificationError;
use super::progress::{load_snapshot, SnapshotView};
use super::registry::{
    CarReceipt, CarRegistration, DocumentRegistry, DocumentSubmission, SubmissionReceipt,
};
use super::repository::{AuditRecord, AuditSink, Clock, Notifier, SystemClock, VerificationStore};
use super::review::{
    AdminReviewGateway, PendingDocument, ReviewOutcome, ReviewRequest, ReviewerSession,
};
use super::upload::{BlobStore, UploadOrchestrator};

/// Authenticated owner on whose behalf a request runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerSession {
    pub caller: UserId,
}

/// Outbound collaborators shared by the registry and the review gateway.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn system(notifier: Arc<dyn Notifier>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            notifier,
            audit,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Mutation result paired with the owner's refreshed onboarding progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate<T> {
    pub result: T,
    pub progress: SnapshotView,
}

/// Facade composing submissions, car registration, reviews, and snapshots.
pub struct VerificationService<S, B> {
    store: Arc<S>,
    registry: DocumentRegistry<S, B>,
    reviews: AdminReviewGateway<S>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl<S, B> VerificationService<S, B>
where
    S: VerificationStore + 'static,
    B: BlobStore + 'static,
{
    pub fn new(
        store: Arc<S>,
        blobs: Arc<B>,
        max_upload_bytes: usize,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            notifier,
            audit,
            clock,
        } = collaborators;
        let registry = DocumentRegistry::new(
            store.clone(),
            UploadOrchestrator::new(blobs, max_upload_bytes),
            notifier.clone(),
            clock.clone(),
        );
        let reviews = AdminReviewGateway::new(store.clone(), notifier, clock.clone());

        Self {
            store,
            registry,
            reviews,
            audit,
            clock,
        }
    }

    /// Current onboarding progress for the caller.
    pub fn snapshot(
        &self,
        session: Option<&CallerSession>,
    ) -> Result<SnapshotView, VerificationError> {
        self.audited("snapshot", || {
            let caller = authenticate(session)?;
            self.progress_of(caller)
        })
    }

    pub fn submit(
        &self,
        session: Option<&CallerSession>,
        submission: DocumentSubmission,
    ) -> Result<ProgressUpdate<SubmissionReceipt>, VerificationError> {
        self.audited("submit", || {
            let caller = authenticate(session)?;
            let receipt = self.registry.submit(caller, submission)?;
            Ok(ProgressUpdate {
                result: receipt,
                progress: self.progress_of(caller)?,
            })
        })
    }

    pub fn register_car(
        &self,
        session: Option<&CallerSession>,
        registration: CarRegistration,
    ) -> Result<ProgressUpdate<CarReceipt>, VerificationError> {
        self.audited("register_car", || {
            let caller = authenticate(session)?;
            let receipt = self.registry.register_car(caller, registration)?;
            Ok(ProgressUpdate {
                result: receipt,
                progress: self.progress_of(caller)?,
            })
        })
    }

    pub fn approve(
        &self,
        reviewer: Option<&ReviewerSession>,
        request: ReviewRequest,
    ) -> Result<ProgressUpdate<ReviewOutcome>, VerificationError> {
        self.audited("approve", || {
            let reviewer = reviewer.ok_or(VerificationError::AuthenticationFailed)?;
            let outcome = self.reviews.approve(reviewer, request)?;
            Ok(ProgressUpdate {
                progress: self.progress_of(outcome.owner)?,
                result: outcome,
            })
        })
    }

    pub fn reject(
        &self,
        reviewer: Option<&ReviewerSession>,
        request: ReviewRequest,
        reason: &str,
    ) -> Result<ProgressUpdate<ReviewOutcome>, VerificationError> {
        self.audited("reject", || {
            let reviewer = reviewer.ok_or(VerificationError::AuthenticationFailed)?;
            let outcome = self.reviews.reject(reviewer, request, reason)?;
            Ok(ProgressUpdate {
                progress: self.progress_of(outcome.owner)?,
                result: outcome,
            })
        })
    }

    /// Reviewer queue of pending documents of one kind.
    pub fn pending(
        &self,
        reviewer: Option<&ReviewerSession>,
        kind: DocumentKind,
        limit: usize,
    ) -> Result<Vec<PendingDocument>, VerificationError> {
        self.audited("pending", || {
            reviewer.ok_or(VerificationError::AuthenticationFailed)?;
            self.reviews.pending(kind, limit)
        })
    }

    /// Audit a request refused before it reached an operation, such as a
    /// body that could not be decoded, and hand the error back.
    pub fn refuse(&self, origin: &'static str, error: VerificationError) -> VerificationError {
        self.record_failure(origin, &error);
        error
    }

    fn progress_of(&self, user: UserId) -> Result<SnapshotView, VerificationError> {
        let today = self.clock.now().date_naive();
        let snapshot = self.store.read(|uow| {
            if uow.user(user)?.is_none() {
                return Err(VerificationError::OwnerNotFound(user.to_string()));
            }
            Ok(load_snapshot(uow, user, today)?)
        })?;
        Ok(snapshot.view())
    }

    fn audited<T>(
        &self,
        origin: &'static str,
        operation: impl FnOnce() -> Result<T, VerificationError>,
    ) -> Result<T, VerificationError> {
        let result = operation();
        if let Err(err) = &result {
            self.record_failure(origin, err);
        }
        result
    }

    fn record_failure(&self, origin: &'static str, err: &VerificationError) {
        let code = err.code();
        if err.is_infrastructure() {
            error!(origin, code, error = %err, "verification operation failed");
        } else if matches!(err, VerificationError::AuthenticationFailed) {
            info!(origin, code, "unauthenticated verification request");
        } else {
            warn!(origin, code, error = %err, "verification request refused");
        }
        self.audit.record(AuditRecord {
            code,
            origin,
            message: err.to_string(),
            occurred_at: self.clock.now(),
        });
    }
}

fn authenticate(session: Option<&CallerSession>) -> Result<UserId, VerificationError> {
    session
        .map(|session| session.caller)
        .ok_or(VerificationError::AuthenticationFailed)
}
