use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::domain::{DocumentKind, DocumentRef, StoredDocument, UserId};
use super::error::VerificationError;
use super::repository::{
    Clock, Notifier, StoreError, UnitOfWork, VerificationEvent, VerificationStore,
};
use super::status::{apply_review_decision, ReviewDecision, VerificationStatus};

/// Largest page a reviewer queue may request.
pub const MAX_PENDING_PAGE: usize = 100;

/// Authenticated back-office identity performing reviews.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewerSession {
    pub reviewer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewRequest {
    pub document: DocumentRef,
    /// Revision the reviewer looked at; `None` skips the staleness check.
    pub expected_revision: Option<u32>,
}

impl ReviewRequest {
    pub const fn new(document: DocumentRef) -> Self {
        Self {
            document,
            expected_revision: None,
        }
    }

    pub const fn at_revision(document: DocumentRef, revision: u32) -> Self {
        Self {
            document,
            expected_revision: Some(revision),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewOutcome {
    pub document: DocumentRef,
    pub owner: UserId,
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub revision: u32,
    pub reviewed_by: String,
}

/// Queue entry shown to reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingDocument {
    pub owner: UserId,
    pub document: StoredDocument,
}

/// Back-office approve/reject entry point.
pub struct AdminReviewGateway<S> {
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl<S> AdminReviewGateway<S>
where
    S: VerificationStore,
{
    pub fn new(store: Arc<S>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    pub fn approve(
        &self,
        reviewer: &ReviewerSession,
        request: ReviewRequest,
    ) -> Result<ReviewOutcome, VerificationError> {
        self.review(reviewer, request, ReviewDecision::Approve, None)
    }

    /// Reject with a reason the owner will see; blank reasons are refused
    /// before the store is touched.
    pub fn reject(
        &self,
        reviewer: &ReviewerSession,
        request: ReviewRequest,
        reason: &str,
    ) -> Result<ReviewOutcome, VerificationError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(VerificationError::invalid(
                "reason",
                "a rejection reason is required",
            ));
        }
        self.review(reviewer, request, ReviewDecision::Reject, Some(reason))
    }

    /// Oldest-first pending documents of one kind.
    pub fn pending(
        &self,
        kind: DocumentKind,
        limit: usize,
    ) -> Result<Vec<PendingDocument>, VerificationError> {
        let limit = limit.clamp(1, MAX_PENDING_PAGE);
        self.store.read(|uow| {
            uow.documents_with_status(kind, VerificationStatus::Pending, limit)?
                .into_iter()
                .map(|document| -> Result<PendingDocument, StoreError> {
                    Ok(PendingDocument {
                        owner: document_owner(uow, &document)?,
                        document,
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(VerificationError::from)
        })
    }

    fn review(
        &self,
        reviewer: &ReviewerSession,
        request: ReviewRequest,
        decision: ReviewDecision,
        reason: Option<&str>,
    ) -> Result<ReviewOutcome, VerificationError> {
        let now = self.clock.now();
        let reference = request.document;

        let (document, owner) = self.store.transaction(|uow| {
            let mut document = uow
                .document(reference)?
                .ok_or(VerificationError::DocumentNotFound(reference))?;

            let found = document.verification().revision;
            if let Some(expected) = request.expected_revision {
                if expected != found {
                    return Err(VerificationError::StaleReview { expected, found });
                }
            }

            let transition = apply_review_decision(document.status(), decision, reason)?;
            document.verification_mut().record_review(transition, now);
            uow.update_document(document.clone())?;

            let owner = document_owner(uow, &document).map_err(|err| match err {
                StoreError::NotFound => VerificationError::OwnerNotFound(format!(
                    "owner of {} {}",
                    reference.kind, reference.id
                )),
                other => other.into(),
            })?;
            Ok((document, owner))
        })?;

        let verification = document.verification();
        info!(
            kind = %reference.kind,
            document = %reference.id,
            %owner,
            status = %verification.status,
            reviewer = %reviewer.reviewer,
            "review recorded"
        );

        let event = VerificationEvent {
            document: reference,
            owner,
            status: verification.status,
            failure_reason: verification.failure_reason.clone(),
            actor: reviewer.reviewer.clone(),
            occurred_at: now,
        };
        let template = event.template();
        if let Err(err) = self.notifier.publish(event) {
            warn!(template, %owner, error = %err, "status notification dropped");
        }

        Ok(ReviewOutcome {
            document: reference,
            owner,
            status: verification.status,
            failure_reason: verification.failure_reason.clone(),
            revision: verification.revision,
            reviewed_by: reviewer.reviewer.clone(),
        })
    }
}

/// Walk from a document to the account that owns it.
pub(crate) fn document_owner(
    uow: &dyn UnitOfWork,
    document: &StoredDocument,
) -> Result<UserId, StoreError> {
    let driver = match document {
        StoredDocument::IdentityCard(card) => return Ok(card.user_id),
        StoredDocument::DriverLicense(license) => license.driver_id,
        StoredDocument::Insurance(policy) => {
            let insured = uow
                .insured_car(policy.insured_car_id)?
                .ok_or(StoreError::NotFound)?;
            uow.driver_car_for_car(insured.car_id)?
                .ok_or(StoreError::NotFound)?
                .driver_id
        }
        StoredDocument::VehicleCard(card) => {
            uow.driver_car(card.driver_car_id)?
                .ok_or(StoreError::NotFound)?
                .driver_id
        }
    };
    Ok(uow.driver(driver)?.ok_or(StoreError::NotFound)?.user_id)
}
