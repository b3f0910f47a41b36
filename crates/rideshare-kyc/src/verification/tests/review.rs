use super::common::*;

use crate::verification::domain::{CardType, DocumentId, DocumentKind, DocumentRef};
use crate::verification::repository::VerificationStore;
use crate::verification::review::ReviewRequest;
use crate::verification::status::VerificationStatus;
use crate::verification::VerificationError;

fn submitted_identity(h: &Harness) -> DocumentRef {
    h.service
        .submit(Some(&h.session()), identity_submission("0012345678"))
        .expect("identity submitted")
        .result
        .document
}

#[test]
fn approval_verifies_and_notifies_the_owner() {
    let (h, _) = harness();
    let document = submitted_identity(&h);
    h.clock.set(instant(2025, 6, 3));

    let update = h
        .service
        .approve(Some(&reviewer()), ReviewRequest::at_revision(document, 1))
        .expect("approved");

    assert_eq!(update.result.status, VerificationStatus::Verified);
    assert_eq!(update.result.owner, h.user);
    assert_eq!(update.result.revision, 2);
    assert_eq!(update.result.reviewed_by, "ops-maria");
    assert_eq!(
        update.progress.snapshot.identity_status,
        VerificationStatus::Verified
    );

    let stored = h
        .store
        .read(|uow| uow.document(document))
        .expect("read")
        .expect("document");
    assert_eq!(
        stored.verification().verified_at,
        Some(instant(2025, 6, 3))
    );

    let event = h.notifier.events().pop().expect("event published");
    assert_eq!(event.template(), "document_verified");
    assert_eq!(event.actor, "ops-maria");
    assert_eq!(event.owner, h.user);
}

#[test]
fn approving_a_verified_document_is_an_invalid_transition() {
    let (h, _) = harness();
    let document = submitted_identity(&h);
    h.service
        .approve(Some(&reviewer()), ReviewRequest::new(document))
        .expect("first approval");
    let verified_at = h
        .store
        .read(|uow| uow.document(document))
        .expect("read")
        .expect("document")
        .verification()
        .verified_at;

    h.clock.set(instant(2025, 6, 9));
    match h
        .service
        .approve(Some(&reviewer()), ReviewRequest::new(document))
    {
        Err(VerificationError::InvalidTransition { from, to }) => {
            assert_eq!(from, VerificationStatus::Verified);
            assert_eq!(to, VerificationStatus::Verified);
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }

    let stored = h
        .store
        .read(|uow| uow.document(document))
        .expect("read")
        .expect("document");
    assert_eq!(stored.verification().verified_at, verified_at);
}

#[test]
fn rejection_requires_a_reason() {
    let (h, _) = harness();
    let document = submitted_identity(&h);

    let err = h
        .service
        .reject(Some(&reviewer()), ReviewRequest::new(document), "   ")
        .expect_err("blank reason");
    assert_eq!(err.code(), "validation_failed");
    assert_eq!(err.field_errors()[0].field, "reason");

    let stored = h
        .store
        .read(|uow| uow.document(document))
        .expect("read")
        .expect("document");
    assert_eq!(stored.status(), VerificationStatus::Pending);
    assert_eq!(stored.verification().revision, 1);
}

#[test]
fn rejection_records_the_trimmed_reason() {
    let (h, _) = harness();
    let document = submitted_identity(&h);

    let update = h
        .service
        .reject(
            Some(&reviewer()),
            ReviewRequest::new(document),
            "  glare covers the number ",
        )
        .expect("rejected");

    assert_eq!(update.result.status, VerificationStatus::Failed);
    assert_eq!(
        update.result.failure_reason.as_deref(),
        Some("glare covers the number")
    );
    assert_eq!(
        update.progress.snapshot.identity_status,
        VerificationStatus::Failed
    );
    let event = h.notifier.events().pop().expect("event published");
    assert_eq!(event.template(), "document_rejected");
}

#[test]
fn stale_revision_is_refused_without_writing() {
    let (h, _) = harness();
    let document = submitted_identity(&h);

    match h
        .service
        .approve(Some(&reviewer()), ReviewRequest::at_revision(document, 7))
    {
        Err(VerificationError::StaleReview { expected, found }) => {
            assert_eq!(expected, 7);
            assert_eq!(found, 1);
        }
        other => panic!("expected stale review, got {other:?}"),
    }

    let stored = h
        .store
        .read(|uow| uow.document(document))
        .expect("read")
        .expect("document");
    assert_eq!(stored.status(), VerificationStatus::Pending);
}

#[test]
fn reviews_require_a_reviewer_session() {
    let (h, _) = harness();
    let document = submitted_identity(&h);

    match h.service.approve(None, ReviewRequest::new(document)) {
        Err(VerificationError::AuthenticationFailed) => {}
        other => panic!("expected authentication failure, got {other:?}"),
    }
    match h.service.pending(None, DocumentKind::IdentityCard, 10) {
        Err(VerificationError::AuthenticationFailed) => {}
        other => panic!("expected authentication failure, got {other:?}"),
    }
    let origins: Vec<_> = h.audit.records().iter().map(|record| record.origin).collect();
    assert_eq!(origins, vec!["approve", "pending"]);
}

#[test]
fn unknown_documents_are_reported() {
    let (h, _) = harness();
    let missing = DocumentRef {
        kind: DocumentKind::DriverLicense,
        id: DocumentId(404),
    };
    match h
        .service
        .approve(Some(&reviewer()), ReviewRequest::new(missing))
    {
        Err(VerificationError::DocumentNotFound(reference)) => assert_eq!(reference, missing),
        other => panic!("expected missing document, got {other:?}"),
    }
}

#[test]
fn notifier_outage_does_not_undo_the_decision() {
    let (h, _) = harness();
    let document = submitted_identity(&h);
    h.notifier.go_offline();

    let update = h
        .service
        .approve(Some(&reviewer()), ReviewRequest::new(document))
        .expect("approval survives notifier outage");
    assert_eq!(update.result.status, VerificationStatus::Verified);

    let stored = h
        .store
        .read(|uow| uow.document(document))
        .expect("read")
        .expect("document");
    assert_eq!(stored.status(), VerificationStatus::Verified);
    assert!(h.audit.records().is_empty());
}

#[test]
fn pending_queue_lists_documents_with_their_owner() {
    let (h, _) = harness();
    let car = h.driver_with_car();
    let card = h
        .service
        .submit(Some(&h.session()), card_submission(car, CardType::Green))
        .expect("card submitted")
        .result
        .document;

    let queue = h
        .service
        .pending(Some(&reviewer()), DocumentKind::VehicleCard, 10)
        .expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].owner, h.user);
    assert_eq!(queue[0].document.reference(), card);

    h.service
        .approve(Some(&reviewer()), ReviewRequest::new(card))
        .expect("approved");
    let queue = h
        .service
        .pending(Some(&reviewer()), DocumentKind::VehicleCard, 10)
        .expect("queue");
    assert!(queue.is_empty());
}

#[test]
fn insurance_reviews_resolve_the_owner_through_the_car() {
    let (h, _) = harness();
    let car = h.driver_with_car();
    let policy = h
        .service
        .submit(
            Some(&h.session()),
            insurance_submission(car, h.insurer, date(2025, 5, 1), date(2026, 5, 1)),
        )
        .expect("insurance submitted")
        .result
        .document;

    let update = h
        .service
        .approve(Some(&reviewer()), ReviewRequest::new(policy))
        .expect("approved");
    assert_eq!(update.result.owner, h.user);
    assert!(update.progress.snapshot.all_cars_insured);
    assert_eq!(
        update.progress.snapshot.cars[0].insurance.expires_on,
        Some(date(2026, 5, 1))
    );
}
