use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::verification::domain::{CarId, CardType, InsurerId, UserId};
use crate::verification::memory::{InMemoryBlobStore, InMemoryVerificationStore};
use crate::verification::registry::{
    CarRegistration, DocumentSubmission, DriverLicenseSubmission, IdentityCardSubmission,
    InsuranceSubmission, VehicleCardSubmission,
};
use crate::verification::repository::{
    AuditRecord, AuditSink, Clock, Notifier, NotifyError, StoreError, UnitOfWork,
    VerificationEvent, VerificationStore,
};
use crate::verification::review::ReviewerSession;
use crate::verification::service::{CallerSession, Collaborators, VerificationService};
use crate::verification::upload::{BlobStore, Evidence, StorageError};

pub(super) const MAX_UPLOAD_BYTES: usize = 1024;

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn instant(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub(super) fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

#[derive(Default)]
pub(super) struct MemoryNotifier {
    events: Mutex<Vec<VerificationEvent>>,
    offline: AtomicBool,
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<VerificationEvent> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn go_offline(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }
}

impl Notifier for MemoryNotifier {
    fn publish(&self, event: VerificationEvent) -> Result<(), NotifyError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NotifyError::Transport("push gateway timeout".to_string()));
        }
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(event);
        Ok(())
    }
}

#[derive(Default)]
pub(super) struct MemoryAudit {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAudit {
    pub(super) fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit mutex poisoned").clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, entry: AuditRecord) {
        self.records
            .lock()
            .expect("audit mutex poisoned")
            .push(entry);
    }
}

pub(super) struct OfflineBlobs;

impl BlobStore for OfflineBlobs {
    fn put(&self, _bytes: &[u8], _key: &str) -> Result<String, StorageError> {
        Err(StorageError::Backend("bucket unreachable".to_string()))
    }
}

/// Store whose every call fails as if the database were down.
pub(super) struct UnavailableStore;

impl VerificationStore for UnavailableStore {
    fn read<T, E, F>(&self, _work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>,
    {
        Err(StoreError::Unavailable("connection refused".to_string()).into())
    }

    fn transaction<T, E, F>(&self, _work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>,
    {
        Err(StoreError::Unavailable("connection refused".to_string()).into())
    }
}

pub(super) struct Harness<B = InMemoryBlobStore> {
    pub service: Arc<VerificationService<InMemoryVerificationStore, B>>,
    pub store: Arc<InMemoryVerificationStore>,
    pub notifier: Arc<MemoryNotifier>,
    pub audit: Arc<MemoryAudit>,
    pub clock: Arc<FixedClock>,
    pub user: UserId,
    pub insurer: InsurerId,
}

pub(super) fn harness() -> (Harness, Arc<InMemoryBlobStore>) {
    let blobs = Arc::new(InMemoryBlobStore::default());
    (harness_with(blobs.clone()), blobs)
}

pub(super) fn harness_with<B>(blobs: Arc<B>) -> Harness<B>
where
    B: BlobStore + 'static,
{
    let store = Arc::new(InMemoryVerificationStore::default());
    let user = store
        .seed_user("+15550100", "Dana", "Reyes")
        .expect("seed user");
    let insurer = store.seed_insurer("Pacific Mutual").expect("seed insurer");

    let notifier = Arc::new(MemoryNotifier::default());
    let audit = Arc::new(MemoryAudit::default());
    let clock = Arc::new(FixedClock::at(instant(2025, 6, 1)));
    let notifier_port: Arc<dyn Notifier> = notifier.clone();
    let audit_port: Arc<dyn AuditSink> = audit.clone();
    let clock_port: Arc<dyn Clock> = clock.clone();

    let service = Arc::new(VerificationService::new(
        store.clone(),
        blobs,
        MAX_UPLOAD_BYTES,
        Collaborators {
            notifier: notifier_port,
            audit: audit_port,
            clock: clock_port,
        },
    ));

    Harness {
        service,
        store,
        notifier,
        audit,
        clock,
        user: user.id,
        insurer: insurer.id,
    }
}

pub(super) fn unavailable_service() -> (
    Arc<VerificationService<UnavailableStore, InMemoryBlobStore>>,
    Arc<MemoryAudit>,
) {
    let audit = Arc::new(MemoryAudit::default());
    let audit_port: Arc<dyn AuditSink> = audit.clone();
    let service = VerificationService::new(
        Arc::new(UnavailableStore),
        Arc::new(InMemoryBlobStore::default()),
        MAX_UPLOAD_BYTES,
        Collaborators {
            notifier: Arc::new(MemoryNotifier::default()),
            audit: audit_port,
            clock: Arc::new(FixedClock::at(instant(2025, 6, 1))),
        },
    );
    (Arc::new(service), audit)
}

impl<B> Harness<B>
where
    B: BlobStore + 'static,
{
    pub(super) fn session(&self) -> CallerSession {
        CallerSession { caller: self.user }
    }

    pub(super) fn second_user(&self) -> UserId {
        self.store
            .seed_user("+15550199", "Sam", "Okafor")
            .expect("seed second user")
            .id
    }

    /// Identity and license submitted, one car registered.
    pub(super) fn driver_with_car(&self) -> CarId {
        let session = self.session();
        self.service
            .submit(Some(&session), identity_submission("0012345678"))
            .expect("identity submitted");
        self.service
            .submit(Some(&session), license_submission())
            .expect("license submitted");
        self.service
            .register_car(Some(&session), car_registration("12 AB 345"))
            .expect("car registered")
            .result
            .car
            .id
    }
}

pub(super) fn reviewer() -> ReviewerSession {
    ReviewerSession {
        reviewer: "ops-maria".to_string(),
    }
}

pub(super) fn photos() -> Evidence {
    Evidence::images(b"front-photo".to_vec(), b"back-photo".to_vec())
}

pub(super) fn identity_submission(id_number: &str) -> DocumentSubmission {
    DocumentSubmission::IdentityCard(IdentityCardSubmission {
        id_number: id_number.to_string(),
        evidence: photos(),
    })
}

pub(super) fn license_submission() -> DocumentSubmission {
    DocumentSubmission::DriverLicense(DriverLicenseSubmission {
        expiration_date: date(2028, 1, 1),
        evidence: photos(),
    })
}

pub(super) fn insurance_submission(
    car_id: CarId,
    insurer_id: InsurerId,
    start_date: NaiveDate,
    expire_date: NaiveDate,
) -> DocumentSubmission {
    DocumentSubmission::Insurance(InsuranceSubmission {
        car_id,
        policy_number: "PM-2025-0042".to_string(),
        insurer_id,
        start_date,
        expire_date,
        evidence: Evidence::pdf(b"%PDF-1.7 policy".to_vec()),
    })
}

pub(super) fn card_submission(car_id: CarId, card_type: CardType) -> DocumentSubmission {
    DocumentSubmission::VehicleCard(VehicleCardSubmission {
        car_id,
        card_type,
        evidence: photos(),
    })
}

pub(super) fn car_registration(plate: &str) -> CarRegistration {
    CarRegistration {
        plate: plate.to_string(),
        brand: "Toyota".to_string(),
        model: "Corolla".to_string(),
        color: "white".to_string(),
        year: 2019,
    }
}

pub(super) async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

pub(super) async fn assert_error(response: Response, status: StatusCode, code: &str) -> Value {
    assert_eq!(response.status(), status);
    let body = json_body(response).await;
    assert_eq!(body["error"], code);
    body
}
