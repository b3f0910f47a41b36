use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Brand, BrandId, Car, CarId, CarModel, DocumentKind, DocumentRef, Driver, DriverCar,
    DriverCarId, DriverId, DriverLicense, IdentityCard, InsuredCar, InsuredCarId, Insurer,
    InsurerId, StoredDocument, User, UserId, VehicleCard,
};
use super::status::VerificationStatus;

/// Error enumeration for persistence failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated on {0}")]
    Conflict(&'static str),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Row-level operations available inside a transaction.
///
/// `insert_*` methods ignore the id carried by their argument and return the
/// row with its assigned id. `update_*` methods fail with `NotFound` when the
/// row does not exist.
pub trait UnitOfWork {
    fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;
    fn insert_user(&mut self, user: User) -> Result<User, StoreError>;

    fn driver(&self, id: DriverId) -> Result<Option<Driver>, StoreError>;
    fn driver_for_user(&self, user: UserId) -> Result<Option<Driver>, StoreError>;
    fn insert_driver(&mut self, driver: Driver) -> Result<Driver, StoreError>;

    fn brand_by_name(&self, name: &str) -> Result<Option<Brand>, StoreError>;
    fn insert_brand(&mut self, brand: Brand) -> Result<Brand, StoreError>;
    fn car_model_by_name(
        &self,
        brand: BrandId,
        name: &str,
    ) -> Result<Option<CarModel>, StoreError>;
    fn insert_car_model(&mut self, model: CarModel) -> Result<CarModel, StoreError>;

    fn car(&self, id: CarId) -> Result<Option<Car>, StoreError>;
    fn car_by_plate(&self, plate: &str) -> Result<Option<Car>, StoreError>;
    fn insert_car(&mut self, car: Car) -> Result<Car, StoreError>;

    fn driver_car(&self, id: DriverCarId) -> Result<Option<DriverCar>, StoreError>;
    fn driver_car_link(
        &self,
        driver: DriverId,
        car: CarId,
    ) -> Result<Option<DriverCar>, StoreError>;
    fn driver_car_for_car(&self, car: CarId) -> Result<Option<DriverCar>, StoreError>;
    fn driver_cars(&self, driver: DriverId) -> Result<Vec<DriverCar>, StoreError>;
    fn insert_driver_car(&mut self, link: DriverCar) -> Result<DriverCar, StoreError>;

    fn insured_car(&self, id: InsuredCarId) -> Result<Option<InsuredCar>, StoreError>;
    fn insured_car_for_car(&self, car: CarId) -> Result<Option<InsuredCar>, StoreError>;
    fn insert_insured_car(&mut self, insured: InsuredCar) -> Result<InsuredCar, StoreError>;
    fn update_insured_car(&mut self, insured: InsuredCar) -> Result<(), StoreError>;

    fn insurer(&self, id: InsurerId) -> Result<Option<Insurer>, StoreError>;
    fn insert_insurer(&mut self, insurer: Insurer) -> Result<Insurer, StoreError>;

    fn identity_card_for_user(&self, user: UserId) -> Result<Option<IdentityCard>, StoreError>;
    fn identity_card_by_number(&self, id_number: &str)
        -> Result<Option<IdentityCard>, StoreError>;
    fn license_for_driver(&self, driver: DriverId) -> Result<Option<DriverLicense>, StoreError>;
    fn vehicle_cards_for(&self, link: DriverCarId) -> Result<Vec<VehicleCard>, StoreError>;

    fn document(&self, reference: DocumentRef) -> Result<Option<StoredDocument>, StoreError>;
    fn insert_document(&mut self, document: StoredDocument) -> Result<StoredDocument, StoreError>;
    fn update_document(&mut self, document: StoredDocument) -> Result<(), StoreError>;
    fn documents_with_status(
        &self,
        kind: DocumentKind,
        status: VerificationStatus,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError>;
}

/// Transactional storage abstraction so the registry can be exercised in isolation.
///
/// `transaction` must run `work` under serializable isolation and commit only
/// when it returns `Ok`; an `Err` discards every write made through the unit
/// of work.
pub trait VerificationStore: Send + Sync {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>;

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>;
}

/// Status-change notification handed to the outbound notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationEvent {
    pub document: DocumentRef,
    pub owner: UserId,
    pub status: VerificationStatus,
    pub failure_reason: Option<String>,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}

impl VerificationEvent {
    pub fn template(&self) -> &'static str {
        match self.status {
            VerificationStatus::Pending => "document_received",
            VerificationStatus::Verified => "document_verified",
            VerificationStatus::Failed => "document_rejected",
            VerificationStatus::Unsubmitted => "document_reset",
        }
    }
}

/// Fire-and-forget hook for push/e-mail adapters.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: VerificationEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Structured failure entry written for every failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub code: &'static str,
    pub origin: &'static str,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditRecord);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
