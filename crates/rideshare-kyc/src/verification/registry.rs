//! Submission pipeline shared by every document kind.
//!
//! A submission is validated, planned against a read-only view (gate and
//! uniqueness), uploaded, then planned again and written inside a single
//! transaction. Planning twice keeps the fast failure path cheap while the
//! second pass is the one that holds under concurrent submitters.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    Brand, BrandId, Car, CarId, CarModel, CarModelId, CardType, DocumentFiles, DocumentId,
    DocumentKind, DocumentRef, Driver, DriverCar, DriverCarId, DriverId, DriverLicense,
    IdentityCard, InsurancePolicy, InsuredCar, InsuredCarId, InsurerId, StoredDocument, UserId,
    Verification, VehicleCard,
};
use super::error::{FieldError, VerificationError};
use super::repository::{Clock, Notifier, StoreError, UnitOfWork, VerificationEvent, VerificationStore};
use super::status::{can_submit, VerificationStatus};
use super::uniqueness::{normalize_id_number, normalize_plate, UniquenessGuard};
use super::upload::{BlobStore, Evidence, EvidenceRequirement, NamingContext, UploadOrchestrator};

const ID_NUMBER_DIGITS: usize = 10;
const MAX_POLICY_NUMBER_LEN: usize = 64;
const EARLIEST_MODEL_YEAR: u16 = 1950;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCardSubmission {
    pub id_number: String,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverLicenseSubmission {
    pub expiration_date: NaiveDate,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsuranceSubmission {
    pub car_id: CarId,
    pub policy_number: String,
    pub insurer_id: InsurerId,
    pub start_date: NaiveDate,
    pub expire_date: NaiveDate,
    pub evidence: Evidence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleCardSubmission {
    pub car_id: CarId,
    pub card_type: CardType,
    pub evidence: Evidence,
}

/// One owner submission, tagged by document kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSubmission {
    IdentityCard(IdentityCardSubmission),
    DriverLicense(DriverLicenseSubmission),
    Insurance(InsuranceSubmission),
    VehicleCard(VehicleCardSubmission),
}

impl DocumentSubmission {
    pub const fn kind(&self) -> DocumentKind {
        match self {
            DocumentSubmission::IdentityCard(_) => DocumentKind::IdentityCard,
            DocumentSubmission::DriverLicense(_) => DocumentKind::DriverLicense,
            DocumentSubmission::Insurance(_) => DocumentKind::Insurance,
            DocumentSubmission::VehicleCard(_) => DocumentKind::VehicleCard,
        }
    }

    pub fn evidence(&self) -> &Evidence {
        match self {
            DocumentSubmission::IdentityCard(submission) => &submission.evidence,
            DocumentSubmission::DriverLicense(submission) => &submission.evidence,
            DocumentSubmission::Insurance(submission) => &submission.evidence,
            DocumentSubmission::VehicleCard(submission) => &submission.evidence,
        }
    }

    fn normalized(mut self) -> Self {
        match &mut self {
            DocumentSubmission::IdentityCard(submission) => {
                submission.id_number = normalize_id_number(&submission.id_number);
            }
            DocumentSubmission::Insurance(submission) => {
                submission.policy_number = submission.policy_number.trim().to_string();
            }
            DocumentSubmission::DriverLicense(_) | DocumentSubmission::VehicleCard(_) => {}
        }
        self
    }

    fn validate(&self, today: NaiveDate) -> Vec<FieldError> {
        let mut errors = Vec::new();
        match self {
            DocumentSubmission::IdentityCard(submission) => {
                let digits = &submission.id_number;
                if digits.len() != ID_NUMBER_DIGITS || !digits.chars().all(|ch| ch.is_ascii_digit())
                {
                    errors.push(FieldError::new(
                        "id_number",
                        format!("must be exactly {ID_NUMBER_DIGITS} digits"),
                    ));
                }
            }
            DocumentSubmission::DriverLicense(submission) => {
                if submission.expiration_date <= today {
                    errors.push(FieldError::new(
                        "expiration_date",
                        "license has already expired",
                    ));
                }
            }
            DocumentSubmission::Insurance(submission) => {
                if submission.policy_number.is_empty() {
                    errors.push(FieldError::new("policy_number", "policy number is required"));
                } else if submission.policy_number.len() > MAX_POLICY_NUMBER_LEN {
                    errors.push(FieldError::new(
                        "policy_number",
                        format!("must be at most {MAX_POLICY_NUMBER_LEN} characters"),
                    ));
                }
                if submission.start_date >= submission.expire_date {
                    errors.push(FieldError::new(
                        "expire_date",
                        "must be later than start_date",
                    ));
                }
                if submission.expire_date <= today {
                    errors.push(FieldError::new("expire_date", "policy has already expired"));
                }
            }
            DocumentSubmission::VehicleCard(_) => {}
        }
        errors
    }
}

/// Vehicle details for the car-info step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarRegistration {
    pub plate: String,
    pub brand: String,
    pub model: String,
    pub color: String,
    pub year: u16,
}

impl CarRegistration {
    fn normalized(self) -> Self {
        Self {
            plate: normalize_plate(&self.plate),
            brand: self.brand.trim().to_string(),
            model: self.model.trim().to_string(),
            color: self.color.trim().to_string(),
            year: self.year,
        }
    }

    fn validate(&self, today: NaiveDate) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if !(4..=16).contains(&self.plate.chars().count())
            || !self.plate.chars().all(char::is_alphanumeric)
        {
            errors.push(FieldError::new(
                "plate",
                "must be 4-16 letters or digits",
            ));
        }
        for (field, value) in [
            ("brand", &self.brand),
            ("model", &self.model),
            ("color", &self.color),
        ] {
            if value.is_empty() {
                errors.push(FieldError::new(field, format!("{field} is required")));
            }
        }
        let latest = u16::try_from(today.year() + 1).unwrap_or(u16::MAX);
        if !(EARLIEST_MODEL_YEAR..=latest).contains(&self.year) {
            errors.push(FieldError::new(
                "year",
                format!("must be between {EARLIEST_MODEL_YEAR} and {latest}"),
            ));
        }
        errors
    }
}

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub document: DocumentRef,
    pub status: VerificationStatus,
    pub revision: u32,
    pub files: DocumentFiles,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CarReceipt {
    pub car: Car,
    pub driver_car_id: DriverCarId,
}

/// Resolved write target for a submission that passed the gate.
enum Plan<'a> {
    IdentityCard {
        submission: &'a IdentityCardSubmission,
        user: UserId,
        overwrite: Option<StoredDocument>,
    },
    DriverLicense {
        submission: &'a DriverLicenseSubmission,
        user: UserId,
        driver: Option<Driver>,
        overwrite: Option<StoredDocument>,
    },
    Insurance {
        submission: &'a InsuranceSubmission,
        car: Car,
        insured: Option<InsuredCar>,
        overwrite: Option<StoredDocument>,
    },
    VehicleCard {
        submission: &'a VehicleCardSubmission,
        link: DriverCar,
        overwrite: Option<StoredDocument>,
    },
}

impl Plan<'_> {
    fn owner_label(&self) -> String {
        match self {
            Plan::IdentityCard { user, .. } | Plan::DriverLicense { user, .. } => user.to_string(),
            Plan::Insurance { car, .. } => car.id.to_string(),
            Plan::VehicleCard {
                submission, link, ..
            } => format!(
                "{}-{}",
                link.car_id,
                match submission.card_type {
                    CardType::Blue => "blue",
                    CardType::Green => "green",
                }
            ),
        }
    }
}

/// Composes the state gate, uniqueness guard, and upload orchestrator.
pub struct DocumentRegistry<S, B> {
    store: Arc<S>,
    uploads: UploadOrchestrator<B>,
    guard: UniquenessGuard,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl<S, B> DocumentRegistry<S, B>
where
    S: VerificationStore,
    B: BlobStore,
{
    pub fn new(
        store: Arc<S>,
        uploads: UploadOrchestrator<B>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            uploads,
            guard: UniquenessGuard,
            notifier,
            clock,
        }
    }

    /// Submit or resubmit one document for `caller`.
    pub fn submit(
        &self,
        caller: UserId,
        submission: DocumentSubmission,
    ) -> Result<SubmissionReceipt, VerificationError> {
        let now = self.clock.now();
        let today = now.date_naive();
        let submission = submission.normalized();
        let kind = submission.kind();

        let mut errors = submission.validate(today);
        errors.extend(
            self.uploads
                .validate(submission.evidence(), EvidenceRequirement::for_kind(kind)),
        );
        if !errors.is_empty() {
            return Err(VerificationError::ValidationFailed(errors));
        }

        let owner = self.store.read(|uow| {
            self.plan(uow, caller, &submission, today)
                .map(|plan| plan.owner_label())
        })?;

        let files = self.uploads.persist(
            submission.evidence(),
            &NamingContext {
                category: kind,
                owner,
                timestamp: now,
            },
        )?;

        let written = self.store.transaction(|uow| {
            let plan = self.plan(uow, caller, &submission, today)?;
            self.write(uow, plan, files.clone(), now)
        });
        let document = match written {
            Ok(document) => document,
            Err(err) => {
                warn!(
                    %kind,
                    %caller,
                    front = %files.front_file_key,
                    back = files.back_file_key.as_deref().unwrap_or("-"),
                    error = %err,
                    "submission rolled back; uploaded evidence left orphaned"
                );
                return Err(err);
            }
        };

        let reference = document.reference();
        info!(%kind, document = %reference.id, %caller, "document submitted for review");
        self.publish(VerificationEvent {
            document: reference,
            owner: caller,
            status: document.status(),
            failure_reason: None,
            actor: caller.to_string(),
            occurred_at: now,
        });

        Ok(SubmissionReceipt {
            document: reference,
            status: document.status(),
            revision: document.verification().revision,
            files: document.files().clone(),
        })
    }

    /// Register a vehicle for the caller's driver profile.
    ///
    /// Brand and model rows are found or created inside the same
    /// transaction as the car and its driver link.
    pub fn register_car(
        &self,
        caller: UserId,
        registration: CarRegistration,
    ) -> Result<CarReceipt, VerificationError> {
        let today = self.clock.now().date_naive();
        let registration = registration.normalized();
        let errors = registration.validate(today);
        if !errors.is_empty() {
            return Err(VerificationError::ValidationFailed(errors));
        }

        let receipt = self.store.transaction(|uow| {
            let driver = require_driver(uow, caller)?;
            self.guard.check_plate_unique(uow, &registration.plate)?;

            let brand = find_or_create_brand(uow, &registration.brand)?;
            let model = find_or_create_model(uow, brand.id, &registration.model)?;
            let car = uow.insert_car(Car {
                id: CarId(0),
                model_id: model.id,
                plate: registration.plate.clone(),
                color: registration.color.clone(),
                year: registration.year,
            })?;
            let link = match uow.driver_car_link(driver.id, car.id)? {
                Some(link) => link,
                None => uow.insert_driver_car(DriverCar {
                    id: DriverCarId(0),
                    driver_id: driver.id,
                    car_id: car.id,
                })?,
            };

            Ok::<_, VerificationError>(CarReceipt {
                car,
                driver_car_id: link.id,
            })
        })?;

        info!(%caller, car = %receipt.car.id, plate = %receipt.car.plate, "car registered");
        Ok(receipt)
    }

    fn plan<'a>(
        &self,
        uow: &dyn UnitOfWork,
        caller: UserId,
        submission: &'a DocumentSubmission,
        today: NaiveDate,
    ) -> Result<Plan<'a>, VerificationError> {
        let user = uow
            .user(caller)?
            .ok_or_else(|| VerificationError::OwnerNotFound(caller.to_string()))?;
        let kind = submission.kind();

        match submission {
            DocumentSubmission::IdentityCard(submission) => {
                let existing = uow
                    .identity_card_for_user(user.id)?
                    .map(StoredDocument::IdentityCard);
                let overwrite = gate(kind, existing)?;
                self.guard
                    .check_identity_number_unique(uow, &submission.id_number, user.id)?;
                Ok(Plan::IdentityCard {
                    submission,
                    user: user.id,
                    overwrite,
                })
            }
            DocumentSubmission::DriverLicense(submission) => {
                let driver = uow.driver_for_user(user.id)?;
                let existing = match &driver {
                    Some(driver) => uow
                        .license_for_driver(driver.id)?
                        .map(StoredDocument::DriverLicense),
                    None => None,
                };
                let overwrite = gate(kind, existing)?;
                Ok(Plan::DriverLicense {
                    submission,
                    user: user.id,
                    driver,
                    overwrite,
                })
            }
            DocumentSubmission::Insurance(submission) => {
                let (_, car) = owned_car(uow, user.id, submission.car_id)?;
                if uow.insurer(submission.insurer_id)?.is_none() {
                    return Err(VerificationError::invalid("insurer_id", "unknown insurer"));
                }
                let insured = uow.insured_car_for_car(car.id)?;
                let current = match insured.as_ref().and_then(|insured| insured.current_policy) {
                    Some(id) => uow.document(DocumentRef {
                        kind: DocumentKind::Insurance,
                        id,
                    })?,
                    None => None,
                };
                let overwrite = insurance_gate(current, today)?;
                Ok(Plan::Insurance {
                    submission,
                    car,
                    insured,
                    overwrite,
                })
            }
            DocumentSubmission::VehicleCard(submission) => {
                let (link, _) = owned_car(uow, user.id, submission.car_id)?;
                let same_type: Vec<VehicleCard> = uow
                    .vehicle_cards_for(link.id)?
                    .into_iter()
                    .filter(|card| card.card_type == submission.card_type)
                    .collect();
                if same_type
                    .iter()
                    .any(|card| !can_submit(card.verification.status))
                {
                    return Err(VerificationError::DocumentAlreadyUploaded { kind });
                }
                let overwrite = same_type
                    .into_iter()
                    .max_by_key(|card| card.id)
                    .map(StoredDocument::VehicleCard);
                Ok(Plan::VehicleCard {
                    submission,
                    link,
                    overwrite,
                })
            }
        }
    }

    fn write(
        &self,
        uow: &mut dyn UnitOfWork,
        plan: Plan<'_>,
        files: DocumentFiles,
        now: DateTime<Utc>,
    ) -> Result<StoredDocument, VerificationError> {
        let fresh = Verification::pending(now);
        match plan {
            Plan::IdentityCard {
                submission,
                user,
                overwrite,
            } => upsert(
                uow,
                overwrite,
                StoredDocument::IdentityCard(IdentityCard {
                    id: DocumentId(0),
                    user_id: user,
                    id_number: submission.id_number.clone(),
                    files,
                    verification: fresh,
                }),
                now,
            ),
            Plan::DriverLicense {
                submission,
                user,
                driver,
                overwrite,
            } => {
                let driver = match driver {
                    Some(driver) => driver,
                    None => {
                        let driver = uow.insert_driver(Driver {
                            id: DriverId(0),
                            user_id: user,
                            created_at: now,
                        })?;
                        info!(%user, driver = %driver.id, "driver profile created");
                        driver
                    }
                };
                upsert(
                    uow,
                    overwrite,
                    StoredDocument::DriverLicense(DriverLicense {
                        id: DocumentId(0),
                        driver_id: driver.id,
                        expiration_date: submission.expiration_date,
                        files,
                        verification: fresh,
                    }),
                    now,
                )
            }
            Plan::Insurance {
                submission,
                car,
                insured,
                overwrite,
            } => {
                let mut insured = match insured {
                    Some(insured) => insured,
                    None => uow.insert_insured_car(InsuredCar {
                        id: InsuredCarId(0),
                        car_id: car.id,
                        current_policy: None,
                    })?,
                };
                let policy = upsert(
                    uow,
                    overwrite,
                    StoredDocument::Insurance(InsurancePolicy {
                        id: DocumentId(0),
                        insured_car_id: insured.id,
                        policy_number: submission.policy_number.clone(),
                        insurer_id: submission.insurer_id,
                        start_date: submission.start_date,
                        expire_date: submission.expire_date,
                        files,
                        verification: fresh,
                    }),
                    now,
                )?;
                if insured.current_policy != Some(policy.id()) {
                    insured.current_policy = Some(policy.id());
                    uow.update_insured_car(insured)?;
                }
                Ok(policy)
            }
            Plan::VehicleCard {
                submission,
                link,
                overwrite,
            } => upsert(
                uow,
                overwrite,
                StoredDocument::VehicleCard(VehicleCard {
                    id: DocumentId(0),
                    driver_car_id: link.id,
                    card_type: submission.card_type,
                    files,
                    verification: fresh,
                }),
                now,
            ),
        }
    }

    fn publish(&self, event: VerificationEvent) {
        let template = event.template();
        if let Err(err) = self.notifier.publish(event) {
            warn!(template, error = %err, "status notification dropped");
        }
    }
}

/// Generic status gate: only an absent or failed record may be replaced.
fn gate(
    kind: DocumentKind,
    existing: Option<StoredDocument>,
) -> Result<Option<StoredDocument>, VerificationError> {
    match existing {
        Some(document) if !can_submit(document.status()) => {
            Err(VerificationError::DocumentAlreadyUploaded { kind })
        }
        other => Ok(other),
    }
}

/// Insurance refinement: an expired verified policy makes room for a new row.
fn insurance_gate(
    current: Option<StoredDocument>,
    today: NaiveDate,
) -> Result<Option<StoredDocument>, VerificationError> {
    let Some(StoredDocument::Insurance(policy)) = current else {
        return Ok(None);
    };
    match policy.verification.status {
        VerificationStatus::Failed => Ok(Some(StoredDocument::Insurance(policy))),
        VerificationStatus::Pending => Err(VerificationError::DocumentAlreadyUploaded {
            kind: DocumentKind::Insurance,
        }),
        VerificationStatus::Verified if policy.is_expired_on(today) => Ok(None),
        VerificationStatus::Verified => Err(VerificationError::ActivePolicyExists {
            expires_on: policy.expire_date,
        }),
        VerificationStatus::Unsubmitted => Ok(None),
    }
}

/// Insert `fresh`, or overwrite `overwrite` in place keeping its id and
/// creation time.
fn upsert(
    uow: &mut dyn UnitOfWork,
    overwrite: Option<StoredDocument>,
    mut fresh: StoredDocument,
    now: DateTime<Utc>,
) -> Result<StoredDocument, VerificationError> {
    match overwrite {
        Some(existing) => {
            let mut verification = existing.verification().clone();
            verification.resubmit(now);
            fresh.set_id(existing.id());
            *fresh.verification_mut() = verification;
            uow.update_document(fresh.clone())?;
            Ok(fresh)
        }
        None => Ok(uow.insert_document(fresh)?),
    }
}

fn require_driver(uow: &dyn UnitOfWork, caller: UserId) -> Result<Driver, VerificationError> {
    let user = uow
        .user(caller)?
        .ok_or_else(|| VerificationError::OwnerNotFound(caller.to_string()))?;
    uow.driver_for_user(user.id)?
        .ok_or_else(|| VerificationError::OwnerNotFound(format!("{} has no driver profile", user.id)))
}

fn owned_car(
    uow: &dyn UnitOfWork,
    user: UserId,
    car_id: CarId,
) -> Result<(DriverCar, Car), VerificationError> {
    let driver = require_driver(uow, user)?;
    let car = uow
        .car(car_id)?
        .ok_or_else(|| VerificationError::OwnerNotFound(car_id.to_string()))?;
    let link = uow.driver_car_link(driver.id, car.id)?.ok_or_else(|| {
        VerificationError::OwnerNotFound(format!("{car_id} is not registered to {}", driver.id))
    })?;
    Ok((link, car))
}

fn find_or_create_brand(uow: &mut dyn UnitOfWork, name: &str) -> Result<Brand, StoreError> {
    if let Some(brand) = uow.brand_by_name(name)? {
        return Ok(brand);
    }
    uow.insert_brand(Brand {
        id: BrandId(0),
        name: name.to_string(),
    })
}

fn find_or_create_model(
    uow: &mut dyn UnitOfWork,
    brand: BrandId,
    name: &str,
) -> Result<CarModel, StoreError> {
    if let Some(model) = uow.car_model_by_name(brand, name)? {
        return Ok(model);
    }
    uow.insert_car_model(CarModel {
        id: CarModelId(0),
        brand_id: brand,
        name: name.to_string(),
    })
}
