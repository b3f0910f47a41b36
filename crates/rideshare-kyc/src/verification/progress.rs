//! Aggregate onboarding snapshot and the next-step resolver.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::domain::{CarId, DocumentKind, DocumentRef, StoredDocument, UserId};
use super::repository::{StoreError, UnitOfWork};
use super::status::{status_of, VerificationStatus};

/// Onboarding screens, in the order a fresh driver meets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnboardingStep {
    IdentityCard,
    DriverLicense,
    CarInfo,
    Insurance,
    CarCard,
}

impl OnboardingStep {
    pub const fn label(self) -> &'static str {
        match self {
            OnboardingStep::IdentityCard => "identityCard",
            OnboardingStep::DriverLicense => "driverLicense",
            OnboardingStep::CarInfo => "carInfo",
            OnboardingStep::Insurance => "insurance",
            OnboardingStep::CarCard => "carCard",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatusView {
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl DocumentStatusView {
    pub const fn unsubmitted() -> Self {
        Self {
            status: VerificationStatus::Unsubmitted,
            failure_reason: None,
        }
    }

    fn of(document: Option<&StoredDocument>) -> Self {
        let verification = document.map(StoredDocument::verification);
        Self {
            status: status_of(verification),
            failure_reason: verification.and_then(|v| v.failure_reason.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceStatusView {
    pub status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_on: Option<NaiveDate>,
    #[serde(default)]
    pub expired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarStatusView {
    pub car_id: CarId,
    pub plate: String,
    pub insurance: InsuranceStatusView,
    /// Status of the mandatory green card, if one was ever submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_card: Option<DocumentStatusView>,
}

/// Read model of every document status for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingSnapshot {
    pub identity_status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_failure_reason: Option<String>,
    pub license_status: VerificationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_failure_reason: Option<String>,
    pub has_registered_car: bool,
    pub cars: Vec<CarStatusView>,
    pub all_cars_insured: bool,
    pub has_pending_insurance: bool,
    pub has_all_required_cards: bool,
    pub has_pending_cards: bool,
}

impl OnboardingSnapshot {
    /// Snapshot of a user with nothing submitted.
    pub fn empty() -> Self {
        Self {
            identity_status: VerificationStatus::Unsubmitted,
            identity_failure_reason: None,
            license_status: VerificationStatus::Unsubmitted,
            license_failure_reason: None,
            has_registered_car: false,
            cars: Vec::new(),
            all_cars_insured: false,
            has_pending_insurance: false,
            has_all_required_cards: false,
            has_pending_cards: false,
        }
    }

    pub fn view(self) -> SnapshotView {
        SnapshotView {
            next_step: next_step(&self),
            complete: is_complete(&self),
            snapshot: self,
        }
    }
}

/// Snapshot plus the resolved step, as handed to callers after every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotView {
    #[serde(flatten)]
    pub snapshot: OnboardingSnapshot,
    pub next_step: OnboardingStep,
    pub complete: bool,
}

/// Resolve the single screen the user must complete next.
///
/// Precedence is fixed: identity outranks every later stage no matter how
/// complete those stages are.
pub fn next_step(snapshot: &OnboardingSnapshot) -> OnboardingStep {
    use VerificationStatus::{Failed, Unsubmitted};

    if matches!(snapshot.identity_status, Unsubmitted | Failed) {
        return OnboardingStep::IdentityCard;
    }
    if snapshot.license_status == Unsubmitted {
        return OnboardingStep::DriverLicense;
    }
    if snapshot.license_status == Failed {
        return OnboardingStep::DriverLicense;
    }
    if snapshot.identity_status.is_active()
        && snapshot.license_status.is_active()
        && !snapshot.has_registered_car
    {
        return OnboardingStep::CarInfo;
    }
    if snapshot.has_registered_car
        && !snapshot.all_cars_insured
        && !snapshot.has_pending_insurance
    {
        return OnboardingStep::Insurance;
    }
    if snapshot.has_registered_car
        && !snapshot.has_all_required_cards
        && !snapshot.has_pending_cards
    {
        return OnboardingStep::CarCard;
    }
    OnboardingStep::IdentityCard
}

/// Every stage verified; nothing left for the owner or a reviewer.
pub fn is_complete(snapshot: &OnboardingSnapshot) -> bool {
    snapshot.identity_status == VerificationStatus::Verified
        && snapshot.license_status == VerificationStatus::Verified
        && snapshot.has_registered_car
        && snapshot.all_cars_insured
        && snapshot.has_all_required_cards
}

/// Build the snapshot from current rows. Absent driver or cars yield the
/// corresponding unsubmitted/false values rather than errors.
pub fn load_snapshot(
    uow: &dyn UnitOfWork,
    user: UserId,
    today: NaiveDate,
) -> Result<OnboardingSnapshot, StoreError> {
    let mut snapshot = OnboardingSnapshot::empty();

    if let Some(card) = uow.identity_card_for_user(user)? {
        snapshot.identity_status = card.verification.status;
        snapshot.identity_failure_reason = card.verification.failure_reason;
    }

    let Some(driver) = uow.driver_for_user(user)? else {
        return Ok(snapshot);
    };

    if let Some(license) = uow.license_for_driver(driver.id)? {
        snapshot.license_status = license.verification.status;
        snapshot.license_failure_reason = license.verification.failure_reason;
    }

    for link in uow.driver_cars(driver.id)? {
        let car = uow.car(link.car_id)?.ok_or(StoreError::NotFound)?;

        let current_policy = match uow.insured_car_for_car(car.id)? {
            Some(insured) => match insured.current_policy {
                Some(id) => uow.document(DocumentRef {
                    kind: DocumentKind::Insurance,
                    id,
                })?,
                None => None,
            },
            None => None,
        };
        let insurance = match current_policy {
            Some(StoredDocument::Insurance(policy)) => InsuranceStatusView {
                expired: policy.is_expired_on(today),
                expires_on: Some(policy.expire_date),
                status: policy.verification.status,
                failure_reason: policy.verification.failure_reason,
            },
            _ => InsuranceStatusView {
                status: VerificationStatus::Unsubmitted,
                failure_reason: None,
                expires_on: None,
                expired: false,
            },
        };

        // optional cards neither satisfy nor hold back the card step
        let required_card = uow
            .vehicle_cards_for(link.id)?
            .into_iter()
            .filter(|card| card.card_type.is_required())
            .max_by_key(|card| card.id)
            .map(StoredDocument::VehicleCard);

        snapshot.cars.push(CarStatusView {
            car_id: car.id,
            plate: car.plate,
            insurance,
            vehicle_card: required_card
                .as_ref()
                .map(|card| DocumentStatusView::of(Some(card))),
        });
    }

    let cars = &snapshot.cars;
    snapshot.has_registered_car = !cars.is_empty();
    snapshot.all_cars_insured = snapshot.has_registered_car
        && cars.iter().all(|car| {
            car.insurance.status == VerificationStatus::Verified && !car.insurance.expired
        });
    snapshot.has_pending_insurance = cars
        .iter()
        .any(|car| car.insurance.status == VerificationStatus::Pending);
    snapshot.has_all_required_cards = snapshot.has_registered_car
        && cars.iter().all(|car| {
            car.vehicle_card
                .as_ref()
                .is_some_and(|card| card.status == VerificationStatus::Verified)
        });
    snapshot.has_pending_cards = cars.iter().any(|car| {
        car.vehicle_card
            .as_ref()
            .is_some_and(|card| card.status == VerificationStatus::Pending)
    });

    Ok(snapshot)
}
