use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::status::{ReviewTransition, VerificationStatus};

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

record_id!(
    /// Marketplace account, issued by the session provider.
    UserId,
    "user"
);
record_id!(DriverId, "driver");
record_id!(BrandId, "brand");
record_id!(CarModelId, "model");
record_id!(CarId, "car");
record_id!(DriverCarId, "driver-car");
record_id!(InsuredCarId, "insured-car");
record_id!(InsurerId, "insurer");
record_id!(
    /// Row id of a verifiable document, unique within its kind.
    DocumentId,
    "doc"
);

/// The four kinds of evidence the onboarding flow verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    IdentityCard,
    DriverLicense,
    Insurance,
    VehicleCard,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 4] = [
        DocumentKind::IdentityCard,
        DocumentKind::DriverLicense,
        DocumentKind::Insurance,
        DocumentKind::VehicleCard,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            DocumentKind::IdentityCard => "identity_card",
            DocumentKind::DriverLicense => "driver_license",
            DocumentKind::Insurance => "insurance",
            DocumentKind::VehicleCard => "vehicle_card",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown document kind '{0}'")]
pub struct UnknownDocumentKind(pub String);

impl FromStr for DocumentKind {
    type Err = UnknownDocumentKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        DocumentKind::ALL
            .into_iter()
            .find(|kind| kind.label() == normalized)
            .ok_or_else(|| UnknownDocumentKind(raw.to_string()))
    }
}

/// Addresses one document row for review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub id: DocumentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileKind {
    Image,
    Pdf,
}

impl FileKind {
    pub const fn extension(self) -> &'static str {
        match self {
            FileKind::Image => "jpg",
            FileKind::Pdf => "pdf",
        }
    }
}

/// Regulatory vehicle card variants. Green is the mandatory ownership card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardType {
    Blue,
    Green,
}

impl CardType {
    pub const fn is_required(self) -> bool {
        matches!(self, CardType::Green)
    }
}

/// Stable references to uploaded evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFiles {
    pub front_file_key: String,
    pub back_file_key: Option<String>,
    pub file_kind: FileKind,
}

/// Verification bookkeeping shared by every document row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerificationStatus,
    pub failure_reason: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every write; reviewers echo it back for optimistic checks.
    pub revision: u32,
}

impl Verification {
    pub fn pending(now: DateTime<Utc>) -> Self {
        Self {
            status: VerificationStatus::Pending,
            failure_reason: None,
            verified_at: None,
            created_at: now,
            updated_at: now,
            revision: 1,
        }
    }

    /// Owner resubmission after a rejection; keeps `created_at`.
    pub fn resubmit(&mut self, now: DateTime<Utc>) {
        self.status = VerificationStatus::Pending;
        self.failure_reason = None;
        self.verified_at = None;
        self.updated_at = now;
        self.revision += 1;
    }

    pub fn record_review(&mut self, transition: ReviewTransition, now: DateTime<Utc>) {
        self.verified_at = match transition.status {
            VerificationStatus::Verified => Some(now),
            _ => None,
        };
        self.status = transition.status;
        self.failure_reason = transition.failure_reason;
        self.updated_at = now;
        self.revision += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCard {
    pub id: DocumentId,
    pub user_id: UserId,
    pub id_number: String,
    pub files: DocumentFiles,
    pub verification: Verification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverLicense {
    pub id: DocumentId,
    pub driver_id: DriverId,
    pub expiration_date: NaiveDate,
    pub files: DocumentFiles,
    pub verification: Verification,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub id: DocumentId,
    pub insured_car_id: InsuredCarId,
    pub policy_number: String,
    pub insurer_id: InsurerId,
    pub start_date: NaiveDate,
    pub expire_date: NaiveDate,
    pub files: DocumentFiles,
    pub verification: Verification,
}

impl InsurancePolicy {
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expire_date < today
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleCard {
    pub id: DocumentId,
    pub driver_car_id: DriverCarId,
    pub card_type: CardType,
    pub files: DocumentFiles,
    pub verification: Verification,
}

/// Tagged union over the four document tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredDocument {
    IdentityCard(IdentityCard),
    DriverLicense(DriverLicense),
    Insurance(InsurancePolicy),
    VehicleCard(VehicleCard),
}

impl StoredDocument {
    pub const fn kind(&self) -> DocumentKind {
        match self {
            StoredDocument::IdentityCard(_) => DocumentKind::IdentityCard,
            StoredDocument::DriverLicense(_) => DocumentKind::DriverLicense,
            StoredDocument::Insurance(_) => DocumentKind::Insurance,
            StoredDocument::VehicleCard(_) => DocumentKind::VehicleCard,
        }
    }

    pub const fn id(&self) -> DocumentId {
        match self {
            StoredDocument::IdentityCard(card) => card.id,
            StoredDocument::DriverLicense(license) => license.id,
            StoredDocument::Insurance(policy) => policy.id,
            StoredDocument::VehicleCard(card) => card.id,
        }
    }

    pub fn reference(&self) -> DocumentRef {
        DocumentRef {
            kind: self.kind(),
            id: self.id(),
        }
    }

    pub fn set_id(&mut self, id: DocumentId) {
        match self {
            StoredDocument::IdentityCard(card) => card.id = id,
            StoredDocument::DriverLicense(license) => license.id = id,
            StoredDocument::Insurance(policy) => policy.id = id,
            StoredDocument::VehicleCard(card) => card.id = id,
        }
    }

    pub fn verification(&self) -> &Verification {
        match self {
            StoredDocument::IdentityCard(card) => &card.verification,
            StoredDocument::DriverLicense(license) => &license.verification,
            StoredDocument::Insurance(policy) => &policy.verification,
            StoredDocument::VehicleCard(card) => &card.verification,
        }
    }

    pub fn verification_mut(&mut self) -> &mut Verification {
        match self {
            StoredDocument::IdentityCard(card) => &mut card.verification,
            StoredDocument::DriverLicense(license) => &mut license.verification,
            StoredDocument::Insurance(policy) => &mut policy.verification,
            StoredDocument::VehicleCard(card) => &mut card.verification,
        }
    }

    pub fn files(&self) -> &DocumentFiles {
        match self {
            StoredDocument::IdentityCard(card) => &card.files,
            StoredDocument::DriverLicense(license) => &license.files,
            StoredDocument::Insurance(policy) => &policy.files,
            StoredDocument::VehicleCard(card) => &card.files,
        }
    }

    pub fn status(&self) -> VerificationStatus {
        self.verification().status
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
}

/// Role record linking a user to the vehicles they operate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: DriverId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brand {
    pub id: BrandId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarModel {
    pub id: CarModelId,
    pub brand_id: BrandId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Car {
    pub id: CarId,
    pub model_id: CarModelId,
    pub plate: String,
    pub color: String,
    pub year: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverCar {
    pub id: DriverCarId,
    pub driver_id: DriverId,
    pub car_id: CarId,
}

/// Insurance history of one car; `current_policy` points at the live policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuredCar {
    pub id: InsuredCarId,
    pub car_id: CarId,
    pub current_policy: Option<DocumentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insurer {
    pub id: InsurerId,
    pub name: String,
}
