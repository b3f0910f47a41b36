use super::domain::UserId;
use super::error::VerificationError;
use super::repository::UnitOfWork;

/// Canonical plate form used for storage and comparison.
pub fn normalize_plate(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-')
        .flat_map(char::to_uppercase)
        .collect()
}

pub fn normalize_id_number(raw: &str) -> String {
    raw.trim().to_string()
}

/// Cross-owner uniqueness checks. Callers run them against the same unit of
/// work that performs the subsequent write.
#[derive(Debug, Default, Clone, Copy)]
pub struct UniquenessGuard;

impl UniquenessGuard {
    /// Fails when `id_number` already belongs to a different user's card.
    pub fn check_identity_number_unique(
        &self,
        uow: &dyn UnitOfWork,
        id_number: &str,
        excluding_owner: UserId,
    ) -> Result<(), VerificationError> {
        match uow.identity_card_by_number(id_number)? {
            Some(card) if card.user_id != excluding_owner => {
                Err(VerificationError::DuplicateEntry { field: "id_number" })
            }
            _ => Ok(()),
        }
    }

    pub fn check_plate_unique(
        &self,
        uow: &dyn UnitOfWork,
        plate: &str,
    ) -> Result<(), VerificationError> {
        match uow.car_by_plate(plate)? {
            Some(_) => Err(VerificationError::DuplicateEntry { field: "plate" }),
            None => Ok(()),
        }
    }
}
