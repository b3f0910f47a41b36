//! In-process reference adapters for the store and blob seams.
//!
//! The store serialises transactions behind a mutex and stages writes on a
//! copy of the tables, so a failed unit of work never leaves partial rows.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use super::domain::{
    Brand, BrandId, Car, CarId, CarModel, CarModelId, DocumentId, DocumentKind, DocumentRef,
    Driver, DriverCar, DriverCarId, DriverId, DriverLicense, IdentityCard, InsurancePolicy,
    InsuredCar, InsuredCarId, Insurer, InsurerId, StoredDocument, User, UserId, VehicleCard,
};
use super::repository::{StoreError, UnitOfWork, VerificationStore};
use super::status::VerificationStatus;
use super::upload::{BlobStore, StorageError};

#[derive(Debug, Default, Clone)]
struct Tables {
    sequences: BTreeMap<&'static str, u64>,
    users: BTreeMap<UserId, User>,
    drivers: BTreeMap<DriverId, Driver>,
    brands: BTreeMap<BrandId, Brand>,
    car_models: BTreeMap<CarModelId, CarModel>,
    cars: BTreeMap<CarId, Car>,
    driver_cars: BTreeMap<DriverCarId, DriverCar>,
    insured_cars: BTreeMap<InsuredCarId, InsuredCar>,
    insurers: BTreeMap<InsurerId, Insurer>,
    identity_cards: BTreeMap<DocumentId, IdentityCard>,
    licenses: BTreeMap<DocumentId, DriverLicense>,
    policies: BTreeMap<DocumentId, InsurancePolicy>,
    vehicle_cards: BTreeMap<DocumentId, VehicleCard>,
}

impl Tables {
    fn allocate(&mut self, table: &'static str) -> u64 {
        let next = self.sequences.entry(table).or_insert(0);
        *next += 1;
        *next
    }

    fn check_identity_card(&self, card: &IdentityCard) -> Result<(), StoreError> {
        for existing in self.identity_cards.values().filter(|existing| existing.id != card.id) {
            if existing.user_id == card.user_id {
                return Err(StoreError::Conflict("identity_cards.user_id"));
            }
            if existing.id_number == card.id_number {
                return Err(StoreError::Conflict("identity_cards.id_number"));
            }
        }
        Ok(())
    }

    fn check_license(&self, license: &DriverLicense) -> Result<(), StoreError> {
        if self
            .licenses
            .values()
            .any(|existing| existing.id != license.id && existing.driver_id == license.driver_id)
        {
            return Err(StoreError::Conflict("driver_licenses.driver_id"));
        }
        Ok(())
    }

    fn check_vehicle_card(&self, card: &VehicleCard) -> Result<(), StoreError> {
        if card.verification.status == VerificationStatus::Failed {
            return Ok(());
        }
        let clash = self.vehicle_cards.values().any(|existing| {
            existing.id != card.id
                && existing.driver_car_id == card.driver_car_id
                && existing.card_type == card.card_type
                && existing.verification.status != VerificationStatus::Failed
        });
        if clash {
            return Err(StoreError::Conflict("vehicle_cards.driver_car_id_card_type"));
        }
        Ok(())
    }

    fn check_policy(&self, policy: &InsurancePolicy) -> Result<(), StoreError> {
        if self.insured_cars.contains_key(&policy.insured_car_id) {
            Ok(())
        } else {
            Err(StoreError::Conflict("insurance_policies.insured_car_id"))
        }
    }
}

fn limited<T, I>(items: I, limit: usize) -> Vec<T>
where
    I: Iterator<Item = T>,
{
    items.take(limit).collect()
}

impl UnitOfWork for Tables {
    fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).cloned())
    }

    fn insert_user(&mut self, mut user: User) -> Result<User, StoreError> {
        if self.users.values().any(|existing| existing.phone == user.phone) {
            return Err(StoreError::Conflict("users.phone"));
        }
        user.id = UserId(self.allocate("users"));
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn driver(&self, id: DriverId) -> Result<Option<Driver>, StoreError> {
        Ok(self.drivers.get(&id).cloned())
    }

    fn driver_for_user(&self, user: UserId) -> Result<Option<Driver>, StoreError> {
        Ok(self
            .drivers
            .values()
            .find(|driver| driver.user_id == user)
            .cloned())
    }

    fn insert_driver(&mut self, mut driver: Driver) -> Result<Driver, StoreError> {
        if self.driver_for_user(driver.user_id)?.is_some() {
            return Err(StoreError::Conflict("drivers.user_id"));
        }
        driver.id = DriverId(self.allocate("drivers"));
        self.drivers.insert(driver.id, driver.clone());
        Ok(driver)
    }

    fn brand_by_name(&self, name: &str) -> Result<Option<Brand>, StoreError> {
        Ok(self
            .brands
            .values()
            .find(|brand| brand.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    fn insert_brand(&mut self, mut brand: Brand) -> Result<Brand, StoreError> {
        if self.brand_by_name(&brand.name)?.is_some() {
            return Err(StoreError::Conflict("brands.name"));
        }
        brand.id = BrandId(self.allocate("brands"));
        self.brands.insert(brand.id, brand.clone());
        Ok(brand)
    }

    fn car_model_by_name(
        &self,
        brand: BrandId,
        name: &str,
    ) -> Result<Option<CarModel>, StoreError> {
        Ok(self
            .car_models
            .values()
            .find(|model| model.brand_id == brand && model.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    fn insert_car_model(&mut self, mut model: CarModel) -> Result<CarModel, StoreError> {
        if !self.brands.contains_key(&model.brand_id) {
            return Err(StoreError::Conflict("car_models.brand_id"));
        }
        if self.car_model_by_name(model.brand_id, &model.name)?.is_some() {
            return Err(StoreError::Conflict("car_models.name"));
        }
        model.id = CarModelId(self.allocate("car_models"));
        self.car_models.insert(model.id, model.clone());
        Ok(model)
    }

    fn car(&self, id: CarId) -> Result<Option<Car>, StoreError> {
        Ok(self.cars.get(&id).cloned())
    }

    fn car_by_plate(&self, plate: &str) -> Result<Option<Car>, StoreError> {
        Ok(self.cars.values().find(|car| car.plate == plate).cloned())
    }

    fn insert_car(&mut self, mut car: Car) -> Result<Car, StoreError> {
        if self.car_by_plate(&car.plate)?.is_some() {
            return Err(StoreError::Conflict("cars.plate"));
        }
        car.id = CarId(self.allocate("cars"));
        self.cars.insert(car.id, car.clone());
        Ok(car)
    }

    fn driver_car(&self, id: DriverCarId) -> Result<Option<DriverCar>, StoreError> {
        Ok(self.driver_cars.get(&id).cloned())
    }

    fn driver_car_link(
        &self,
        driver: DriverId,
        car: CarId,
    ) -> Result<Option<DriverCar>, StoreError> {
        Ok(self
            .driver_cars
            .values()
            .find(|link| link.driver_id == driver && link.car_id == car)
            .cloned())
    }

    fn driver_car_for_car(&self, car: CarId) -> Result<Option<DriverCar>, StoreError> {
        Ok(self
            .driver_cars
            .values()
            .find(|link| link.car_id == car)
            .cloned())
    }

    fn driver_cars(&self, driver: DriverId) -> Result<Vec<DriverCar>, StoreError> {
        Ok(self
            .driver_cars
            .values()
            .filter(|link| link.driver_id == driver)
            .cloned()
            .collect())
    }

    fn insert_driver_car(&mut self, mut link: DriverCar) -> Result<DriverCar, StoreError> {
        if self.driver_car_link(link.driver_id, link.car_id)?.is_some() {
            return Err(StoreError::Conflict("driver_cars.driver_id_car_id"));
        }
        link.id = DriverCarId(self.allocate("driver_cars"));
        self.driver_cars.insert(link.id, link.clone());
        Ok(link)
    }

    fn insured_car(&self, id: InsuredCarId) -> Result<Option<InsuredCar>, StoreError> {
        Ok(self.insured_cars.get(&id).cloned())
    }

    fn insured_car_for_car(&self, car: CarId) -> Result<Option<InsuredCar>, StoreError> {
        Ok(self
            .insured_cars
            .values()
            .find(|insured| insured.car_id == car)
            .cloned())
    }

    fn insert_insured_car(&mut self, mut insured: InsuredCar) -> Result<InsuredCar, StoreError> {
        if self.insured_car_for_car(insured.car_id)?.is_some() {
            return Err(StoreError::Conflict("insured_cars.car_id"));
        }
        insured.id = InsuredCarId(self.allocate("insured_cars"));
        self.insured_cars.insert(insured.id, insured.clone());
        Ok(insured)
    }

    fn update_insured_car(&mut self, insured: InsuredCar) -> Result<(), StoreError> {
        let slot = self
            .insured_cars
            .get_mut(&insured.id)
            .ok_or(StoreError::NotFound)?;
        *slot = insured;
        Ok(())
    }

    fn insurer(&self, id: InsurerId) -> Result<Option<Insurer>, StoreError> {
        Ok(self.insurers.get(&id).cloned())
    }

    fn insert_insurer(&mut self, mut insurer: Insurer) -> Result<Insurer, StoreError> {
        insurer.id = InsurerId(self.allocate("insurers"));
        self.insurers.insert(insurer.id, insurer.clone());
        Ok(insurer)
    }

    fn identity_card_for_user(&self, user: UserId) -> Result<Option<IdentityCard>, StoreError> {
        Ok(self
            .identity_cards
            .values()
            .find(|card| card.user_id == user)
            .cloned())
    }

    fn identity_card_by_number(
        &self,
        id_number: &str,
    ) -> Result<Option<IdentityCard>, StoreError> {
        Ok(self
            .identity_cards
            .values()
            .find(|card| card.id_number == id_number)
            .cloned())
    }

    fn license_for_driver(&self, driver: DriverId) -> Result<Option<DriverLicense>, StoreError> {
        Ok(self
            .licenses
            .values()
            .find(|license| license.driver_id == driver)
            .cloned())
    }

    fn vehicle_cards_for(&self, link: DriverCarId) -> Result<Vec<VehicleCard>, StoreError> {
        Ok(self
            .vehicle_cards
            .values()
            .filter(|card| card.driver_car_id == link)
            .cloned()
            .collect())
    }

    fn document(&self, reference: DocumentRef) -> Result<Option<StoredDocument>, StoreError> {
        let id = reference.id;
        Ok(match reference.kind {
            DocumentKind::IdentityCard => self
                .identity_cards
                .get(&id)
                .cloned()
                .map(StoredDocument::IdentityCard),
            DocumentKind::DriverLicense => self
                .licenses
                .get(&id)
                .cloned()
                .map(StoredDocument::DriverLicense),
            DocumentKind::Insurance => self.policies.get(&id).cloned().map(StoredDocument::Insurance),
            DocumentKind::VehicleCard => self
                .vehicle_cards
                .get(&id)
                .cloned()
                .map(StoredDocument::VehicleCard),
        })
    }

    fn insert_document(
        &mut self,
        mut document: StoredDocument,
    ) -> Result<StoredDocument, StoreError> {
        let table = match document.kind() {
            DocumentKind::IdentityCard => "identity_cards",
            DocumentKind::DriverLicense => "driver_licenses",
            DocumentKind::Insurance => "insurance_policies",
            DocumentKind::VehicleCard => "vehicle_cards",
        };
        // Checks run before allocation so a rejected insert does not burn an id.
        let probe = DocumentId(0);
        document.set_id(probe);
        match &document {
            StoredDocument::IdentityCard(card) => self.check_identity_card(card)?,
            StoredDocument::DriverLicense(license) => self.check_license(license)?,
            StoredDocument::Insurance(policy) => self.check_policy(policy)?,
            StoredDocument::VehicleCard(card) => self.check_vehicle_card(card)?,
        }

        document.set_id(DocumentId(self.allocate(table)));
        match document.clone() {
            StoredDocument::IdentityCard(card) => {
                self.identity_cards.insert(card.id, card);
            }
            StoredDocument::DriverLicense(license) => {
                self.licenses.insert(license.id, license);
            }
            StoredDocument::Insurance(policy) => {
                self.policies.insert(policy.id, policy);
            }
            StoredDocument::VehicleCard(card) => {
                self.vehicle_cards.insert(card.id, card);
            }
        }
        Ok(document)
    }

    fn update_document(&mut self, document: StoredDocument) -> Result<(), StoreError> {
        match document {
            StoredDocument::IdentityCard(card) => {
                self.check_identity_card(&card)?;
                let slot = self
                    .identity_cards
                    .get_mut(&card.id)
                    .ok_or(StoreError::NotFound)?;
                *slot = card;
            }
            StoredDocument::DriverLicense(license) => {
                self.check_license(&license)?;
                let slot = self
                    .licenses
                    .get_mut(&license.id)
                    .ok_or(StoreError::NotFound)?;
                *slot = license;
            }
            StoredDocument::Insurance(policy) => {
                self.check_policy(&policy)?;
                let slot = self
                    .policies
                    .get_mut(&policy.id)
                    .ok_or(StoreError::NotFound)?;
                *slot = policy;
            }
            StoredDocument::VehicleCard(card) => {
                self.check_vehicle_card(&card)?;
                let slot = self
                    .vehicle_cards
                    .get_mut(&card.id)
                    .ok_or(StoreError::NotFound)?;
                *slot = card;
            }
        }
        Ok(())
    }

    fn documents_with_status(
        &self,
        kind: DocumentKind,
        status: VerificationStatus,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        Ok(match kind {
            DocumentKind::IdentityCard => limited(
                self.identity_cards
                    .values()
                    .filter(|card| card.verification.status == status)
                    .cloned()
                    .map(StoredDocument::IdentityCard),
                limit,
            ),
            DocumentKind::DriverLicense => limited(
                self.licenses
                    .values()
                    .filter(|license| license.verification.status == status)
                    .cloned()
                    .map(StoredDocument::DriverLicense),
                limit,
            ),
            DocumentKind::Insurance => limited(
                self.policies
                    .values()
                    .filter(|policy| policy.verification.status == status)
                    .cloned()
                    .map(StoredDocument::Insurance),
                limit,
            ),
            DocumentKind::VehicleCard => limited(
                self.vehicle_cards
                    .values()
                    .filter(|card| card.verification.status == status)
                    .cloned()
                    .map(StoredDocument::VehicleCard),
                limit,
            ),
        })
    }
}

/// Mutex-serialised store with copy-on-write transactions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryVerificationStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryVerificationStore {
    /// Register a marketplace account; accounts are owned by the session provider.
    pub fn seed_user(
        &self,
        phone: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, StoreError> {
        self.transaction(|uow| {
            uow.insert_user(User {
                id: UserId(0),
                phone: phone.to_string(),
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            })
        })
    }

    pub fn seed_insurer(&self, name: &str) -> Result<Insurer, StoreError> {
        self.transaction(|uow| {
            uow.insert_insurer(Insurer {
                id: InsurerId(0),
                name: name.to_string(),
            })
        })
    }
}

impl VerificationStore for InMemoryVerificationStore {
    fn read<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>,
    {
        let guard = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        work(&*guard)
    }

    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn UnitOfWork) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        let mut staged = guard.clone();
        let value = work(&mut staged)?;
        *guard = staged;
        Ok(value)
    }
}

/// Keeps uploaded evidence in memory, keyed by object name.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn keys(&self) -> Vec<String> {
        let mut keys = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, bytes: &[u8], key: &str) -> Result<String, StorageError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Backend("blob lock poisoned".to_string()))?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(key.to_string())
    }
}
