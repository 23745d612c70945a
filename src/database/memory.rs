//! In-process store used when no PostgreSQL instance is configured.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::database::{RepositoryError, RepositoryResult as Result};
use crate::parking::{NewParking, Parking, ParkingChanges, ParkingRepository};
use crate::reservation::{
    NewReservation, Reservation, ReservationRepository, ReservationStatus,
};
use crate::user::{NewUser, User, UserRepository};
use crate::vehicle::{NewVehicle, Vehicle, VehicleChanges, VehicleRepository};

/// Every repository behind a single lock, so cross-table steps such as
/// taking a place are atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sequence: i64,
    users: BTreeMap<i64, User>,
    tokens: HashMap<String, i64>,
    revoked: HashSet<String>,
    parkings: BTreeMap<i64, Parking>,
    vehicles: BTreeMap<i64, Vehicle>,
    reservations: BTreeMap<i64, Reservation>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.sequence += 1;
        self.sequence
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: NewUser) -> Result<User> {
        let mut inner = self.inner.lock().await;
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::Duplicate { field: "email" });
        }

        let id = inner.next_id();
        let user = user.into_user(id, Utc::now());
        inner.users.insert(id, user.clone());

        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.inner.lock().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_token(&self, token: &str, user_id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.users.contains_key(&user_id) {
            return Err(RepositoryError::NotFound);
        }
        if inner.tokens.contains_key(token) {
            return Err(RepositoryError::Duplicate { field: "token" });
        }

        inner.tokens.insert(token.to_owned(), user_id);
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<User>> {
        let inner = self.inner.lock().await;
        if inner.revoked.contains(token) {
            return Ok(None);
        }

        Ok(inner
            .tokens
            .get(token)
            .and_then(|id| inner.users.get(id))
            .cloned())
    }

    async fn revoke_token(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.tokens.contains_key(token) {
            inner.revoked.insert(token.to_owned());
        }
        Ok(())
    }
}

#[async_trait]
impl ParkingRepository for MemoryStore {
    async fn create(&self, parking: NewParking) -> Result<Parking> {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id();
        let parking = parking.into_parking(id, Utc::now());
        inner.parkings.insert(id, parking.clone());

        Ok(parking)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Parking>> {
        Ok(self.inner.lock().await.parkings.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Parking>> {
        let inner = self.inner.lock().await;
        Ok(inner.parkings.values().rev().cloned().collect())
    }

    async fn update(&self, id: i64, changes: &ParkingChanges) -> Result<Parking> {
        let mut inner = self.inner.lock().await;
        let parking = inner
            .parkings
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;

        if !changes.apply(parking) {
            return Err(RepositoryError::Capacity);
        }

        Ok(parking.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.parkings.remove(&id).is_none() {
            return Err(RepositoryError::NotFound);
        }

        inner.reservations.retain(|_, r| r.parking_id != id);
        Ok(())
    }
}

#[async_trait]
impl VehicleRepository for MemoryStore {
    async fn create(&self, vehicle: NewVehicle) -> Result<Vehicle> {
        let mut inner = self.inner.lock().await;
        if inner
            .vehicles
            .values()
            .any(|v| v.plate == vehicle.plate.as_str())
        {
            return Err(RepositoryError::Duplicate { field: "plate" });
        }

        let id = inner.next_id();
        let vehicle = vehicle.into_vehicle(id, Utc::now());
        inner.vehicles.insert(id, vehicle.clone());

        Ok(vehicle)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Vehicle>> {
        Ok(self.inner.lock().await.vehicles.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<Vehicle>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .vehicles
            .values()
            .filter(|v| v.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update(&self, id: i64, changes: &VehicleChanges) -> Result<Vehicle> {
        let mut inner = self.inner.lock().await;

        if let Some(plate) = &changes.plate {
            if inner
                .vehicles
                .values()
                .any(|v| v.id != id && v.plate == plate.as_str())
            {
                return Err(RepositoryError::Duplicate { field: "plate" });
            }
        }

        let vehicle = inner
            .vehicles
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        changes.apply(vehicle);

        Ok(vehicle.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.vehicles.remove(&id).is_none() {
            return Err(RepositoryError::NotFound);
        }

        // Confirmed reservations of the vehicle give their place back.
        let released: Vec<i64> = inner
            .reservations
            .values()
            .filter(|r| {
                r.vehicle_id == id && r.status == ReservationStatus::Confirmed
            })
            .map(|r| r.parking_id)
            .collect();
        for parking_id in released {
            if let Some(parking) = inner.parkings.get_mut(&parking_id) {
                parking.available_places =
                    (parking.available_places + 1).min(parking.total_places);
            }
        }
        inner.reservations.retain(|_, r| r.vehicle_id != id);

        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn create(&self, reservation: NewReservation) -> Result<Reservation> {
        let mut inner = self.inner.lock().await;
        let parking = inner
            .parkings
            .get_mut(&reservation.parking_id)
            .ok_or(RepositoryError::NotFound)?;

        if parking.is_full() {
            return Err(RepositoryError::Capacity);
        }
        parking.available_places -= 1;

        let id = inner.next_id();
        let reservation = reservation.into_reservation(id, Utc::now());
        inner.reservations.insert(id, reservation.clone());

        Ok(reservation)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Reservation>> {
        Ok(self.inner.lock().await.reservations.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: i64) -> Result<Vec<Reservation>> {
        let inner = self.inner.lock().await;
        let mut reservations: Vec<Reservation> = inner
            .reservations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.start_at.cmp(&a.start_at));

        Ok(reservations)
    }

    async fn list_by_parking(&self, parking_id: i64) -> Result<Vec<Reservation>> {
        let inner = self.inner.lock().await;
        let mut reservations: Vec<Reservation> = inner
            .reservations
            .values()
            .filter(|r| r.parking_id == parking_id)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.start_at.cmp(&a.start_at));

        Ok(reservations)
    }

    async fn close(
        &self,
        id: i64,
        status: ReservationStatus,
    ) -> Result<Reservation> {
        let mut inner = self.inner.lock().await;
        let reservation = inner
            .reservations
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;

        if !reservation.status.can_become(status) {
            return Err(RepositoryError::Stale);
        }
        reservation.status = status;
        let closed = reservation.clone();

        if let Some(parking) = inner.parkings.get_mut(&closed.parking_id) {
            parking.available_places =
                (parking.available_places + 1).min(parking.total_places);
        }

        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::plate::Plate;
    use crate::user::{Role, Status};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Jane Doe".into(),
            email: email.into(),
            password: "hash".into(),
            role: Role::Driver,
            parking_photo_path: None,
            is_parking_verified: false,
            account_mode: None,
            status: Status::Active,
        }
    }

    fn new_parking(total_places: i32) -> NewParking {
        NewParking {
            owner_id: 1,
            name: "Centre".into(),
            address: "1 place du Centre".into(),
            description: None,
            latitude: 45.0,
            longitude: 4.0,
            total_places,
            price_per_hour: 2.0,
        }
    }

    fn new_reservation(parking_id: i64) -> NewReservation {
        let start_at = Utc::now();
        NewReservation {
            user_id: 1,
            parking_id,
            vehicle_id: 1,
            start_at,
            end_at: start_at + Duration::hours(1),
            total_price: 2.0,
        }
    }

    #[tokio::test]
    async fn test_email_is_unique() {
        let store = MemoryStore::default();
        UserRepository::create(&store, new_user("a@example.com"))
            .await
            .unwrap();

        let err = UserRepository::create(&store, new_user("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate { field: "email" }));
    }

    #[tokio::test]
    async fn test_revoked_token() {
        let store = MemoryStore::default();
        let user = UserRepository::create(&store, new_user("a@example.com"))
            .await
            .unwrap();

        store.insert_token("abc", user.id).await.unwrap();
        assert_eq!(store.find_by_token("abc").await.unwrap(), Some(user));

        store.revoke_token("abc").await.unwrap();
        assert_eq!(store.find_by_token("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_capacity_is_tracked() {
        let store = MemoryStore::default();
        let parking = ParkingRepository::create(&store, new_parking(1))
            .await
            .unwrap();

        let first = ReservationRepository::create(&store, new_reservation(parking.id))
            .await
            .unwrap();
        let full = ReservationRepository::create(&store, new_reservation(parking.id))
            .await
            .unwrap_err();
        assert!(matches!(full, RepositoryError::Capacity));

        store
            .close(first.id, ReservationStatus::Cancelled)
            .await
            .unwrap();
        let parking = ParkingRepository::find_by_id(&store, parking.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parking.available_places, 1);

        let stale = store
            .close(first.id, ReservationStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(stale, RepositoryError::Stale));
    }

    #[tokio::test]
    async fn test_plate_is_unique() {
        let store = MemoryStore::default();
        let vehicle = NewVehicle {
            owner_id: 1,
            plate: Plate::parse("AB-123-CD").unwrap(),
            brand: "Renault".into(),
            model: "Clio".into(),
            color: None,
        };

        VehicleRepository::create(&store, vehicle.clone())
            .await
            .unwrap();
        let err = VehicleRepository::create(&store, vehicle).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate { field: "plate" }));
    }
}
