//! Parking lots and their capacity.
mod geo;
mod repository;

pub use geo::*;
pub use repository::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parking lot as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Parking {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub address: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub total_places: i32,
    /// Always within `0..=total_places`.
    pub available_places: i32,
    pub price_per_hour: f64,
    pub created_at: DateTime<Utc>,
}

impl Parking {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn occupied_places(&self) -> i32 {
        self.total_places - self.available_places
    }

    pub fn is_full(&self) -> bool {
        self.available_places <= 0
    }
}

/// Parking lot about to be inserted. Starts empty.
#[derive(Clone, Debug, PartialEq)]
pub struct NewParking {
    pub owner_id: i64,
    pub name: String,
    pub address: String,
    pub description: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub total_places: i32,
    pub price_per_hour: f64,
}

impl NewParking {
    pub(crate) fn into_parking(
        self,
        id: i64,
        created_at: DateTime<Utc>,
    ) -> Parking {
        Parking {
            id,
            owner_id: self.owner_id,
            name: self.name,
            address: self.address,
            description: self.description,
            latitude: self.latitude,
            longitude: self.longitude,
            total_places: self.total_places,
            available_places: self.total_places,
            price_per_hour: self.price_per_hour,
            created_at,
        }
    }
}

/// Partial update. `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParkingChanges {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub total_places: Option<i32>,
    pub price_per_hour: Option<f64>,
}

impl ParkingChanges {
    /// Apply changes on `parking`.
    ///
    /// Returns `false`, leaving `parking` untouched, when the new capacity is
    /// lower than the places currently taken or out of range.
    pub fn apply(&self, parking: &mut Parking) -> bool {
        if let Some(total) = self.total_places {
            let available = total
                .checked_sub(parking.total_places)
                .and_then(|delta| parking.available_places.checked_add(delta));
            let Some(available) = available.filter(|places| *places >= 0) else {
                return false;
            };
            parking.total_places = total;
            parking.available_places = available;
        }

        if let Some(name) = &self.name {
            parking.name.clone_from(name);
        }
        if let Some(address) = &self.address {
            parking.address.clone_from(address);
        }
        if let Some(description) = &self.description {
            parking.description = Some(description.clone());
        }
        if let Some(latitude) = self.latitude {
            parking.latitude = latitude;
        }
        if let Some(longitude) = self.longitude {
            parking.longitude = longitude;
        }
        if let Some(price) = self.price_per_hour {
            parking.price_per_hour = price;
        }

        true
    }
}
