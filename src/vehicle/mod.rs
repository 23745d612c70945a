//! Drivers' vehicles.
mod repository;

pub use repository::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plate::Plate;

/// Vehicle as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vehicle {
    pub id: i64,
    pub owner_id: i64,
    /// Normalized plate, unique.
    pub plate: String,
    pub brand: String,
    pub model: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Vehicle about to be inserted.
#[derive(Clone, Debug, PartialEq)]
pub struct NewVehicle {
    pub owner_id: i64,
    pub plate: Plate,
    pub brand: String,
    pub model: String,
    pub color: Option<String>,
}

impl NewVehicle {
    pub(crate) fn into_vehicle(
        self,
        id: i64,
        created_at: DateTime<Utc>,
    ) -> Vehicle {
        Vehicle {
            id,
            owner_id: self.owner_id,
            plate: self.plate.into_string(),
            brand: self.brand,
            model: self.model,
            color: self.color,
            created_at,
        }
    }
}

/// Partial update. `None` keeps the current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VehicleChanges {
    pub plate: Option<Plate>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
}

impl VehicleChanges {
    pub fn apply(&self, vehicle: &mut Vehicle) {
        if let Some(plate) = &self.plate {
            vehicle.plate = plate.as_str().to_owned();
        }
        if let Some(brand) = &self.brand {
            vehicle.brand.clone_from(brand);
        }
        if let Some(model) = &self.model {
            vehicle.model.clone_from(model);
        }
        if let Some(color) = &self.color {
            vehicle.color = Some(color.clone());
        }
    }
}
