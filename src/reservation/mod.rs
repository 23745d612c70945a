//! Reservation lifecycle.
//!
//! A reservation takes one place of a parking lot when it is created and
//! gives it back when it is cancelled or completed. Both terminal states are
//! final.
mod repository;

pub use repository::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: i64 = 3600;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "reservation_status", rename_all = "lowercase")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Whether a reservation may move from `self` to `next`.
    pub fn can_become(self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (
                ReservationStatus::Confirmed,
                ReservationStatus::Cancelled | ReservationStatus::Completed
            )
        )
    }
}

/// Reservation as saved on database.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reservation {
    pub id: i64,
    pub user_id: i64,
    pub parking_id: i64,
    pub vehicle_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub total_price: f64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

/// Reservation about to be inserted. Always starts confirmed.
#[derive(Clone, Debug, PartialEq)]
pub struct NewReservation {
    pub user_id: i64,
    pub parking_id: i64,
    pub vehicle_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub total_price: f64,
}

impl NewReservation {
    pub(crate) fn into_reservation(
        self,
        id: i64,
        created_at: DateTime<Utc>,
    ) -> Reservation {
        Reservation {
            id,
            user_id: self.user_id,
            parking_id: self.parking_id,
            vehicle_id: self.vehicle_id,
            start_at: self.start_at,
            end_at: self.end_at,
            total_price: self.total_price,
            status: ReservationStatus::Confirmed,
            created_at,
        }
    }
}

/// Price of a stay. Every started hour is billed.
pub fn total_price(
    start_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    price_per_hour: f64,
) -> f64 {
    let seconds = (end_at - start_at).num_seconds().max(0);
    let hours = (seconds + SECONDS_PER_HOUR - 1) / SECONDS_PER_HOUR;
    let price = hours as f64 * price_per_hour;

    (price * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_transitions() {
        use ReservationStatus::*;

        assert!(Confirmed.can_become(Cancelled));
        assert!(Confirmed.can_become(Completed));
        assert!(!Cancelled.can_become(Completed));
        assert!(!Completed.can_become(Cancelled));
        assert!(!Confirmed.can_become(Confirmed));
    }

    #[test]
    fn test_started_hours_are_billed() {
        let start = Utc::now();

        assert_eq!(total_price(start, start + Duration::hours(2), 2.5), 5.0);
        assert_eq!(
            total_price(start, start + Duration::minutes(61), 2.5),
            5.0
        );
        assert_eq!(
            total_price(start, start + Duration::minutes(30), 1.2),
            1.2
        );
        assert_eq!(total_price(start, start, 3.0), 0.0);
    }
}
