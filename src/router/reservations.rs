//! Reservations HTTP API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::reservation::{
    NewReservation, Reservation, ReservationStatus, total_price,
};
use crate::router::Valid;
use crate::user::User;
use crate::{AppState, ServerError};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/{id}", get(get_one))
        // `POST /reservations/{id}/cancel` goes to `cancel`.
        .route("/{id}/cancel", post(cancel))
        // `POST /reservations/{id}/complete` goes to `complete`.
        .route("/{id}/complete", post(complete))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateBody {
    pub parking_id: i64,
    pub vehicle_id: i64,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl CreateBody {
    fn check_period(&self) -> Result<(), ValidationErrors> {
        if self.end_at > self.start_at {
            return Ok(());
        }

        let mut errors = ValidationErrors::new();
        errors.add(
            "end_at",
            ValidationError::new("period")
                .with_message("Reservation must end after it starts.".into()),
        );
        Err(errors)
    }
}

/// Reservation visible to `user`: the driver who made it, or the operator of
/// its parking lot.
async fn visible_reservation(
    state: &AppState,
    user: &User,
    id: i64,
) -> Result<(Reservation, bool), ServerError> {
    let reservation = state
        .db
        .reservations
        .find_by_id(id)
        .await?
        .ok_or(ServerError::NotFound)?;

    if user.is_driver() && reservation.user_id == user.id {
        return Ok((reservation, true));
    }

    if user.is_verified_owner() {
        let parking = state
            .db
            .parkings
            .find_by_id(reservation.parking_id)
            .await?;
        if parking.is_some_and(|parking| parking.owner_id == user.id) {
            return Ok((reservation, false));
        }
    }

    Err(ServerError::Forbidden)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<Reservation>>, ServerError> {
    if !user.is_driver() {
        return Err(ServerError::Forbidden);
    }

    Ok(Json(state.db.reservations.list_by_user(user.id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<CreateBody>,
) -> Result<(StatusCode, Json<Reservation>), ServerError> {
    body.check_period()?;

    if !user.is_driver() {
        return Err(ServerError::Forbidden);
    }

    let vehicle = state
        .db
        .vehicles
        .find_by_id(body.vehicle_id)
        .await?
        .ok_or(ServerError::NotFound)?;
    if vehicle.owner_id != user.id {
        return Err(ServerError::Forbidden);
    }

    let parking = state
        .db
        .parkings
        .find_by_id(body.parking_id)
        .await?
        .ok_or(ServerError::NotFound)?;

    let reservation = state
        .db
        .reservations
        .create(NewReservation {
            user_id: user.id,
            parking_id: parking.id,
            vehicle_id: vehicle.id,
            start_at: body.start_at,
            end_at: body.end_at,
            total_price: total_price(
                body.start_at,
                body.end_at,
                parking.price_per_hour,
            ),
        })
        .await?;

    tracing::info!(
        user_id = user.id,
        parking_id = parking.id,
        reservation_id = reservation.id,
        "place reserved"
    );

    Ok((StatusCode::CREATED, Json(reservation)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<Reservation>, ServerError> {
    let (reservation, _) = visible_reservation(&state, &user, id).await?;
    Ok(Json(reservation))
}

/// Only the driver may cancel.
pub async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<Reservation>, ServerError> {
    let (_, is_driver) = visible_reservation(&state, &user, id).await?;
    if !is_driver {
        return Err(ServerError::Forbidden);
    }

    let reservation = state
        .db
        .reservations
        .close(id, ReservationStatus::Cancelled)
        .await?;
    tracing::info!(user_id = user.id, reservation_id = id, "reservation cancelled");

    Ok(Json(reservation))
}

/// The driver or the parking operator may complete.
pub async fn complete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<Reservation>, ServerError> {
    visible_reservation(&state, &user, id).await?;

    let reservation = state
        .db
        .reservations
        .close(id, ReservationStatus::Completed)
        .await?;
    tracing::info!(user_id = user.id, reservation_id = id, "reservation completed");

    Ok(Json(reservation))
}
