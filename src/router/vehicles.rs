//! Drivers' vehicles HTTP API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::plate::Plate;
use crate::router::Valid;
use crate::user::User;
use crate::vehicle::{NewVehicle, Vehicle, VehicleChanges};
use crate::{AppState, ServerError};

pub fn router() -> Router<AppState> {
    Router::new()
        // `GET /vehicles` lists the driver's vehicles.
        .route("/", get(list).post(create))
        .route("/{id}", get(get_one).patch(update).delete(delete))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateBody {
    #[validate(custom(function = "crate::plate::validate_plate"))]
    pub plate: String,
    #[validate(length(min = 1, max = 100, message = "Brand must contain between 1 and 100 characters."))]
    pub brand: String,
    #[validate(length(min = 1, max = 100, message = "Model must contain between 1 and 100 characters."))]
    pub model: String,
    #[validate(length(max = 50))]
    pub color: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateBody {
    #[validate(custom(function = "crate::plate::validate_plate"))]
    pub plate: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub brand: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub model: Option<String>,
    #[validate(length(max = 50))]
    pub color: Option<String>,
}

fn parse_plate(raw: &str) -> Result<Plate, ServerError> {
    Plate::parse(raw).map_err(|err| {
        let mut errors = ValidationErrors::new();
        errors.add(
            "plate",
            ValidationError::new(err.code()).with_message(err.to_string().into()),
        );
        ServerError::Validation(errors)
    })
}

fn ensure_driver(user: &User) -> Result<(), ServerError> {
    if user.is_driver() {
        Ok(())
    } else {
        Err(ServerError::Forbidden)
    }
}

async fn owned_vehicle(
    state: &AppState,
    user: &User,
    id: i64,
) -> Result<Vehicle, ServerError> {
    ensure_driver(user)?;

    let vehicle = state
        .db
        .vehicles
        .find_by_id(id)
        .await?
        .ok_or(ServerError::NotFound)?;

    if vehicle.owner_id != user.id {
        return Err(ServerError::Forbidden);
    }

    Ok(vehicle)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<Vehicle>>, ServerError> {
    ensure_driver(&user)?;

    Ok(Json(state.db.vehicles.list_by_owner(user.id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<CreateBody>,
) -> Result<(StatusCode, Json<Vehicle>), ServerError> {
    ensure_driver(&user)?;

    let vehicle = state
        .db
        .vehicles
        .create(NewVehicle {
            owner_id: user.id,
            plate: parse_plate(&body.plate)?,
            brand: body.brand,
            model: body.model,
            color: body.color,
        })
        .await?;

    tracing::info!(user_id = user.id, vehicle_id = vehicle.id, "vehicle registered");

    Ok((StatusCode::CREATED, Json(vehicle)))
}

pub async fn get_one(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<Vehicle>, ServerError> {
    Ok(Json(owned_vehicle(&state, &user, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Valid(body): Valid<UpdateBody>,
) -> Result<Json<Vehicle>, ServerError> {
    owned_vehicle(&state, &user, id).await?;

    let changes = VehicleChanges {
        plate: body.plate.as_deref().map(parse_plate).transpose()?,
        brand: body.brand,
        model: body.model,
        color: body.color,
    };

    Ok(Json(state.db.vehicles.update(id, &changes).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    owned_vehicle(&state, &user, id).await?;

    state.db.vehicles.delete(id).await?;
    tracing::info!(user_id = user.id, vehicle_id = id, "vehicle deleted");

    Ok(StatusCode::NO_CONTENT)
}
