//! Parking lots HTTP API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::parking::{GeoPoint, NewParking, Parking, ParkingChanges};
use crate::reservation::Reservation;
use crate::router::{Valid, ValidQuery};
use crate::user::User;
use crate::{AppState, ServerError};

/// Routes reachable without a session.
pub fn public() -> Router<AppState> {
    Router::new()
        // `GET /parkings` goes to `list`.
        .route("/parkings", get(list))
        // `GET /parkings/{id}` goes to `get`.
        .route("/parkings/{id}", get(get_one))
}

/// Routes reserved to verified owners.
pub fn protected() -> Router<AppState> {
    Router::new()
        .route("/parkings", axum::routing::post(create))
        .route("/parkings/{id}", axum::routing::patch(update).delete(delete))
        .route("/parkings/{id}/reservations", get(reservations))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListQuery {
    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,
    #[validate(range(exclusive_min = 0.0))]
    pub radius_km: Option<f64>,
    /// Only lots with at least one free place.
    pub available: Option<bool>,
}

impl ListQuery {
    fn center(&self) -> Result<Option<GeoPoint>, ValidationErrors> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Ok(Some(GeoPoint::new(lat, lng))),
            (None, None) if self.radius_km.is_none() => Ok(None),
            _ => {
                let mut errors = ValidationErrors::new();
                errors.add(
                    "lat",
                    ValidationError::new("center").with_message(
                        "`lat` and `lng` must be given together.".into(),
                    ),
                );
                Err(errors)
            },
        }
    }
}

/// Parking lot, with its distance to the searched point.
#[derive(Debug, Serialize, Deserialize)]
pub struct ParkingView {
    #[serde(flatten)]
    pub parking: Parking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

/// Keep lots within `radius_km` of `center`, nearest first.
pub fn nearest(
    parkings: Vec<Parking>,
    center: GeoPoint,
    radius_km: Option<f64>,
) -> Vec<ParkingView> {
    let mut views: Vec<ParkingView> = parkings
        .into_iter()
        .map(|parking| {
            let distance = center.distance_km(&parking.location());
            ParkingView {
                parking,
                distance_km: Some(distance),
            }
        })
        .filter(|view| match (radius_km, view.distance_km) {
            (Some(radius), Some(distance)) => distance <= radius,
            _ => true,
        })
        .collect();

    views.sort_by(|a, b| {
        a.distance_km
            .unwrap_or_default()
            .total_cmp(&b.distance_km.unwrap_or_default())
    });
    views
}

/// Handler for `GET /parkings`.
pub async fn list(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<ListQuery>,
) -> Result<Json<Vec<ParkingView>>, ServerError> {
    let center = query.center()?;

    let mut parkings = state.db.parkings.list().await?;
    if query.available.unwrap_or(false) {
        parkings.retain(|parking| !parking.is_full());
    }

    let views = match center {
        Some(center) => nearest(parkings, center, query.radius_km),
        None => parkings
            .into_iter()
            .map(|parking| ParkingView {
                parking,
                distance_km: None,
            })
            .collect(),
    };

    Ok(Json(views))
}

/// Handler for `GET /parkings/{id}`.
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Parking>, ServerError> {
    state
        .db
        .parkings
        .find_by_id(id)
        .await?
        .map(Json)
        .ok_or(ServerError::NotFound)
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateBody {
    #[validate(length(min = 1, max = 255, message = "Name must contain between 1 and 255 characters."))]
    pub name: String,
    #[validate(length(min = 1, max = 255, message = "Address must contain between 1 and 255 characters."))]
    pub address: String,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    #[validate(range(min = 1, message = "A parking needs at least one place."))]
    pub total_places: i32,
    #[validate(range(min = 0.0))]
    pub price_per_hour: f64,
}

#[derive(Debug, Default, Serialize, Deserialize, Validate)]
pub struct UpdateBody {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub address: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
    #[validate(range(min = 1, message = "A parking needs at least one place."))]
    pub total_places: Option<i32>,
    #[validate(range(min = 0.0))]
    pub price_per_hour: Option<f64>,
}

impl From<UpdateBody> for ParkingChanges {
    fn from(body: UpdateBody) -> Self {
        ParkingChanges {
            name: body.name,
            address: body.address,
            description: body.description,
            latitude: body.latitude,
            longitude: body.longitude,
            total_places: body.total_places,
            price_per_hour: body.price_per_hour,
        }
    }
}

/// Find a lot and make sure `user` operates it.
async fn owned_parking(
    state: &AppState,
    user: &User,
    id: i64,
) -> Result<Parking, ServerError> {
    if !user.is_verified_owner() {
        return Err(ServerError::Forbidden);
    }

    let parking = state
        .db
        .parkings
        .find_by_id(id)
        .await?
        .ok_or(ServerError::NotFound)?;

    if parking.owner_id != user.id {
        return Err(ServerError::Forbidden);
    }

    Ok(parking)
}

/// Handler for `POST /parkings`.
pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<CreateBody>,
) -> Result<(StatusCode, Json<Parking>), ServerError> {
    if !user.is_verified_owner() {
        return Err(ServerError::Forbidden);
    }

    let parking = state
        .db
        .parkings
        .create(NewParking {
            owner_id: user.id,
            name: body.name,
            address: body.address,
            description: body.description,
            latitude: body.latitude,
            longitude: body.longitude,
            total_places: body.total_places,
            price_per_hour: body.price_per_hour,
        })
        .await?;

    tracing::info!(user_id = user.id, parking_id = parking.id, "parking created");

    Ok((StatusCode::CREATED, Json(parking)))
}

/// Handler for `PATCH /parkings/{id}`.
pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Valid(body): Valid<UpdateBody>,
) -> Result<Json<Parking>, ServerError> {
    owned_parking(&state, &user, id).await?;

    let parking = state.db.parkings.update(id, &body.into()).await?;
    Ok(Json(parking))
}

/// Handler for `DELETE /parkings/{id}`.
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ServerError> {
    owned_parking(&state, &user, id).await?;

    state.db.parkings.delete(id).await?;
    tracing::info!(user_id = user.id, parking_id = id, "parking deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `GET /parkings/{id}/reservations`.
pub async fn reservations(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Reservation>>, ServerError> {
    owned_parking(&state, &user, id).await?;

    Ok(Json(state.db.reservations.list_by_parking(id).await?))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::router::tests::{json_body, signed_in, state};
    use crate::user::Role;
    use crate::*;

    fn lot(name: &str, latitude: f64, longitude: f64) -> String {
        json!({
            "name": name,
            "address": "1 rue de la Paix",
            "latitude": latitude,
            "longitude": longitude,
            "total_places": 2,
            "price_per_hour": 2.5,
        })
        .to_string()
    }

    async fn create_lot(app: &Router, token: &str, body: String) -> i64 {
        let response = make_request(
            Some(token),
            app.clone(),
            Method::POST,
            "/parkings",
            body,
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        json_body(response).await["id"].as_i64().unwrap()
    }

    #[test]
    fn test_nearest_sorts_and_filters() {
        let make = |id: i64, latitude: f64, longitude: f64| {
            NewParking {
                owner_id: 1,
                name: format!("lot {id}"),
                address: String::default(),
                description: None,
                latitude,
                longitude,
                total_places: 1,
                price_per_hour: 1.0,
            }
            .into_parking(id, chrono::Utc::now())
        };
        let louvre = GeoPoint::new(48.8606, 2.3376);
        let parkings = vec![
            make(1, 48.8738, 2.2950), // Arc de Triomphe, ~3.5 km
            make(2, 48.8584, 2.2945), // Tour Eiffel, ~3.2 km
            make(3, 45.7640, 4.8357), // Lyon, ~390 km
            make(4, 48.8611, 2.3380), // next door
        ];

        let views = nearest(parkings.clone(), louvre, Some(5.0));
        let ids: Vec<i64> = views.iter().map(|v| v.parking.id).collect();
        assert_eq!(ids, vec![4, 2, 1]);

        let views = nearest(parkings, louvre, None);
        assert_eq!(views.len(), 4);
        assert_eq!(views[3].parking.id, 3);
    }

    #[tokio::test]
    async fn test_owner_manages_parking() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        let (_, token) =
            signed_in(&state, "owner@example.com", Role::Owner).await;

        let id = create_lot(&app, &token, lot("Opéra", 48.8719, 2.3316)).await;

        let response = make_request(
            None,
            app.clone(),
            Method::GET,
            &format!("/parkings/{id}"),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["available_places"], 2);

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::PATCH,
            &format!("/parkings/{id}"),
            json!({ "total_places": 5, "price_per_hour": 3.0 }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total_places"], 5);
        assert_eq!(body["available_places"], 5);

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::DELETE,
            &format!("/parkings/{id}"),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = make_request(
            None,
            app,
            Method::GET,
            &format!("/parkings/{id}"),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_only_verified_owner_of_lot() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        let (_, owner) =
            signed_in(&state, "owner@example.com", Role::Owner).await;
        let (_, other) =
            signed_in(&state, "other@example.com", Role::Owner).await;
        let (_, driver) =
            signed_in(&state, "driver@example.com", Role::Driver).await;

        let response = make_request(
            Some(&driver),
            app.clone(),
            Method::POST,
            "/parkings",
            lot("Bastille", 48.8532, 2.3692),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/parkings",
            lot("Bastille", 48.8532, 2.3692),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let id = create_lot(&app, &owner, lot("Bastille", 48.8532, 2.3692)).await;

        let response = make_request(
            Some(&other),
            app,
            Method::DELETE,
            &format!("/parkings/{id}"),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_list_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        let (_, token) =
            signed_in(&state, "owner@example.com", Role::Owner).await;

        create_lot(&app, &token, lot("Lyon", 45.7640, 4.8357)).await;
        create_lot(&app, &token, lot("Louvre", 48.8611, 2.3380)).await;

        let response = make_request(
            None,
            app.clone(),
            Method::GET,
            "/parkings?lat=48.8606&lng=2.3376&radius_km=10",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["name"], "Louvre");
        assert!(body[0]["distance_km"].as_f64().unwrap() < 1.0);

        let response = make_request(
            None,
            app.clone(),
            Method::GET,
            "/parkings?radius_km=10",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            None,
            app,
            Method::GET,
            "/parkings?available=true",
            String::default(),
        )
        .await;
        assert_eq!(json_body(response).await.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_parking() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        let (_, token) =
            signed_in(&state, "owner@example.com", Role::Owner).await;

        let response = make_request(
            Some(&token),
            app,
            Method::POST,
            "/parkings",
            json!({
                "name": "",
                "address": "nowhere",
                "latitude": 91.0,
                "longitude": 0.0,
                "total_places": 0,
                "price_per_hour": 1.0,
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 3);
    }
}
