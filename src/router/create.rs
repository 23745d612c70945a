//! Account registration over `multipart/form-data`.

use axum::extract::{Multipart, State};
use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::crypto::generate_token;
use crate::error::{Result, ServerError};
use crate::registration::{PhotoUpload, RegistrationAttempt, RegistrationGate};
use crate::user::User;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub user: User,
    pub token_type: String,
    pub token: String,
}

fn parsing(err: axum::extract::multipart::MultipartError) -> ServerError {
    ServerError::ParsingForm(Box::new(err))
}

async fn read_attempt(mut multipart: Multipart) -> Result<RegistrationAttempt> {
    let mut attempt = RegistrationAttempt::default();

    while let Some(field) = multipart.next_field().await.map_err(parsing)? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        match name.as_str() {
            "parking_photo" => {
                let file_name = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(str::to_owned);
                let bytes = field.bytes().await.map_err(parsing)?;

                // Browsers send an empty part when no file was picked.
                if !bytes.is_empty() {
                    attempt.parking_photo = Some(PhotoUpload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            },
            "role" => attempt.role = field.text().await.map_err(parsing)?,
            "name" => attempt.name = field.text().await.map_err(parsing)?,
            "email" => attempt.email = field.text().await.map_err(parsing)?,
            "password" => {
                attempt.password = field.text().await.map_err(parsing)?
            },
            "password_confirmation" => {
                attempt.password_confirmation =
                    field.text().await.map_err(parsing)?
            },
            _ => tracing::debug!(field = %name, "unknown registration field"),
        }
    }

    Ok(attempt)
}

/// Handler to register a driver or an owner.
pub async fn handler(
    State(state): State<AppState>,
    State(gate): State<RegistrationGate>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Response>)> {
    let attempt = read_attempt(multipart).await?;
    let user = gate.register(attempt).await?;

    let token = generate_token();
    state.db.users.insert_token(&token, user.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(Response {
            user,
            token_type: TOKEN_TYPE.to_owned(),
            token,
        }),
    ))
}
