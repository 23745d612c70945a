pub mod create;
pub mod login;
pub mod parkings;
pub mod reservations;
pub mod status;
pub mod users;
pub mod vehicles;

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Query, Request, State};
use axum::http::{HeaderMap, header, request::Parts};
use axum::middleware::Next;
use axum::response::Response;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::user::User;
use crate::{AppState, ServerError};

const BEARER: &str = "Bearer ";

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Query string checked with [`Validate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        value.validate()?;
        Ok(ValidQuery(value))
    }
}

/// Bearer token the current request was authenticated with.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Custom middleware for authentification.
pub async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let token = bearer(req.headers())
        .map(str::to_owned)
        .ok_or(ServerError::Unauthorized)?;

    let user = state
        .db
        .users
        .find_by_token(&token)
        .await?
        .ok_or(ServerError::Unauthorized)?;

    req.extensions_mut().insert::<User>(user);
    req.extensions_mut().insert(SessionToken(token));
    Ok(next.run(req).await)
}
