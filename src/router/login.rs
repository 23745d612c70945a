//! Session opening and closing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::crypto::generate_token;
use crate::router::create::{Response, TOKEN_TYPE};
use crate::router::{SessionToken, Valid};
use crate::user::User;
use crate::{AppState, ServerError};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

fn invalid_credentials() -> ServerError {
    let mut errors = ValidationErrors::new();
    errors.add(
        "password",
        ValidationError::new("invalid_credentials")
            .with_message("Invalid email or password.".into()),
    );
    ServerError::Validation(errors)
}

/// Handler for `POST /login`.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>, ServerError> {
    let Some(user) = state.db.users.find_by_email(&body.email).await? else {
        // Spend the hashing time anyway.
        let _ = state.crypto.hash_password(&body.password);
        return Err(invalid_credentials());
    };

    state
        .crypto
        .verify_password(&body.password, &user.password)?;

    let token = generate_token();
    state.db.users.insert_token(&token, user.id).await?;

    tracing::info!(user_id = user.id, "session opened");

    Ok(Json(Response {
        user,
        token_type: TOKEN_TYPE.to_owned(),
        token,
    }))
}

/// Handler for `POST /logout`. Revokes the token used for the request.
pub async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<StatusCode, ServerError> {
    state.db.users.revoke_token(&token).await?;
    tracing::info!(user_id = user.id, "session closed");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::router::tests::{PASSWORD, json_body, signed_in, state};
    use crate::user::Role;
    use crate::*;

    #[tokio::test]
    async fn test_login_handler() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        let (user, _) =
            signed_in(&state, "driver@example.com", Role::Driver).await;

        let response = make_request(
            None,
            app.clone(),
            Method::POST,
            "/login",
            json!({ "email": "driver@example.com", "password": PASSWORD })
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["user"]["id"], user.id);
        let token = body["token"].as_str().unwrap().to_owned();

        let response = make_request(
            Some(&token),
            app,
            Method::GET,
            "/users/@me",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_wrong_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        signed_in(&state, "driver@example.com", Role::Driver).await;

        for (email, password) in [
            ("driver@example.com", "Wrong-password1"),
            ("nobody@example.com", PASSWORD),
        ] {
            let response = make_request(
                None,
                app.clone(),
                Method::POST,
                "/login",
                json!({ "email": email, "password": password }).to_string(),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let body = json_body(response).await;
            assert_eq!(body["errors"][0]["message"], "Invalid email or password.");
        }
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        let (_, token) =
            signed_in(&state, "driver@example.com", Role::Driver).await;

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::POST,
            "/logout",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = make_request(
            Some(&token),
            app,
            Method::GET,
            "/users/@me",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
