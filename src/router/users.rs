//! Users-related HTTP API.

use axum::{Extension, Json};

use crate::user::User;

/// Handler for `GET /users/@me`.
pub async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::router::tests::{json_body, signed_in, state};
    use crate::user::Role;
    use crate::*;

    #[tokio::test]
    async fn test_me_handler() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir, true);
        let app = app(state.clone());
        let (user, token) =
            signed_in(&state, "owner@example.com", Role::Owner).await;

        let response = make_request(
            Some(&token),
            app,
            Method::GET,
            "/users/@me",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["id"], user.id);
        assert_eq!(body["email"], "owner@example.com");
        assert_eq!(body["account_mode"], "BASIC");
        assert!(body.get("password").is_none());
    }
}
