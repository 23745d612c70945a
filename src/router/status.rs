//! Public configuration page and Prometheus scraping endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::AppState;

/// Structured configuration.
#[derive(Serialize)]
pub struct Status {
    name: String,
    url: String,
    version: String,
    storage: &'static str,
}

/// Public server status (configuration).
pub async fn status(State(state): State<AppState>) -> Json<Status> {
    let name = if state.config.name.is_empty() {
        env!("CARGO_CRATE_NAME").to_owned()
    } else {
        state.config.name.clone()
    };

    Json(Status {
        name,
        url: state.config.url.clone(),
        version: env!("CARGO_PKG_VERSION").into(),
        storage: if state.config.postgres.is_some() {
            "postgres"
        } else {
            "memory"
        },
    })
}

/// Prometheus text format, when a recorder is installed.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use crate::router::tests::{json_body, state};
    use crate::*;

    #[tokio::test]
    async fn test_status_handler() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(state(&dir, true));

        let response = make_request(
            None,
            app.clone(),
            Method::GET,
            "/status.json",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["name"], "parkly");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["storage"], "memory");

        let response =
            make_request(None, app, Method::GET, "/metrics", String::default())
                .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
