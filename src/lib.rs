//! Parkly is a parking management API.
//!
//! Owners register with a photo of their parking lot, verified by an
//! external classifier, then publish lots. Drivers register vehicles and
//! reserve places.
#![forbid(unsafe_code)]

pub mod config;
mod crypto;
mod database;
pub mod error;
pub mod parking;
pub mod plate;
pub mod registration;
pub mod reservation;
mod router;
pub mod telemetry;
pub mod user;
pub mod vehicle;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

pub use database::Database;

/// Multipart registration carries the parking photo plus form fields.
const REGISTER_BODY_LIMIT: usize = registration::MAX_PHOTO_SIZE + 64 * 1024;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = token {
        request =
            request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: Database,
    pub crypto: Arc<crypto::PasswordManager>,
    pub storage: Arc<dyn registration::FileStore>,
    pub classifier: Arc<dyn registration::Classifier>,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(
                    |chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                        tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                    },
                )
                .make_span_with(
                    DefaultMakeSpan::new()
                        .include_headers(true)
                        .level(tracing::Level::INFO),
                )
                .on_request(DefaultOnRequest::new())
                .on_response(
                    DefaultOnResponse::new()
                        .include_headers(true)
                        .latency_unit(LatencyUnit::Micros),
                ),
        )
        // Classifier calls are bounded separately; leave them room.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.classifier.timeout() + Duration::from_secs(10),
        ))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let public = Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` renders Prometheus metrics.
        .route("/metrics", get(router::status::metrics))
        // `POST /register` goes to `create`.
        .route(
            "/register",
            post(router::create::handler)
                .layer(DefaultBodyLimit::max(REGISTER_BODY_LIMIT)),
        )
        // `POST /login` goes to `login`.
        .route("/login", post(router::login::handler))
        .merge(router::parkings::public());

    let protected = Router::new()
        // `POST /logout` revokes the bearer token.
        .route("/logout", post(router::login::logout))
        .route("/users/@me", get(router::users::me))
        .merge(router::parkings::protected())
        .nest("/vehicles", router::vehicles::router())
        .nest("/reservations", router::reservations::router())
        .route_layer(AxumMiddleware::from_fn_with_state(
            state.clone(),
            router::auth,
        ));

    public
        .merge(protected)
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let db = match config.postgres {
        Some(ref config) => {
            Database::postgres(
                &config.address,
                &config
                    .username
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .password
                    .clone()
                    .unwrap_or(database::DEFAULT_CREDENTIALS.into()),
                &config
                    .database
                    .clone()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME.into()),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::warn!(
                "missing `postgres` entry on `config.yaml` file, data is kept in memory"
            );
            Database::memory()
        },
    };

    let crypto = Arc::new(crypto::PasswordManager::new(config.argon2.clone())?);

    let storage = registration::LocalFileStore::new(&config.storage.root)?;
    tracing::info!(root = %storage.root().display(), "file storage ready");

    let classifier = registration::HttpClassifier::new(
        &config.classifier.url,
        config.classifier.timeout(),
    )?;

    Ok(AppState {
        config,
        db,
        crypto,
        storage: Arc::new(storage),
        classifier: Arc::new(classifier),
        metrics,
    })
}
