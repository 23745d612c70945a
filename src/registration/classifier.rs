//! Parking photo classifier client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Decides whether a stored photo shows a parking lot.
///
/// Implementations fail closed: any error is reported as `false`.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_path: &Path) -> bool;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    image_path: &'a str,
}

/// [`Classifier`] calling an HTTP prediction endpoint once, without retry.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpClassifier {
    pub fn new(url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }

    async fn request(&self, image_path: &Path) -> reqwest::Result<bool> {
        let body: Value = self
            .client
            .post(&self.url)
            .json(&ClassifyRequest {
                image_path: &image_path.to_string_lossy(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(body.get("is_parking") == Some(&Value::Bool(true)))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, image_path: &Path) -> bool {
        match self.request(image_path).await {
            Ok(is_parking) => {
                tracing::debug!(is_parking, "photo classified");
                is_parking
            },
            Err(err) => {
                tracing::warn!(
                    url = %self.url,
                    timeout = err.is_timeout(),
                    error = %err,
                    "classifier call failed, photo rejected"
                );
                false
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use serde_json::json;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{addr}/predict")
    }

    fn classifier(url: &str) -> HttpClassifier {
        HttpClassifier::new(url, Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn test_parking_accepted() {
        let url = serve(Router::new().route(
            "/predict",
            post(|axum::Json(body): axum::Json<Value>| async move {
                let is_parking = body["image_path"] == "/photos/lot.png";
                axum::Json(json!({ "is_parking": is_parking }))
            }),
        ))
        .await;

        let classifier = classifier(&url);
        assert!(classifier.classify(Path::new("/photos/lot.png")).await);
        assert!(!classifier.classify(Path::new("/photos/cat.png")).await);
    }

    #[tokio::test]
    async fn test_untrusted_answers_fail_closed() {
        let url = serve(
            Router::new()
                .route(
                    "/predict",
                    post(|| async { axum::Json(json!({ "is_parking": "true" })) }),
                )
                .route(
                    "/missing",
                    post(|| async { axum::Json(json!({ "label": "parking" })) }),
                )
                .route(
                    "/error",
                    post(|| async {
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            axum::Json(json!({ "is_parking": true })),
                        )
                    }),
                )
                .route("/garbage", post(|| async { "not json" })),
        )
        .await;
        let base = url.trim_end_matches("/predict");

        for route in ["/predict", "/missing", "/error", "/garbage"] {
            let classifier = classifier(&format!("{base}{route}"));
            assert!(!classifier.classify(Path::new("/photo.png")).await);
        }
    }

    #[tokio::test]
    async fn test_timeout_fails_closed() {
        let url = serve(Router::new().route(
            "/predict",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                axum::Json(json!({ "is_parking": true }))
            }),
        ))
        .await;

        let classifier =
            HttpClassifier::new(&url, Duration::from_millis(100)).unwrap();
        assert!(!classifier.classify(Path::new("/photo.png")).await);
    }

    #[tokio::test]
    async fn test_unreachable_fails_closed() {
        let classifier = classifier("http://127.0.0.1:9/predict");
        assert!(!classifier.classify(Path::new("/photo.png")).await);
    }
}
