//! Telemetry: structured logs, optional OTLP export, Prometheus metrics and
//! the per-request tracking middleware.

use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::http::Version;
use axum::middleware::Next;
use axum::response::IntoResponse;
use metrics::{Unit, gauge};
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::trace::{Span, TraceError, Tracer};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::{LogError, SdkLoggerProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config;

const SERVICE_NAME: &str = env!("CARGO_CRATE_NAME");
const DEFAULT_FILTER: &str = "info";
const PROCESS_REFRESH: Duration = Duration::from_secs(10);
const LATENCY_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn resource() -> Resource {
    Resource::builder().with_service_name(SERVICE_NAME).build()
}

/// Keeps OTLP providers alive; flush them with [`Telemetry::shutdown`].
#[derive(Default)]
pub struct Telemetry {
    tracer: Option<SdkTracerProvider>,
    logger: Option<SdkLoggerProvider>,
}

impl Telemetry {
    /// Install the global subscriber. Spans and logs are also exported over
    /// OTLP when an endpoint is configured.
    pub fn init(
        config: Option<&config::Telemetry>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());

        let Some(config) = config else {
            registry.try_init()?;
            return Ok(Self::default());
        };

        let tracer = setup_tracer(&config.otlp_endpoint)?;
        global::set_tracer_provider(tracer.clone());
        let logger = setup_logger(&config.otlp_endpoint)?;

        registry
            .with(OpenTelemetryTracingBridge::new(&logger))
            .try_init()?;
        tracing::info!(endpoint = %config.otlp_endpoint, "OTLP export enabled");

        Ok(Self {
            tracer: Some(tracer),
            logger: Some(logger),
        })
    }

    pub fn shutdown(self) {
        if let Some(tracer) = self.tracer {
            if let Err(err) = tracer.shutdown() {
                eprintln!("tracer provider shutdown failed: {err}");
            }
        }
        if let Some(logger) = self.logger {
            if let Err(err) = logger.shutdown() {
                eprintln!("logger provider shutdown failed: {err}");
            }
        }
    }
}

/// Create span exporter for OTLP.
pub fn setup_tracer(endpoint: &str) -> Result<SdkTracerProvider, TraceError> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Create log exporter for OTLP.
pub fn setup_logger(endpoint: &str) -> Result<SdkLoggerProvider, LogError> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build())
}

/// Refresh CPU and memory gauges of the current process forever.
fn spawn_process_gauges() {
    let mut system = System::new_with_specifics(RefreshKind::nothing());
    let pid = Pid::from_u32(std::process::id());

    tokio::spawn(async move {
        loop {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory().with_cpu(),
            );

            if let Some(process) = system.process(pid) {
                gauge!("process_memory_used_bytes").set(process.memory() as f64);
                gauge!("process_cpu_usage").set(process.cpu_usage() as f64);
            }

            tokio::time::sleep(PROCESS_REFRESH).await;
        }
    });
}

/// Install the Prometheus recorder rendered on `GET /metrics`.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    metrics::describe_gauge!(
        "process_cpu_usage",
        Unit::Percent,
        "CPU usage of the process in percentage."
    );
    metrics::describe_gauge!(
        "process_memory_used_bytes",
        Unit::Bytes,
        "Total process memory in bytes."
    );
    metrics::describe_counter!(
        "http_requests_total",
        Unit::Count,
        "HTTP requests by method, route and status."
    );
    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "HTTP request latency."
    );
    metrics::describe_counter!(
        "registrations_total",
        Unit::Count,
        "Registration attempts by role and outcome."
    );

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_owned()),
            LATENCY_BUCKETS,
        )?
        .install_recorder()?;

    spawn_process_gauges();

    Ok(handle)
}

fn http_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "UNKNOWN",
    }
}

/// Record request count and latency, labelled by matched route.
pub async fn track(req: Request, next: Next) -> impl IntoResponse {
    let mut span = global::tracer("parkly-http").start("http-request");

    let start = Instant::now();
    // Matched routes keep label cardinality bounded.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();
    let version = http_version(req.version());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();

    span.set_attributes([
        KeyValue::new("http.version", version),
        KeyValue::new("http.route", route.clone()),
        KeyValue::new("http.method", method.clone()),
        KeyValue::new("http.status", status.clone()),
    ]);
    span.end();

    let labels = [("method", method), ("path", route), ("status", status)];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());

    response
}
