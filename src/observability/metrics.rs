//! Request metrics and Prometheus exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by route, method, status_code
//! - `http_request_duration_seconds` (histogram): latency by route
//! - arbitrary named gauges (e.g. `app_work_level`)
//!
//! Every series carries a `service` label with the service name.
//!
//! # Design Decisions
//! - One registry per process, passed explicitly; no global recorder is
//!   installed, so tests can build as many isolated registries as they like
//! - Label values come from statically registered routes, a closed set of
//!   methods and numeric status codes, never from raw request input
//! - Counters and histograms are atomics inside the Prometheus recorder, so
//!   concurrent updates are never lost
//! - `snapshot()` only reads; scraping twice yields the same text

use std::sync::Arc;

use axum::http::Method;
use metrics::{Key, Label, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::observability::resource::ServiceIdentity;

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Prometheus client default buckets, in seconds.
pub const DEFAULT_LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

const METADATA: Metadata<'static> = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// Process-wide counters, histograms and gauges.
#[derive(Clone)]
pub struct TelemetryRegistry {
    recorder: Arc<PrometheusRecorder>,
    handle: PrometheusHandle,
}

impl TelemetryRegistry {
    pub fn new(identity: &ServiceIdentity, latency_buckets: &[f64]) -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets(latency_buckets)?
            .add_global_label("service", identity.service_name())
            .build_recorder();

        recorder.describe_counter(
            REQUESTS_TOTAL.into(),
            None,
            "Total number of HTTP requests.".into(),
        );
        recorder.describe_histogram(
            REQUEST_DURATION_SECONDS.into(),
            None,
            "HTTP request latency in seconds.".into(),
        );

        let handle = recorder.handle();
        Ok(Self {
            recorder: Arc::new(recorder),
            handle,
        })
    }

    /// Count one completed request.
    pub fn increment_request(&self, route: &'static str, method: &Method, status_code: u16) {
        let key = Key::from_parts(
            REQUESTS_TOTAL,
            vec![
                Label::new("route", route),
                Label::new("method", method_label(method)),
                Label::new("status_code", status_code.to_string()),
            ],
        );
        self.recorder.register_counter(&key, &METADATA).increment(1);
    }

    /// Record one request latency.
    pub fn observe_latency(&self, route: &'static str, seconds: f64) {
        let key = Key::from_parts(REQUEST_DURATION_SECONDS, vec![Label::new("route", route)]);
        self.recorder
            .register_histogram(&key, &METADATA)
            .record(seconds.max(0.0));
    }

    pub fn set_gauge(&self, name: &'static str, value: f64) {
        let key = Key::from_name(name);
        self.recorder.register_gauge(&key, &METADATA).set(value);
    }

    /// Render every series in the Prometheus text format.
    pub fn snapshot(&self) -> String {
        self.handle.render()
    }
}

/// Collapse a request method onto a fixed label set.
pub fn method_label(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::HEAD => "HEAD",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

/// Find the value of one series in exposition text.
///
/// Matches the metric name exactly and requires every given label pair;
/// other labels (such as `service`) are ignored.
pub fn find_sample(exposition: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    let prefix = format!("{name}{{");
    exposition
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.rsplit_once(' '))
        .find(|(series, _)| {
            (series.starts_with(&prefix) || *series == name)
                && labels
                    .iter()
                    .all(|(k, v)| series.contains(&format!("{k}=\"{v}\"")))
        })
        .and_then(|(_, value)| value.trim().parse().ok())
}
