//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use kitchen_telemetry::config::schema::ExporterKind;
use kitchen_telemetry::config::ServiceConfig;
use kitchen_telemetry::lifecycle::RunningService;
use kitchen_telemetry::observability::metrics::find_sample;
use kitchen_telemetry::services::ServiceKind;
use kitchen_telemetry::trace::{FinishedSpan, InMemorySpanExporter, SpanExporter};

/// Stock config for `kind`, on an ephemeral localhost port with light load.
pub fn local_config(kind: ServiceKind) -> ServiceConfig {
    let mut config = ServiceConfig::for_kind(kind);
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.tracing.exporter = ExporterKind::None;
    config.tracing.scheduled_delay_ms = 50;
    config.bottleneck.iterations = 2_000_000;
    config.bottleneck.max_work_ms = 20;
    config.downstream.timeout_ms = 5_000;
    config.timeouts.shutdown_grace_secs = 3;
    config
}

/// A running service whose spans land in memory.
pub struct TestService {
    pub service: RunningService,
    pub exporter: InMemorySpanExporter,
}

impl TestService {
    pub async fn start(config: ServiceConfig) -> Self {
        let exporter = InMemorySpanExporter::default();
        let shared: Arc<dyn SpanExporter> = Arc::new(exporter.clone());
        let service = RunningService::start_with_exporter(&config, Some(shared))
            .await
            .expect("service should start");
        Self { service, exporter }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.service.local_addr())
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Every span finished so far, after draining the export queue.
    pub async fn spans(&self) -> Vec<FinishedSpan> {
        self.service.telemetry().force_flush().await;
        self.exporter.finished_spans()
    }

    pub async fn metrics(&self) -> String {
        reqwest::get(self.url("/metrics"))
            .await
            .expect("metrics endpoint reachable")
            .text()
            .await
            .expect("metrics body")
    }

    pub fn open_spans(&self) -> u64 {
        self.service.telemetry().tracker().open_spans()
    }

    pub async fn stop(self) -> bool {
        self.service.stop().await
    }
}

/// Start an api service and a client service pointing at it.
pub async fn start_chain() -> (TestService, TestService) {
    let api = TestService::start(local_config(ServiceKind::Api)).await;
    let mut client_config = local_config(ServiceKind::Client);
    client_config.downstream.base_url = api.base_url();
    let client = TestService::start(client_config).await;
    (client, api)
}

pub fn request_count(exposition: &str, route: &str, status: &str) -> Option<f64> {
    let labels = [("route", route), ("method", "GET"), ("status_code", status)];
    find_sample(exposition, "http_requests_total", &labels)
}

pub fn span_named<'a>(spans: &'a [FinishedSpan], name: &str) -> &'a FinishedSpan {
    spans
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("no span named {name} in {:?}", names(spans)))
}

pub fn names(spans: &[FinishedSpan]) -> Vec<&str> {
    spans.iter().map(|s| s.name.as_str()).collect()
}

/// A local stand-in for the profiling backend that keeps every upload body.
pub struct IngestSink {
    pub address: String,
    bodies: Arc<Mutex<Vec<String>>>,
}

impl IngestSink {
    pub async fn start() -> Self {
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/ingest", post(ingest))
            .with_state(Arc::clone(&bodies));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ingest sink");
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { address, bodies }
    }

    pub fn uploads(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

async fn ingest(State(bodies): State<Arc<Mutex<Vec<String>>>>, body: String) -> StatusCode {
    bodies.lock().unwrap().push(body);
    StatusCode::OK
}
