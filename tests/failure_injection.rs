//! Telemetry sinks failing must never fail requests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use kitchen_telemetry::config::schema::ExporterKind;
use kitchen_telemetry::lifecycle::RunningService;
use kitchen_telemetry::services::ServiceKind;
use kitchen_telemetry::trace::{ExportError, FinishedSpan, SpanExporter};

mod common;

use common::{local_config, request_count};

/// An exporter that never completes an export.
struct Blackhole;

impl SpanExporter for Blackhole {
    fn export(&self, _batch: Vec<FinishedSpan>) -> BoxFuture<'static, Result<(), ExportError>> {
        Box::pin(std::future::pending())
    }
}

#[tokio::test]
async fn dead_trace_collector_does_not_affect_requests() {
    let mut config = local_config(ServiceKind::App);
    config.tracing.exporter = ExporterKind::Http;
    config.tracing.endpoint = Some("http://127.0.0.1:1/v1/spans".to_string());
    config.tracing.export_timeout_ms = 200;
    let service = RunningService::start(&config).await.unwrap();
    let url = format!("http://{}/", service.local_addr());

    for _ in 0..5 {
        assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);
    }
    service.telemetry().force_flush().await;
    assert_eq!(service.telemetry().tracker().open_spans(), 0);

    assert!(service.stop().await);
}

#[tokio::test]
async fn full_export_queue_drops_spans_without_blocking() {
    let mut config = local_config(ServiceKind::App);
    config.tracing.max_queue_size = 1;
    config.tracing.max_export_batch_size = 1;
    config.timeouts.shutdown_grace_secs = 1;
    let service = RunningService::start_with_exporter(&config, Some(Arc::new(Blackhole)))
        .await
        .unwrap();
    let url = format!("http://{}/", service.local_addr());

    for _ in 0..10 {
        assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);
    }

    let metrics = reqwest::get(format!("http://{}/metrics", service.local_addr()))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(request_count(&metrics, "/", "200"), Some(10.0));
    assert!(service.telemetry().tracker().dropped_spans() > 0);

    // The stuck exporter is abandoned once the grace period runs out.
    let started = Instant::now();
    assert!(!service.stop().await);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn dead_profiling_backend_does_not_affect_requests() {
    let mut config = local_config(ServiceKind::Api);
    config.profiling.enabled = true;
    config.profiling.server_address = "http://127.0.0.1:1".to_string();
    config.profiling.upload_interval_secs = 1;
    config.bottleneck.iterations = 20_000_000;
    let service = RunningService::start(&config).await.unwrap();
    let url = format!("http://{}/products", service.local_addr());

    assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);

    assert!(service.stop().await);
}

#[tokio::test]
async fn slow_handler_is_cut_off_with_503() {
    let mut config = local_config(ServiceKind::App);
    config.bottleneck.max_work_ms = 60_000;
    config.timeouts.request_secs = 1;
    let service = RunningService::start(&config).await.unwrap();
    let base = format!("http://{}", service.local_addr());

    // A random sleep below 60s is cut off at 1s unless it happens to be shorter.
    let mut timed_out = 0;
    for _ in 0..3 {
        let status = reqwest::get(format!("{base}/")).await.unwrap().status();
        assert!(status == 200 || status == 503, "unexpected status {status}");
        if status == 503 {
            timed_out += 1;
        }
    }
    assert!(timed_out > 0);

    let metrics = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
    assert_eq!(request_count(&metrics, "/", "503"), Some(timed_out as f64));
    assert_eq!(service.telemetry().tracker().open_spans(), 0);

    service.stop().await;
}
