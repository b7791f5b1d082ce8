//! Span export pipeline.
//!
//! # Data Flow
//! ```text
//! SpanGuard::end()
//!     → SpanSink::submit() (try_send, never blocks the request path)
//!     → bounded mpsc queue
//!     → export task (batches by size or scheduled delay)
//!     → SpanExporter (log / http / in-memory)
//! ```
//!
//! # Design Decisions
//! - A full queue drops the span and counts it; it never applies backpressure
//! - Exporter failures are logged and the batch is dropped
//! - `force_flush` and `shutdown` are messages on the same queue, so every
//!   span submitted before them is exported first
//! - `shutdown` is bounded by a grace period; on overrun the task is aborted

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::observability::resource::ServiceIdentity;
use crate::trace::span::FinishedSpan;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("collector unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector rejected batch with status {0}")]
    Rejected(StatusCode),
}

/// Destination for batches of finished spans.
pub trait SpanExporter: Send + Sync + 'static {
    fn export(&self, batch: Vec<FinishedSpan>) -> BoxFuture<'static, Result<(), ExportError>>;
}

/// Tuning for [`BatchSpanProcessor`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_queue_size: usize,
    pub max_export_batch_size: usize,
    pub scheduled_delay: Duration,
    pub export_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
            export_timeout: Duration::from_secs(10),
        }
    }
}

enum BatchMessage {
    Span(FinishedSpan),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Producer side of the export queue, held by the span tracker.
#[derive(Clone)]
pub struct SpanSink {
    tx: mpsc::Sender<BatchMessage>,
    dropped: Arc<AtomicU64>,
}

impl SpanSink {
    pub fn submit(&self, span: FinishedSpan) {
        match self.tx.try_send(BatchMessage::Span(span)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped_total = dropped, "Span export queue full, dropping span");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Span exporter stopped, dropping span");
            }
        }
    }

    /// Spans discarded because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Background task that batches finished spans into an exporter.
pub struct BatchSpanProcessor {
    sink: SpanSink,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl BatchSpanProcessor {
    /// Spawn the export task on the current tokio runtime.
    pub fn spawn(exporter: Arc<dyn SpanExporter>, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.max_queue_size.max(1));
        let task = tokio::spawn(run_export_loop(rx, exporter, config));
        Self {
            sink: SpanSink {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            task: Mutex::new(Some(task)),
        }
    }

    pub fn sink(&self) -> SpanSink {
        self.sink.clone()
    }

    /// Export everything queued so far and wait for it.
    pub async fn force_flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.sink.tx.send(BatchMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flush and stop the export task within `grace`.
    ///
    /// Returns false when the grace period ran out and the task was aborted.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let Some(mut task) = self.take_task() else {
            return true;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let drained = tokio::time::timeout(grace, async {
            if self.sink.tx.send(BatchMessage::Shutdown(ack_tx)).await.is_ok() {
                let _ = ack_rx.await;
            }
            let _ = (&mut task).await;
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "Span exporter did not drain in time, aborting");
            task.abort();
        }
        drained
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

async fn run_export_loop(
    mut rx: mpsc::Receiver<BatchMessage>,
    exporter: Arc<dyn SpanExporter>,
    config: BatchConfig,
) {
    let max_batch = config.max_export_batch_size.max(1);
    let mut batch = Vec::with_capacity(max_batch);
    let delay = config.scheduled_delay.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + delay, delay);

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(BatchMessage::Span(span)) => {
                    batch.push(span);
                    if batch.len() >= max_batch {
                        export_batch(exporter.as_ref(), &mut batch, config.export_timeout).await;
                    }
                }
                Some(BatchMessage::Flush(ack)) => {
                    export_batch(exporter.as_ref(), &mut batch, config.export_timeout).await;
                    let _ = ack.send(());
                }
                Some(BatchMessage::Shutdown(ack)) => {
                    export_batch(exporter.as_ref(), &mut batch, config.export_timeout).await;
                    let _ = ack.send(());
                    break;
                }
                None => {
                    export_batch(exporter.as_ref(), &mut batch, config.export_timeout).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                export_batch(exporter.as_ref(), &mut batch, config.export_timeout).await;
            }
        }
    }
    tracing::debug!("Span export task stopped");
}

async fn export_batch(exporter: &dyn SpanExporter, batch: &mut Vec<FinishedSpan>, timeout: Duration) {
    if batch.is_empty() {
        return;
    }
    let spans = std::mem::take(batch);
    let count = spans.len();
    match tokio::time::timeout(timeout, exporter.export(spans)).await {
        Ok(Ok(())) => tracing::debug!(spans = count, "Exported span batch"),
        Ok(Err(e)) => tracing::warn!(spans = count, error = %e, "Span export failed, batch dropped"),
        Err(_) => tracing::warn!(spans = count, "Span export timed out, batch dropped"),
    }
}

/// Writes each finished span as a structured log event.
#[derive(Debug, Clone, Default)]
pub struct LogSpanExporter;

impl SpanExporter for LogSpanExporter {
    fn export(&self, batch: Vec<FinishedSpan>) -> BoxFuture<'static, Result<(), ExportError>> {
        for span in &batch {
            let attributes = serde_json::to_string(&span.attributes).unwrap_or_default();
            tracing::info!(
                target: "spans",
                service = %span.service_name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                parent_span_id = %span.parent_span_id.map(|id| id.to_string()).unwrap_or_default(),
                name = %span.name,
                kind = ?span.kind,
                duration_ms = span.duration().as_secs_f64() * 1000.0,
                error = span.status.is_error(),
                attributes = %attributes,
                "span"
            );
        }
        Box::pin(async { Ok(()) })
    }
}

#[derive(Serialize)]
struct ExportRequest<'a> {
    resource: ResourceBody<'a>,
    spans: &'a [FinishedSpan],
}

#[derive(Serialize)]
struct ResourceBody<'a> {
    #[serde(rename = "service.name")]
    service_name: &'a str,
}

/// POSTs JSON batches to a trace collector.
#[derive(Clone)]
pub struct HttpSpanExporter {
    client: reqwest::Client,
    endpoint: String,
    identity: ServiceIdentity,
}

impl HttpSpanExporter {
    pub fn new(endpoint: impl Into<String>, identity: ServiceIdentity, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            identity,
        })
    }
}

impl SpanExporter for HttpSpanExporter {
    fn export(&self, batch: Vec<FinishedSpan>) -> BoxFuture<'static, Result<(), ExportError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let identity = self.identity.clone();
        Box::pin(async move {
            let body = ExportRequest {
                resource: ResourceBody {
                    service_name: identity.service_name(),
                },
                spans: &batch,
            };
            let response = client.post(&endpoint).json(&body).send().await?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(ExportError::Rejected(status))
            }
        })
    }
}

/// Keeps finished spans in memory. Used by tests and local debugging.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl InMemorySpanExporter {
    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        match self.spans.lock() {
            Ok(spans) => spans.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&self, batch: Vec<FinishedSpan>) -> BoxFuture<'static, Result<(), ExportError>> {
        if let Ok(mut spans) = self.spans.lock() {
            spans.extend(batch);
        }
        Box::pin(async { Ok(()) })
    }
}
