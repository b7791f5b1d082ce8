//! Span lifecycle tracking.
//!
//! # State Machine
//! ```text
//! created ──start()──▶ running ──end() / drop──▶ ended
//!                         │
//!                         ├─ set_attribute()   (ignored once ended)
//!                         └─ record_error()    (status only, stays running)
//! ```
//!
//! # Design Decisions
//! - `SpanGuard` ends its span on drop, so early returns, `?`, cancelled
//!   futures and panics all close the span exactly once
//! - End time is the start wall-clock time plus a monotonic offset, so
//!   `end_time >= start_time` even if the system clock steps backwards
//! - Finished spans are handed to the export sink only when sampled

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Serialize, Serializer};

use crate::observability::resource::ServiceIdentity;
use crate::trace::context::{SpanId, TraceContext, TraceId};
use crate::trace::export::SpanSink;

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for AttributeValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Server,
    Client,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error { reason: String },
}

impl SpanStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// A closed span, ready for export. Never partially populated.
#[derive(Debug, Clone, Serialize)]
pub struct FinishedSpan {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    #[serde(rename = "start_time_unix_nano", serialize_with = "unix_nanos")]
    pub start_time: SystemTime,
    #[serde(rename = "end_time_unix_nano", serialize_with = "unix_nanos")]
    pub end_time: SystemTime,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub status: SpanStatus,
    pub service_name: String,
}

impl FinishedSpan {
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or(Duration::ZERO)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }
}

fn unix_nanos<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let nanos = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    serializer.serialize_u64(nanos)
}

/// Opens spans for one service and forwards them to the export sink.
///
/// Clones share counters and the sink.
#[derive(Clone)]
pub struct SpanTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    identity: ServiceIdentity,
    sink: Option<SpanSink>,
    sample_ratio: f64,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl SpanTracker {
    pub fn new(identity: ServiceIdentity, sink: Option<SpanSink>, sample_ratio: f64) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                identity,
                sink,
                sample_ratio: sample_ratio.clamp(0.0, 1.0),
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
            }),
        }
    }

    /// Open an internal span, child of `parent` when given.
    pub fn start(&self, name: impl Into<String>, parent: Option<&TraceContext>) -> SpanGuard {
        self.start_with_kind(name, SpanKind::Internal, parent)
    }

    pub fn start_with_kind(
        &self,
        name: impl Into<String>,
        kind: SpanKind,
        parent: Option<&TraceContext>,
    ) -> SpanGuard {
        let context = match parent {
            Some(parent) => parent.child(),
            None => TraceContext::new_root(self.sample_root()),
        };
        self.inner.opened.fetch_add(1, Ordering::SeqCst);

        SpanGuard {
            tracker: self.clone(),
            context,
            state: Some(ActiveSpan {
                parent_span_id: parent.map(|p| p.span_id),
                name: name.into(),
                kind,
                start_time: SystemTime::now(),
                started: Instant::now(),
                attributes: BTreeMap::new(),
                status: SpanStatus::Ok,
            }),
        }
    }

    fn sample_root(&self) -> bool {
        let ratio = self.inner.sample_ratio;
        if ratio >= 1.0 {
            true
        } else if ratio <= 0.0 {
            false
        } else {
            rand::thread_rng().gen_bool(ratio)
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.inner.identity
    }

    pub fn opened_spans(&self) -> u64 {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed_spans(&self) -> u64 {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Spans started but not yet ended.
    pub fn open_spans(&self) -> u64 {
        self.opened_spans().saturating_sub(self.closed_spans())
    }

    /// Finished spans the export queue had to discard.
    pub fn dropped_spans(&self) -> u64 {
        self.inner.sink.as_ref().map_or(0, SpanSink::dropped)
    }

    fn finish(&self, span: FinishedSpan, sampled: bool) {
        self.inner.closed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            name = %span.name,
            duration_us = span.duration().as_micros() as u64,
            "Span ended"
        );
        if sampled {
            if let Some(sink) = &self.inner.sink {
                sink.submit(span);
            }
        }
    }
}

struct ActiveSpan {
    parent_span_id: Option<SpanId>,
    name: String,
    kind: SpanKind,
    start_time: SystemTime,
    started: Instant,
    attributes: BTreeMap<String, AttributeValue>,
    status: SpanStatus,
}

/// Exclusive handle to a running span. Ends the span when dropped.
pub struct SpanGuard {
    tracker: SpanTracker,
    context: TraceContext,
    state: Option<ActiveSpan>,
}

impl SpanGuard {
    pub fn context(&self) -> TraceContext {
        self.context
    }

    /// False once the span has ended.
    pub fn is_recording(&self) -> bool {
        self.state.is_some()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(state) = self.state.as_mut() {
            state.attributes.insert(key.into(), value.into());
        }
    }

    /// Mark the span as failed. The span keeps running.
    pub fn record_error(&mut self, err: impl fmt::Display) {
        if let Some(state) = self.state.as_mut() {
            state.status = SpanStatus::Error {
                reason: err.to_string(),
            };
        }
    }

    /// End the span. Later calls are no-ops.
    pub fn end(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let span = FinishedSpan {
            trace_id: self.context.trace_id,
            span_id: self.context.span_id,
            parent_span_id: state.parent_span_id,
            name: state.name,
            kind: state.kind,
            start_time: state.start_time,
            end_time: state.start_time + state.started.elapsed(),
            attributes: state.attributes,
            status: state.status,
            service_name: self.tracker.identity().service_name().to_string(),
        };
        self.tracker.finish(span, self.context.sampled);
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        let unmarked = self
            .state
            .as_ref()
            .is_some_and(|state| !state.status.is_error());
        if std::thread::panicking() && unmarked {
            self.record_error("panicked");
        }
        self.end();
    }
}

impl fmt::Debug for SpanGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanGuard")
            .field("context", &self.context)
            .field("recording", &self.is_recording())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::export::InMemorySpanExporter;

    fn tracker() -> SpanTracker {
        SpanTracker::new(ServiceIdentity::new("test-service"), None, 1.0)
    }

    #[test]
    fn root_span_has_no_parent() {
        let tracker = tracker();
        let span = tracker.start("root", None);
        assert!(span.context().is_valid());
        assert!(span.context().sampled);
        assert_eq!(tracker.open_spans(), 1);
        drop(span);
        assert_eq!(tracker.open_spans(), 0);
    }

    #[test]
    fn child_inherits_trace_id() {
        let tracker = tracker();
        let root = tracker.start("root", None);
        let child = tracker.start("child", Some(&root.context()));
        assert_eq!(child.context().trace_id, root.context().trace_id);
        assert_ne!(child.context().span_id, root.context().span_id);
    }

    #[test]
    fn end_is_idempotent_and_freezes_attributes() {
        let tracker = tracker();
        let mut span = tracker.start("work", None);
        span.set_attribute("before", true);
        span.end();
        assert!(!span.is_recording());
        span.set_attribute("after", true);
        span.record_error("late");
        span.end();
        drop(span);
        assert_eq!(tracker.opened_spans(), 1);
        assert_eq!(tracker.closed_spans(), 1);
    }

    #[test]
    fn early_return_closes_span() {
        fn fallible(tracker: &SpanTracker) -> Result<(), &'static str> {
            let _span = tracker.start("fallible", None);
            let step: Result<(), &'static str> = Err("boom");
            step?;
            Ok(())
        }
        let tracker = tracker();
        assert!(fallible(&tracker).is_err());
        assert_eq!(tracker.open_spans(), 0);
    }

    #[test]
    fn panic_closes_span_with_error() {
        let tracker = tracker();
        let t = tracker.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _span = t.start("doomed", None);
            panic!("boom");
        }));
        assert!(result.is_err());
        assert_eq!(tracker.open_spans(), 0);
    }

    #[tokio::test]
    async fn finished_span_reaches_sink() {
        let exporter = InMemorySpanExporter::default();
        let processor = crate::trace::export::BatchSpanProcessor::spawn(
            Arc::new(exporter.clone()),
            Default::default(),
        );
        let tracker = SpanTracker::new(ServiceIdentity::new("svc"), Some(processor.sink()), 1.0);

        let mut span = tracker.start_with_kind("op", SpanKind::Server, None);
        span.set_attribute("answer", 42i64);
        span.record_error("failed");
        let cx = span.context();
        span.end();

        processor.force_flush().await;
        let spans = exporter.finished_spans();
        assert_eq!(spans.len(), 1);
        let finished = &spans[0];
        assert_eq!(finished.span_id, cx.span_id);
        assert_eq!(finished.parent_span_id, None);
        assert_eq!(finished.service_name, "svc");
        assert_eq!(finished.attribute("answer"), Some(&AttributeValue::Int(42)));
        assert!(finished.status.is_error());
        assert!(finished.end_time >= finished.start_time);
    }

    #[tokio::test]
    async fn unsampled_spans_are_not_exported() {
        let exporter = InMemorySpanExporter::default();
        let processor = crate::trace::export::BatchSpanProcessor::spawn(
            Arc::new(exporter.clone()),
            Default::default(),
        );
        let tracker = SpanTracker::new(ServiceIdentity::new("svc"), Some(processor.sink()), 0.0);
        let span = tracker.start("quiet", None);
        assert!(!span.context().sampled);
        drop(span);

        processor.force_flush().await;
        assert!(exporter.finished_spans().is_empty());
        assert_eq!(tracker.closed_spans(), 1);
    }

    #[tokio::test]
    async fn panic_keeps_earlier_error_reason() {
        let exporter = InMemorySpanExporter::default();
        let processor = crate::trace::export::BatchSpanProcessor::spawn(
            Arc::new(exporter.clone()),
            Default::default(),
        );
        let tracker = SpanTracker::new(ServiceIdentity::new("svc"), Some(processor.sink()), 1.0);

        let t = tracker.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut failed = t.start("failed-first", None);
            failed.record_error("upstream refused");
            let _plain = t.start("plain", None);
            panic!("boom");
        }));
        assert!(result.is_err());

        processor.force_flush().await;
        let spans = exporter.finished_spans();
        let status = |name: &str| spans.iter().find(|s| s.name == name).unwrap().status.clone();
        assert_eq!(status("plain"), SpanStatus::Error { reason: "panicked".into() });
        assert_eq!(status("failed-first"), SpanStatus::Error { reason: "upstream refused".into() });
    }
}
