//! Distributed tracing.
//!
//! # Data Flow
//! ```text
//! inbound headers
//!     → propagation.rs (traceparent → TraceContext, or None)
//!     → span.rs (SpanTracker::start → SpanGuard, child of inbound context)
//!     → [handler work, nested SpanGuards]
//!     → span.rs (SpanGuard end / drop → FinishedSpan)
//!     → export.rs (bounded queue → batch → exporter)
//!
//! outbound call
//!     → span.rs (client span, child of the active span)
//!     → propagation.rs (TraceContext → traceparent header)
//! ```
//!
//! # Design Decisions
//! - W3C `traceparent` is the only wire format
//! - Spans are owned by the task that opened them, never shared
//! - Export is best-effort: failures never reach the request path

pub mod context;
pub mod export;
pub mod propagation;
pub mod span;

pub use context::{SpanId, TraceContext, TraceId};
pub use export::{
    BatchConfig, BatchSpanProcessor, ExportError, HttpSpanExporter, InMemorySpanExporter,
    LogSpanExporter, SpanExporter, SpanSink,
};
pub use propagation::{Extractor, Injector, TraceContextPropagator, TRACEPARENT_HEADER};
pub use span::{AttributeValue, FinishedSpan, SpanGuard, SpanKind, SpanStatus, SpanTracker};
