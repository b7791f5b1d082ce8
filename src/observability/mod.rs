//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every service builds one Telemetry at startup:
//!     → resource.rs (ServiceIdentity, attached to everything below)
//!     → metrics.rs (TelemetryRegistry: counters, histograms, gauges)
//!     → crate::trace (SpanTracker + BatchSpanProcessor)
//!     → crate::profiling (ProfileCollector)
//!
//! Consumers:
//!     → GET /metrics (Prometheus scrape of the registry)
//!     → span exporter (log / http collector)
//!     → profile uploader (folded stacks to the profiling backend)
//! ```
//!
//! # Design Decisions
//! - No global state: Telemetry is passed explicitly to every wrapper
//! - Telemetry is cheap to clone (all parts are Arc-backed)
//! - Logging stays global (tracing subscriber), as log output is process-wide

pub mod logging;
pub mod metrics;
pub mod resource;
pub mod telemetry;

pub use metrics::TelemetryRegistry;
pub use resource::ServiceIdentity;
pub use telemetry::{Telemetry, TelemetryBuilder, TelemetryError};
