//! Profiling support.
//!
//! # Data Flow
//! ```text
//! handler
//!     → bottleneck.rs (busy loop under a span, on the blocking pool)
//!     → collector.rs (CPU time → folded-stack samples, keyed by span names)
//!     → uploader.rs (periodic push to the profiling backend)
//!     → GET /debug/pprof/profile (current aggregate, not drained)
//! ```
//!
//! # Design Decisions
//! - Stacks are named after spans, so profiles and traces use one vocabulary
//! - The busy loop is never inlined and uses `black_box` so it survives
//!   optimisation and keeps its own frame in native profilers
//! - Uploads are best-effort; a dead backend never affects requests

pub mod bottleneck;
pub mod collector;
pub mod uploader;

pub use bottleneck::{simulate_cpu_work, Bottleneck, BottleneckReport};
pub use collector::ProfileCollector;
pub use uploader::ProfileUploader;
