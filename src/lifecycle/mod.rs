//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Telemetry (registry, tracker, exporter task, profiler)
//!            → bind listener → profile uploader task → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting + cancel bottlenecks → Drain requests
//!                     → Flush spans → Final profile upload → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: telemetry first, listener last
//! - Ordered shutdown: stop accept, drain, flush
//! - Shutdown has one deadline: tasks still running when it passes are aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{launch, RunningService, StartupError};
