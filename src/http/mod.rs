//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, body limit, route table)
//!     → handler.rs (Instrumented: extract traceparent, server span, metrics)
//!     → business handler (services/*)
//!         → client.rs (client span, inject traceparent) → downstream service
//!     → ServiceResponse → Send to client
//! ```

pub mod client;
pub mod handler;
pub mod server;

pub use client::{ClientError, InstrumentedClient};
pub use handler::{
    handler_fn, Handler, HandlerError, HandlerResult, Instrumented, RequestContext, ServiceRequest,
    ServiceResponse,
};
pub use server::ServiceServer;
