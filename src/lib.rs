//! Kitchen-store telemetry pipeline.
//!
//! Three small HTTP services instrumented end to end: every request gets a
//! server span, a counter increment and a latency observation; the store
//! client calls the store api with the trace carried in `traceparent`; the
//! api's products route burns CPU that shows up in folded-stack profiles.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────── one service process ─────────────────────────┐
//!                 │                                                                        │
//!   request ──────┼─▶ http::server ──▶ http::handler::Instrumented ──▶ services::{api,..}  │
//!   traceparent   │                     │  extract / server span          │                │
//!                 │                     │  metrics on every exit          ├─▶ profiling::  │
//!                 │                     ▼                                 │   bottleneck   │
//!                 │   ┌───────────── observability::Telemetry ──────────┐ │                │
//!                 │   │ trace::span::SpanTracker ─▶ trace::export (task) │ └─▶ http::client ┼──▶ downstream
//!                 │   │ observability::metrics::TelemetryRegistry        │      client span  │   traceparent
//!                 │   │ profiling::collector::ProfileCollector ─▶ upload │                   │
//!                 │   └──────────────────────────────────────────────────┘                   │
//!                 │   GET /metrics            GET /debug/pprof/profile                       │
//!                 └────────────────────────────────────────────────────────────────────────┘
//! ```

// Core pipeline
pub mod http;
pub mod observability;
pub mod profiling;
pub mod trace;

// Services and process plumbing
pub mod config;
pub mod lifecycle;
pub mod services;

pub use config::ServiceConfig;
pub use http::{Handler, Instrumented, InstrumentedClient, ServiceServer};
pub use lifecycle::{RunningService, Shutdown};
pub use observability::Telemetry;
pub use services::ServiceKind;
