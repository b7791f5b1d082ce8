//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for one service
//! process. All types derive Serde traits for deserialization from config
//! files, and every section has defaults so a minimal file is valid.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::metrics::DEFAULT_LATENCY_BUCKETS;
use crate::services::ServiceKind;
use crate::trace::export::BatchConfig;

/// Root configuration for a kitchen-store service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Which service to run and the name it reports telemetry under.
    pub service: ServiceSection,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The service reached through the instrumented client.
    pub downstream: DownstreamConfig,

    /// Span sampling and export.
    pub tracing: TracingConfig,

    /// Request metrics.
    pub metrics: MetricsConfig,

    /// Profile collection and upload.
    pub profiling: ProfilingConfig,

    /// Synthetic load: CPU on the products route, sleep on the app root.
    pub bottleneck: BottleneckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Stock configuration for one of the three store services.
    pub fn for_kind(kind: ServiceKind) -> Self {
        let mut config = Self::default();
        config.service = ServiceSection {
            name: kind.default_name().to_string(),
            kind,
        };
        config.listener.bind_address = format!("0.0.0.0:{}", kind.default_port());
        config
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Service name attached to every span, metric series and profile.
    pub name: String,

    /// Which route set to serve.
    pub kind: ServiceKind,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: ServiceKind::Api.default_name().to_string(),
            kind: ServiceKind::Api,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum accepted request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", ServiceKind::Api.default_port()),
            max_body_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Base URL of the downstream service.
    pub base_url: String,

    /// Bound on every outbound call, in milliseconds.
    pub timeout_ms: u64,
}

impl DownstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://store-api:8080".to_string(),
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// One structured log event per finished span.
    Log,
    /// JSON batches POSTed to `tracing.endpoint`.
    Http,
    /// Spans are tracked but never exported.
    None,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    pub exporter: ExporterKind,

    /// Collector URL for the `http` exporter.
    pub endpoint: Option<String>,

    /// Fraction of new traces that are sampled, 0.0 to 1.0.
    pub sample_ratio: f64,

    pub max_queue_size: usize,
    pub max_export_batch_size: usize,
    pub scheduled_delay_ms: u64,
    pub export_timeout_ms: u64,
}

impl TracingConfig {
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_queue_size: self.max_queue_size,
            max_export_batch_size: self.max_export_batch_size,
            scheduled_delay: Duration::from_millis(self.scheduled_delay_ms),
            export_timeout: Duration::from_millis(self.export_timeout_ms),
        }
    }
}

impl Default for TracingConfig {
    fn default() -> Self {
        let batch = BatchConfig::default();
        Self {
            exporter: ExporterKind::Log,
            endpoint: None,
            sample_ratio: 1.0,
            max_queue_size: batch.max_queue_size,
            max_export_batch_size: batch.max_export_batch_size,
            scheduled_delay_ms: batch.scheduled_delay.as_millis() as u64,
            export_timeout_ms: batch.export_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Latency histogram upper bounds in seconds, strictly increasing.
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Push profiles to `server_address`. Collection runs regardless.
    pub enabled: bool,

    pub server_address: String,

    pub upload_interval_secs: u64,

    pub sample_rate_hz: u32,

    /// Extra tags on every upload; `service` is always added.
    pub tags: BTreeMap<String, String>,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_address: "http://pyroscope:4040".to_string(),
            upload_interval_secs: 10,
            sample_rate_hz: crate::profiling::collector::DEFAULT_SAMPLE_RATE_HZ,
            tags: BTreeMap::from([("environment".to_string(), "workshop".to_string())]),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BottleneckConfig {
    /// Busy-loop iterations per products request.
    pub iterations: u64,

    /// Upper bound on the app service's simulated sleep, in milliseconds.
    pub max_work_ms: u64,
}

impl Default for BottleneckConfig {
    fn default() -> Self {
        Self {
            iterations: 500_000_000,
            max_work_ms: 1_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total handler time) in seconds.
    pub request_secs: u64,

    /// Bound on draining requests and flushing telemetry at shutdown.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "kitchen_telemetry=info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServiceConfig = toml::from_str("").unwrap();
        assert_eq!(config.service.kind, ServiceKind::Api);
        assert_eq!(config.service.name, "store-api");
        assert_eq!(config.tracing.exporter, ExporterKind::Log);
        assert_eq!(config.metrics.latency_buckets.len(), 11);
        assert_eq!(config.profiling.tags.get("environment").map(String::as_str), Some("workshop"));
        assert_eq!(config.bottleneck.iterations, 500_000_000);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [service]
            kind = "client"
            name = "store-client"

            [tracing]
            exporter = "http"
            endpoint = "http://collector:4318/v1/spans"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.service.kind, ServiceKind::Client);
        assert_eq!(config.tracing.exporter, ExporterKind::Http);
        assert_eq!(config.tracing.max_queue_size, 2048);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter, "kitchen_telemetry=info");
    }

    #[test]
    fn stock_configs_per_kind() {
        let client = ServiceConfig::for_kind(ServiceKind::Client);
        assert_eq!(client.service.name, "store-client");
        assert_eq!(client.listener.bind_address, "0.0.0.0:8081");

        let app = ServiceConfig::for_kind(ServiceKind::App);
        assert_eq!(app.service.name, "example-app");
        assert_eq!(app.listener.bind_address, "0.0.0.0:8082");
    }
}
