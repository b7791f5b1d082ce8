//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ratios in [0, 1])
//! - Check addresses and URLs parse
//! - Check latency buckets are usable histogram bounds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{ExporterKind, ServiceConfig};
use crate::services::ServiceKind;

/// One rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    if config.service.kind == ServiceKind::Client {
        if let Err(e) = Url::parse(&config.downstream.base_url) {
            errors.push(ValidationError::new(
                "downstream.base_url",
                format!("'{}' is not a URL: {e}", config.downstream.base_url),
            ));
        }
    }
    if config.downstream.timeout_ms == 0 {
        errors.push(ValidationError::new("downstream.timeout_ms", "must be greater than 0"));
    }

    let tracing = &config.tracing;
    if !(0.0..=1.0).contains(&tracing.sample_ratio) {
        errors.push(ValidationError::new("tracing.sample_ratio", "must be between 0.0 and 1.0"));
    }
    if tracing.max_queue_size == 0 {
        errors.push(ValidationError::new("tracing.max_queue_size", "must be greater than 0"));
    }
    if tracing.max_export_batch_size == 0 {
        errors.push(ValidationError::new("tracing.max_export_batch_size", "must be greater than 0"));
    }
    if tracing.export_timeout_ms == 0 {
        errors.push(ValidationError::new("tracing.export_timeout_ms", "must be greater than 0"));
    }
    if tracing.exporter == ExporterKind::Http {
        match &tracing.endpoint {
            None => errors.push(ValidationError::new("tracing.endpoint", "required when exporter is 'http'")),
            Some(endpoint) if Url::parse(endpoint).is_err() => {
                errors.push(ValidationError::new("tracing.endpoint", format!("'{endpoint}' is not a URL")))
            }
            Some(_) => {}
        }
    }

    let buckets = &config.metrics.latency_buckets;
    if buckets.is_empty() {
        errors.push(ValidationError::new("metrics.latency_buckets", "must not be empty"));
    } else if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        errors.push(ValidationError::new("metrics.latency_buckets", "bounds must be positive and finite"));
    } else if buckets.windows(2).any(|w| w[0] >= w[1]) {
        errors.push(ValidationError::new("metrics.latency_buckets", "bounds must be strictly increasing"));
    }

    let profiling = &config.profiling;
    if profiling.sample_rate_hz == 0 {
        errors.push(ValidationError::new("profiling.sample_rate_hz", "must be greater than 0"));
    }
    if profiling.enabled {
        if Url::parse(&profiling.server_address).is_err() {
            errors.push(ValidationError::new(
                "profiling.server_address",
                format!("'{}' is not a URL", profiling.server_address),
            ));
        }
        if profiling.upload_interval_secs == 0 {
            errors.push(ValidationError::new("profiling.upload_interval_secs", "must be greater than 0"));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
