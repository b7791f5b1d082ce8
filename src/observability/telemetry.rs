//! Per-process telemetry context.

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;

use crate::observability::metrics::{TelemetryRegistry, DEFAULT_LATENCY_BUCKETS};
use crate::observability::resource::ServiceIdentity;
use crate::profiling::collector::{ProfileCollector, DEFAULT_SAMPLE_RATE_HZ};
use crate::trace::export::{BatchConfig, BatchSpanProcessor, SpanExporter};
use crate::trace::propagation::TraceContextPropagator;
use crate::trace::span::SpanTracker;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid latency buckets: {0}")]
    Buckets(#[from] BuildError),
}

/// Everything a service needs to instrument itself.
///
/// Built once at startup and cloned into every handler wrapper and client.
#[derive(Clone)]
pub struct Telemetry {
    identity: ServiceIdentity,
    registry: TelemetryRegistry,
    tracker: SpanTracker,
    propagator: TraceContextPropagator,
    profiler: ProfileCollector,
    processor: Option<Arc<BatchSpanProcessor>>,
}

impl Telemetry {
    pub fn builder(identity: ServiceIdentity) -> TelemetryBuilder {
        TelemetryBuilder {
            identity,
            latency_buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
            exporter: None,
            batch: BatchConfig::default(),
            sample_ratio: 1.0,
            profile_sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
        }
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn registry(&self) -> &TelemetryRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &SpanTracker {
        &self.tracker
    }

    pub fn propagator(&self) -> &TraceContextPropagator {
        &self.propagator
    }

    pub fn profiler(&self) -> &ProfileCollector {
        &self.profiler
    }

    /// Push every queued span to the exporter.
    pub async fn force_flush(&self) {
        if let Some(processor) = &self.processor {
            processor.force_flush().await;
        }
    }

    /// Flush and stop the span exporter within `grace`.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        match &self.processor {
            Some(processor) => processor.shutdown(grace).await,
            None => true,
        }
    }
}

pub struct TelemetryBuilder {
    identity: ServiceIdentity,
    latency_buckets: Vec<f64>,
    exporter: Option<Arc<dyn SpanExporter>>,
    batch: BatchConfig,
    sample_ratio: f64,
    profile_sample_rate_hz: u32,
}

impl TelemetryBuilder {
    pub fn with_exporter(mut self, exporter: Arc<dyn SpanExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_latency_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.latency_buckets = buckets;
        self
    }

    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = ratio;
        self
    }

    pub fn with_profile_sample_rate(mut self, hz: u32) -> Self {
        self.profile_sample_rate_hz = hz;
        self
    }

    /// Build the telemetry context. Spawns the export task when an exporter
    /// is configured, so this must run inside a tokio runtime.
    pub fn build(self) -> Result<Telemetry, TelemetryError> {
        let registry = TelemetryRegistry::new(&self.identity, &self.latency_buckets)?;
        let processor = self
            .exporter
            .map(|exporter| Arc::new(BatchSpanProcessor::spawn(exporter, self.batch)));
        let tracker = SpanTracker::new(
            self.identity.clone(),
            processor.as_ref().map(|p| p.sink()),
            self.sample_ratio,
        );

        Ok(Telemetry {
            profiler: ProfileCollector::new(self.identity.clone(), self.profile_sample_rate_hz),
            identity: self.identity,
            registry,
            tracker,
            propagator: TraceContextPropagator::new(),
            processor,
        })
    }
}
