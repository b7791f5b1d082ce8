//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the process `Telemetry` from configuration
//! - Start background tasks (span export, profile upload)
//! - Bind the listener and begin accepting traffic
//! - Tear everything down in order within the shutdown grace period
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listener starts last (traffic only when ready)
//! - Shutdown order: stop accepting and cut running bottlenecks short, drain
//!   in-flight requests, flush spans, final profile upload; all under one
//!   deadline

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::schema::{ExporterKind, ServiceConfig};
use crate::http::client::ClientError;
use crate::lifecycle::shutdown::{join_until, Deadline, Shutdown};
use crate::lifecycle::signals::wait_for_signal;
use crate::observability::resource::ServiceIdentity;
use crate::observability::telemetry::{Telemetry, TelemetryError};
use crate::profiling::bottleneck::Bottleneck;
use crate::profiling::uploader::{ProfileUploader, UploadError};
use crate::services::build_server;
use crate::trace::export::{ExportError, HttpSpanExporter, LogSpanExporter, SpanExporter};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to build span exporter: {0}")]
    Exporter(#[from] ExportError),
    #[error("failed to build downstream client: {0}")]
    Client(#[from] ClientError),
    #[error("failed to build profile uploader: {0}")]
    Profiler(#[from] UploadError),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server failed: {0}")]
    Serve(#[source] std::io::Error),
    #[error("HTTP server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// The exporter named by `tracing.exporter`, if any.
pub fn exporter_from_config(
    config: &ServiceConfig,
    identity: &ServiceIdentity,
) -> Result<Option<Arc<dyn SpanExporter>>, ExportError> {
    let exporter: Arc<dyn SpanExporter> = match config.tracing.exporter {
        ExporterKind::None => return Ok(None),
        ExporterKind::Log => Arc::new(LogSpanExporter),
        ExporterKind::Http => Arc::new(HttpSpanExporter::new(
            config.tracing.endpoint.clone().unwrap_or_default(),
            identity.clone(),
            Duration::from_millis(config.tracing.export_timeout_ms),
        )?),
    };
    Ok(Some(exporter))
}

/// A service accepting traffic, plus the background tasks it owns.
pub struct RunningService {
    local_addr: SocketAddr,
    telemetry: Telemetry,
    bottleneck: Bottleneck,
    shutdown: Shutdown,
    profiler_shutdown: Shutdown,
    server: Option<JoinHandle<Result<(), std::io::Error>>>,
    uploader: Option<JoinHandle<()>>,
    grace: Duration,
}

impl RunningService {
    /// Start the service described by `config`, exporting spans as configured.
    pub async fn start(config: &ServiceConfig) -> Result<Self, StartupError> {
        let identity = ServiceIdentity::new(config.service.name.as_str());
        let exporter = exporter_from_config(config, &identity)?;
        Self::start_with_exporter(config, exporter).await
    }

    /// Start the service with an explicit span exporter.
    pub async fn start_with_exporter(
        config: &ServiceConfig,
        exporter: Option<Arc<dyn SpanExporter>>,
    ) -> Result<Self, StartupError> {
        let identity = ServiceIdentity::new(config.service.name.as_str());
        tracing::info!(
            service = %identity,
            kind = %config.service.kind,
            exporter = ?config.tracing.exporter,
            sample_ratio = config.tracing.sample_ratio,
            "Initializing telemetry"
        );

        let mut builder = Telemetry::builder(identity.clone())
            .with_batch_config(config.tracing.batch_config())
            .with_latency_buckets(config.metrics.latency_buckets.clone())
            .with_sample_ratio(config.tracing.sample_ratio)
            .with_profile_sample_rate(config.profiling.sample_rate_hz);
        if let Some(exporter) = exporter {
            builder = builder.with_exporter(exporter);
        }
        let telemetry = builder.build()?;

        let bottleneck = Bottleneck::new(config.bottleneck.iterations);
        let server = build_server(config, telemetry.clone(), &bottleneck)?;
        let shutdown = Shutdown::new();
        // Fired only once the server has drained, so the final upload sees
        // samples from in-flight requests.
        let profiler_shutdown = Shutdown::new();

        let address = config.listener.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind { address, source })?;

        let uploader = if config.profiling.enabled {
            let mut tags = config.profiling.tags.clone();
            tags.insert("service".to_string(), identity.service_name().to_string());
            let uploader = ProfileUploader::new(
                telemetry.profiler().clone(),
                config.profiling.server_address.as_str(),
                identity.service_name(),
                tags,
                Duration::from_secs(config.profiling.upload_interval_secs),
                config.timeouts.shutdown_grace(),
            )?;
            Some(uploader.spawn(profiler_shutdown.subscribe()))
        } else {
            tracing::info!("Profile upload disabled, profiles stay local");
            None
        };

        let server = tokio::spawn(server.run(listener, shutdown.subscribe()));
        tracing::info!(address = %local_addr, service = %identity, "Listening for connections");

        Ok(Self {
            local_addr,
            telemetry,
            bottleneck,
            shutdown,
            profiler_shutdown,
            server: Some(server),
            uploader,
            grace: config.timeouts.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Serve until SIGINT/SIGTERM or until the server stops on its own.
    pub async fn run_until_signal(mut self) -> Result<(), StartupError> {
        let Some(mut server) = self.server.take() else {
            return Ok(());
        };

        let early_exit = tokio::select! {
            _ = wait_for_signal() => None,
            joined = &mut server => Some(joined),
        };

        match early_exit {
            None => {
                self.server = Some(server);
                self.stop().await;
                Ok(())
            }
            Some(joined) => {
                tracing::error!("HTTP server stopped unexpectedly");
                self.stop().await;
                joined?.map_err(StartupError::Serve)
            }
        }
    }

    /// Stop accepting, drain, and flush telemetry within the grace period.
    ///
    /// Returns `false` if anything had to be abandoned.
    pub async fn stop(mut self) -> bool {
        let deadline = Deadline::after(self.grace);
        tracing::info!(grace_secs = self.grace.as_secs(), "Shutting down");

        self.shutdown.trigger();
        self.bottleneck.cancel();

        let mut clean = true;
        if let Some(server) = self.server.take() {
            match join_until("http-server", server, deadline).await {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "HTTP server failed while draining");
                    clean = false;
                }
                None => clean = false,
            }
        }

        if !self.telemetry.shutdown(deadline.remaining()).await {
            clean = false;
        }

        if let Some(uploader) = self.uploader.take() {
            self.profiler_shutdown.trigger();
            clean &= join_until("profile-uploader", uploader, deadline).await.is_some();
        }

        let dropped = self.telemetry.tracker().dropped_spans();
        tracing::info!(clean, dropped_spans = dropped, "Shutdown complete");
        clean
    }
}

/// Start from `config` and serve until signalled.
pub async fn launch(config: &ServiceConfig) -> Result<(), StartupError> {
    RunningService::start(config).await?.run_until_signal().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceKind;

    fn local_config(kind: ServiceKind) -> ServiceConfig {
        let mut config = ServiceConfig::for_kind(kind);
        config.listener.bind_address = "127.0.0.1:0".into();
        config.tracing.exporter = ExporterKind::None;
        config.timeouts.shutdown_grace_secs = 2;
        config
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_stops_cleanly() {
        let service = RunningService::start(&local_config(ServiceKind::App)).await.unwrap();
        assert_ne!(service.local_addr().port(), 0);
        assert!(service.stop().await);
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let first = RunningService::start(&local_config(ServiceKind::App)).await.unwrap();
        let mut config = local_config(ServiceKind::App);
        config.listener.bind_address = first.local_addr().to_string();

        let err = RunningService::start(&config).await.err().unwrap();
        assert!(matches!(err, StartupError::Bind { .. }));
        first.stop().await;
    }

    #[test]
    fn exporter_kind_selects_exporter() {
        let identity = ServiceIdentity::new("store-api");
        let mut config = ServiceConfig::default();
        assert!(exporter_from_config(&config, &identity).unwrap().is_some());

        config.tracing.exporter = ExporterKind::None;
        assert!(exporter_from_config(&config, &identity).unwrap().is_none());
    }
}
