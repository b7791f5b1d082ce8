//! Periodic push of folded stacks to a Pyroscope-compatible backend.
//!
//! ```text
//! POST {server}/ingest?name=<service>.cpu{service=..,environment=..}
//!                     &from=<unix>&until=<unix>&format=folded&sampleRate=<hz>
//! body: "store-api;/products;products-handler;simulate-cpu-work 230\n..."
//! ```
//!
//! Upload failures are logged and the samples are dropped.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::profiling::collector::{render_folded, ProfileCollector};

const SPY_NAME: &str = "kitchen-telemetry";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("profiling backend unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("profiling backend rejected upload with status {0}")]
    Rejected(reqwest::StatusCode),
}

pub struct ProfileUploader {
    client: reqwest::Client,
    server_address: String,
    tags: BTreeMap<String, String>,
    collector: ProfileCollector,
    interval: Duration,
    app_name: String,
}

impl ProfileUploader {
    pub fn new(
        collector: ProfileCollector,
        server_address: impl Into<String>,
        app_name: impl Into<String>,
        tags: BTreeMap<String, String>,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            server_address: server_address.into().trim_end_matches('/').to_string(),
            tags,
            collector,
            interval,
            app_name: app_name.into(),
        })
    }

    /// Application name with tags, as the backend expects it.
    pub fn qualified_name(&self) -> String {
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}.cpu{{{}}}", self.app_name, tags)
    }

    /// Upload on every tick until shutdown, then upload once more.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                server = %self.server_address,
                application = %self.qualified_name(),
                interval_secs = self.interval.as_secs(),
                "Profile uploader starting"
            );
            let period = self.interval.max(Duration::from_secs(1));
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            let mut window_start = unix_secs();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        window_start = self.upload_window(window_start).await;
                    }
                    _ = shutdown.recv() => {
                        self.upload_window(window_start).await;
                        tracing::info!("Profile uploader stopped");
                        break;
                    }
                }
            }
        })
    }

    async fn upload_window(&self, from: u64) -> u64 {
        let until = unix_secs().max(from + 1);
        let stacks = self.collector.drain();
        if stacks.is_empty() {
            return until;
        }
        let total: u64 = stacks.iter().map(|(_, n)| n).sum();
        match self.upload(&render_folded(&stacks), from, until).await {
            Ok(()) => tracing::debug!(stacks = stacks.len(), samples = total, "Uploaded profile"),
            Err(e) => tracing::warn!(error = %e, samples = total, "Profile upload failed, samples dropped"),
        }
        until
    }

    async fn upload(&self, body: &str, from: u64, until: u64) -> Result<(), UploadError> {
        let response = self
            .client
            .post(format!("{}/ingest", self.server_address))
            .query(&[
                ("name", self.qualified_name()),
                ("from", from.to_string()),
                ("until", until.to_string()),
                ("format", "folded".to_string()),
                ("sampleRate", self.collector.sample_rate_hz().to_string()),
                ("spyName", SPY_NAME.to_string()),
            ])
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body.to_string())
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(UploadError::Rejected(response.status()))
        }
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::resource::ServiceIdentity;

    #[test]
    fn qualified_name_lists_sorted_tags() {
        let collector = ProfileCollector::new(ServiceIdentity::new("store-api"), 100);
        let tags = BTreeMap::from([
            ("service".to_string(), "store-api".to_string()),
            ("environment".to_string(), "workshop".to_string()),
        ]);
        let uploader = ProfileUploader::new(
            collector,
            "http://pyroscope:4040/",
            "store-api",
            tags,
            Duration::from_secs(10),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            uploader.qualified_name(),
            "store-api.cpu{environment=workshop,service=store-api}"
        );
        assert_eq!(uploader.server_address, "http://pyroscope:4040");
    }

    #[tokio::test]
    async fn unreachable_backend_drops_samples() {
        let collector = ProfileCollector::new(ServiceIdentity::new("store-api"), 100);
        collector.record(&["work"], Duration::from_millis(100));
        let uploader = ProfileUploader::new(
            collector.clone(),
            "http://127.0.0.1:1",
            "store-api",
            BTreeMap::new(),
            Duration::from_secs(10),
            Duration::from_millis(500),
        )
        .unwrap();

        uploader.upload_window(unix_secs()).await;
        assert!(collector.is_empty());
    }
}
