//! Outbound HTTP client that carries the active trace across the wire.
//!
//! Every call opens a client span under the caller's active span, injects
//! that span as `traceparent` and records the hop's latency. Failures reach
//! the caller unchanged; the client never retries.

use std::time::{Duration, Instant};

use axum::http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::http::handler::{HandlerError, RequestContext};
use crate::trace::span::SpanKind;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("invalid downstream url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request to {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<ClientError> for HandlerError {
    fn from(err: ClientError) -> Self {
        match &err {
            ClientError::Status { .. } => HandlerError::bad_gateway(err.to_string()),
            _ => HandlerError::internal(err.to_string()),
        }
    }
}

/// HTTP client bound to one downstream service.
#[derive(Debug, Clone)]
pub struct InstrumentedClient {
    http: reqwest::Client,
    base_url: Url,
}

impl InstrumentedClient {
    /// `timeout` bounds every call made through this client.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|source| ClientError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get(&self, cx: &RequestContext, path: &str) -> Result<reqwest::Response, ClientError> {
        self.send(cx, Method::GET, path).await
    }

    /// Dispatch `method path` downstream. A non-success status is an error.
    pub async fn send(
        &self,
        cx: &RequestContext,
        method: Method,
        path: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let url = self.base_url.join(path).map_err(|source| ClientError::InvalidUrl {
            url: format!("{}{}", self.base_url, path),
            source,
        })?;

        let mut span = cx.start_span_with_kind(format!("{method} {path}"), SpanKind::Client);
        let span_cx = span.context();
        span.set_attribute("http.method", method.as_str());
        span.set_attribute("http.url", url.as_str());

        let mut headers = HeaderMap::new();
        cx.telemetry().propagator().inject(&span_cx, &mut headers);

        tracing::debug!(
            trace_id = %span_cx.trace_id,
            span_id = %span_cx.span_id,
            method = %method,
            url = %url,
            "Calling downstream"
        );

        let started = Instant::now();
        let sent = self
            .http
            .request(method, url.clone())
            .headers(headers)
            .send()
            .await;
        span.set_attribute("http.duration_ms", started.elapsed().as_secs_f64() * 1000.0);

        let result = match sent {
            Ok(response) => {
                let status = response.status();
                span.set_attribute("http.status_code", i64::from(status.as_u16()));
                if status.is_success() {
                    Ok(response)
                } else {
                    Err(ClientError::Status {
                        url: url.to_string(),
                        status,
                    })
                }
            }
            Err(source) if source.is_timeout() => Err(ClientError::Timeout {
                url: url.to_string(),
                source,
            }),
            Err(source) => Err(ClientError::Transport {
                url: url.to_string(),
                source,
            }),
        };

        if let Err(e) = &result {
            span.record_error(e);
            tracing::warn!(trace_id = %span_cx.trace_id, error = %e, "Downstream call failed");
        }
        span.end();
        result
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, cx: &RequestContext, path: &str) -> Result<T, ClientError> {
        let response = self.get(cx, path).await?;
        let url = response.url().to_string();
        response
            .json::<T>()
            .await
            .map_err(|source| ClientError::Decode { url, source })
    }
}
