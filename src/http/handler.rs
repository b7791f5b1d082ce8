//! Handler capability and the instrumenting decorator.
//!
//! # Responsibilities
//! - Define `Handler`, the unit every route is built from
//! - Carry the active span through `RequestContext`
//! - `Instrumented` wraps any handler with a server span, request metrics and
//!   error-to-status translation, without touching the success output
//!
//! # Design Decisions
//! - Wrapping is plain value composition: `Instrumented::new(route, inner)`
//!   is itself a `Handler`, so fakes can be swapped in for tests
//! - Panics and timeouts inside the inner handler become 500 / 503 errors,
//!   so metrics and spans are recorded on every exit path

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;

use crate::observability::telemetry::Telemetry;
use crate::trace::context::TraceContext;
use crate::trace::propagation::TRACEPARENT_HEADER;
use crate::trace::span::{SpanGuard, SpanKind};

/// Inbound request as seen by a handler.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ServiceRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(path: &'static str) -> Self {
        Self::new(Method::GET, Uri::from_static(path))
    }
}

/// Handler output, passed through to the client unchanged.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ServiceResponse {
    pub fn new(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(StatusCode::OK, "text/plain; charset=utf-8", body)
    }

    pub fn html(body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(StatusCode::OK, "text/html; charset=utf-8", body)
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, HandlerError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| HandlerError::internal(format!("failed to encode response: {e}")))?;
        Ok(Self::new(StatusCode::OK, "application/json", body))
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl IntoResponse for ServiceResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// A failed request, carrying the status it should be reported with.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    status: StatusCode,
    message: String,
}

impl HandlerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

pub type HandlerResult = Result<ServiceResponse, HandlerError>;

/// Per-request view of the service's telemetry plus the active span.
#[derive(Clone)]
pub struct RequestContext {
    telemetry: Telemetry,
    active: Option<TraceContext>,
}

impl RequestContext {
    pub fn new(telemetry: Telemetry) -> Self {
        Self {
            telemetry,
            active: None,
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn active_span(&self) -> Option<&TraceContext> {
        self.active.as_ref()
    }

    /// Same telemetry, with `span` as the parent of anything opened next.
    pub fn with_active_span(&self, span: TraceContext) -> Self {
        Self {
            telemetry: self.telemetry.clone(),
            active: Some(span),
        }
    }

    /// Open an internal span under the active span.
    pub fn start_span(&self, name: impl Into<String>) -> SpanGuard {
        self.start_span_with_kind(name, SpanKind::Internal)
    }

    pub fn start_span_with_kind(&self, name: impl Into<String>, kind: SpanKind) -> SpanGuard {
        self.telemetry
            .tracker()
            .start_with_kind(name, kind, self.active.as_ref())
    }
}

/// Anything that can serve a request.
pub trait Handler: Send + Sync + 'static {
    fn call<'a>(&'a self, cx: &'a RequestContext, request: ServiceRequest) -> BoxFuture<'a, HandlerResult>;
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call<'a>(&'a self, cx: &'a RequestContext, request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        (**self).call(cx, request)
    }
}

/// Adapts an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(RequestContext, ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    HandlerFn(f)
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(RequestContext, ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call<'a>(&'a self, cx: &'a RequestContext, request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin((self.0)(cx.clone(), request))
    }
}

/// Decorates a handler with a server span and request metrics.
pub struct Instrumented<H> {
    route: &'static str,
    inner: H,
    timeout: Option<Duration>,
}

impl<H: Handler> Instrumented<H> {
    pub fn new(route: &'static str, inner: H) -> Self {
        Self {
            route,
            inner,
            timeout: None,
        }
    }

    /// Abandon the inner handler after `timeout` and report 503.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn route(&self) -> &'static str {
        self.route
    }

    async fn handle(&self, cx: &RequestContext, request: ServiceRequest) -> HandlerResult {
        let started = Instant::now();
        let telemetry = cx.telemetry();
        let method = request.method.clone();

        let parent = telemetry.propagator().extract(&request.headers);
        if parent.is_none() && request.headers.contains_key(TRACEPARENT_HEADER) {
            tracing::debug!(route = self.route, "Ignoring malformed traceparent, starting a new trace");
        }

        let mut span = telemetry
            .tracker()
            .start_with_kind(self.route, SpanKind::Server, parent.as_ref());
        span.set_attribute("http.route", self.route);
        span.set_attribute("http.method", method.as_str());
        let span_cx = span.context();
        let inner_cx = cx.with_active_span(span_cx);

        let call = AssertUnwindSafe(self.inner.call(&inner_cx, request)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => Ok(Err(HandlerError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "request timed out",
                ))),
            },
            None => call.await,
        };
        let result = outcome.unwrap_or_else(|_| {
            tracing::error!(trace_id = %span_cx.trace_id, route = self.route, "Handler panicked");
            Err(HandlerError::internal("internal error"))
        });

        let status = match &result {
            Ok(response) => response.status,
            Err(e) => e.status(),
        };
        span.set_attribute("http.status_code", i64::from(status.as_u16()));
        match &result {
            Err(e) => span.record_error(e),
            Ok(response) if response.status.is_server_error() => {
                span.record_error(format!("HTTP {}", response.status))
            }
            Ok(_) => {}
        }

        let elapsed = started.elapsed();
        let registry = telemetry.registry();
        registry.increment_request(self.route, &method, status.as_u16());
        registry.observe_latency(self.route, elapsed.as_secs_f64());

        if status.is_server_error() {
            tracing::warn!(
                trace_id = %span_cx.trace_id,
                span_id = %span_cx.span_id,
                route = self.route,
                method = %method,
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Request failed"
            );
        } else {
            tracing::info!(
                trace_id = %span_cx.trace_id,
                span_id = %span_cx.span_id,
                route = self.route,
                method = %method,
                status = status.as_u16(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Request handled"
            );
        }

        span.end();
        result
    }
}

impl<H: Handler> Handler for Instrumented<H> {
    fn call<'a>(&'a self, cx: &'a RequestContext, request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.handle(cx, request))
    }
}
