//! `example-app`: a root route doing random amounts of work and a route
//! that always fails.

use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::http::handler::{Handler, HandlerError, HandlerResult, RequestContext, ServiceRequest, ServiceResponse};

pub const ROOT_ROUTE: &str = "/";
pub const ERROR_ROUTE: &str = "/error";
pub const WORK_LEVEL_GAUGE: &str = "app_work_level";
pub const ERROR_MESSAGE: &str = "An intentional error occurred.";

/// Sleeps for a random duration below `max_work` and reports it.
pub struct WorkHandler {
    max_work: Duration,
}

impl WorkHandler {
    pub fn new(max_work: Duration) -> Self {
        Self { max_work }
    }

    async fn handle(&self, cx: &RequestContext) -> HandlerResult {
        let mut span = cx.start_span("root-handler");
        let max_ms = self.max_work.as_millis() as u64;
        let work_ms = if max_ms == 0 { 0 } else { fastrand::u64(0..max_ms) };
        span.set_attribute("work.duration_ms", work_ms);

        tokio::time::sleep(Duration::from_millis(work_ms)).await;
        cx.telemetry().registry().set_gauge(WORK_LEVEL_GAUGE, work_ms as f64);

        tracing::info!(trace_id = %span.context().trace_id, duration_ms = work_ms, "Request handled successfully");
        Ok(ServiceResponse::text(format!(
            "Hello, Observability! Work completed in {work_ms} ms.\n"
        )))
    }
}

impl Handler for WorkHandler {
    fn call<'a>(&'a self, cx: &'a RequestContext, _request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.handle(cx))
    }
}

pub struct ErrorHandler;

impl Handler for ErrorHandler {
    fn call<'a>(&'a self, _cx: &'a RequestContext, request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            tracing::error!(path = %request.uri.path(), "{ERROR_MESSAGE}");
            Err(HandlerError::internal(ERROR_MESSAGE))
        })
    }
}
