//! HTTP server setup.
//!
//! # Responsibilities
//! - Register one `Instrumented` handler per business route
//! - Serve `/metrics` and `/debug/pprof/profile` next to business routes
//! - Convert between axum requests and `ServiceRequest` / `ServiceResponse`
//! - Bind server to listener, stop accepting on the shutdown signal
//!
//! Unknown paths fall through to a plain 404 and are never recorded, so the
//! `route` label only ever holds registered routes.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::limit::RequestBodyLimitLayer;

use crate::http::handler::{Handler, Instrumented, RequestContext, ServiceRequest};
use crate::observability::telemetry::Telemetry;

pub const METRICS_PATH: &str = "/metrics";
pub const PROFILE_PATH: &str = "/debug/pprof/profile";
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// HTTP server for one service.
pub struct ServiceServer {
    telemetry: Telemetry,
    routes: Vec<(&'static str, Arc<dyn Handler>)>,
    request_timeout: Duration,
    max_body_bytes: usize,
}

impl ServiceServer {
    pub fn new(telemetry: Telemetry, request_timeout: Duration, max_body_bytes: usize) -> Self {
        Self {
            telemetry,
            routes: Vec::new(),
            request_timeout,
            max_body_bytes,
        }
    }

    /// Serve `path` with `handler`, wrapped in the instrumenting decorator.
    pub fn route<H: Handler>(mut self, path: &'static str, handler: H) -> Self {
        let wrapped: Arc<dyn Handler> = Arc::new(Instrumented::new(path, handler).with_timeout(self.request_timeout));
        self.routes.push((path, wrapped));
        self
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn paths(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.iter().map(|(path, _)| *path)
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route(METRICS_PATH, get(metrics_handler))
            .route(PROFILE_PATH, get(profile_handler));

        for (path, handler) in &self.routes {
            let handler = Arc::clone(handler);
            let cx = RequestContext::new(self.telemetry.clone());
            let limit = self.max_body_bytes;
            router = router.route(
                path,
                any(move |request: Request| {
                    let handler = Arc::clone(&handler);
                    let cx = cx.clone();
                    async move { dispatch(handler.as_ref(), &cx, request, limit).await }
                }),
            );
        }

        router
            .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
            .with_state(self.telemetry.clone())
            .layer(RequestBodyLimitLayer::new(self.max_body_bytes))
    }

    /// Run the server, accepting connections until `shutdown` fires, then
    /// drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.telemetry.identity(),
            routes = ?self.paths().collect::<Vec<_>>(),
            "HTTP server starting"
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn dispatch(handler: &dyn Handler, cx: &RequestContext, request: Request, limit: usize) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, path = %parts.uri.path(), "Rejected request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let request = ServiceRequest {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };

    match handler.call(cx, request).await {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn metrics_handler(State(telemetry): State<Telemetry>) -> Response {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        telemetry.registry().snapshot(),
    )
        .into_response()
}

async fn profile_handler(State(telemetry): State<Telemetry>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        telemetry.profiler().folded(),
    )
        .into_response()
}

impl std::fmt::Debug for ServiceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceServer")
            .field("service", &self.telemetry.identity().service_name())
            .field("routes", &self.paths().collect::<Vec<_>>())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, HandlerError, ServiceResponse};
    use crate::observability::metrics::{find_sample, REQUESTS_TOTAL};
    use crate::observability::resource::ServiceIdentity;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tower::ServiceExt;

    fn server() -> ServiceServer {
        let telemetry = Telemetry::builder(ServiceIdentity::new("server-test")).build().unwrap();
        ServiceServer::new(telemetry, Duration::from_secs(5), 1024)
            .route(
                "/hello",
                handler_fn(|_cx, _req| async { Ok(ServiceResponse::text("hi")) }),
            )
            .route(
                "/echo",
                handler_fn(|_cx, req: ServiceRequest| async move {
                    Ok(ServiceResponse::new(StatusCode::OK, "application/octet-stream", req.body))
                }),
            )
            .route(
                "/fail",
                handler_fn(|_cx, _req| async { Err(HandlerError::internal("nope")) }),
            )
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(path: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn routes_to_instrumented_handler() {
        let server = server();
        let response = server.router().oneshot(get("/hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "hi");

        let labels = [("route", "/hello"), ("method", "GET"), ("status_code", "200")];
        let snapshot = server.telemetry().registry().snapshot();
        assert_eq!(find_sample(&snapshot, REQUESTS_TOTAL, &labels), Some(1.0));
    }

    #[tokio::test]
    async fn handler_error_becomes_status_and_body() {
        let response = server().router().oneshot(get("/fail")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "nope");
    }

    #[tokio::test]
    async fn request_body_reaches_handler() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from("payload"))
            .unwrap();
        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(body_text(response).await, "payload");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/echo")
            .body(Body::from(vec![b'x'; 4096]))
            .unwrap();
        let response = server().router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unknown_paths_are_not_recorded() {
        let server = server();
        let response = server.router().oneshot(get("/nope/123")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!server.telemetry().registry().snapshot().contains("/nope/123"));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_exposition() {
        let server = server();
        server.router().oneshot(get("/hello")).await.unwrap();

        let response = server.router().oneshot(get(METRICS_PATH)).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], PROMETHEUS_CONTENT_TYPE);
        let text = body_text(response).await;
        assert!(text.contains("# TYPE http_requests_total counter"));
        assert!(!text.contains("route=\"/metrics\""));
    }

    #[tokio::test]
    async fn profile_endpoint_does_not_drain() {
        let server = server();
        server
            .telemetry()
            .profiler()
            .record(&["/products"], Duration::from_millis(100));

        for _ in 0..2 {
            let response = server.router().oneshot(get(PROFILE_PATH)).await.unwrap();
            assert_eq!(body_text(response).await, "server-test;/products 10\n");
        }
    }
}
