//! `store-client`: storefront pages backed by the api service.

use std::fmt::Write as _;

use futures_util::future::BoxFuture;

use crate::http::client::InstrumentedClient;
use crate::http::handler::{Handler, HandlerResult, RequestContext, ServiceRequest, ServiceResponse};
use crate::services::api::PRODUCTS_ROUTE;
use crate::services::catalog::Product;

pub const LANDING_ROUTE: &str = "/";
pub const LANDING_TEXT: &str = "Welcome to the kitchen store!\n";
pub const LANDING_SPAN: &str = "landing-page";
pub const PRODUCTS_PAGE_SPAN: &str = "client-products-page";

pub struct LandingHandler;

impl Handler for LandingHandler {
    fn call<'a>(&'a self, cx: &'a RequestContext, _request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let span = cx.start_span(LANDING_SPAN);
            tracing::info!(trace_id = %span.context().trace_id, "Serving landing page");
            Ok(ServiceResponse::text(LANDING_TEXT))
        })
    }
}

/// Fetches `/products` from the api and renders it as HTML.
///
/// A non-success api status becomes 502; transport, timeout and decode
/// failures become 500.
pub struct ProductsPageHandler {
    api: InstrumentedClient,
}

impl ProductsPageHandler {
    pub fn new(api: InstrumentedClient) -> Self {
        Self { api }
    }

    async fn handle(&self, cx: &RequestContext) -> HandlerResult {
        let mut span = cx.start_span(PRODUCTS_PAGE_SPAN);
        let cx = cx.with_active_span(span.context());
        tracing::info!(trace_id = %span.context().trace_id, "Fetching products from api");

        let products: Vec<Product> = match self.api.get_json(&cx, PRODUCTS_ROUTE).await {
            Ok(products) => products,
            Err(e) => {
                span.record_error(&e);
                return Err(e.into());
            }
        };
        span.set_attribute("products.count", products.len() as u64);
        tracing::info!(trace_id = %span.context().trace_id, count = products.len(), "Products served to client");
        Ok(ServiceResponse::html(render_products(&products)))
    }
}

impl Handler for ProductsPageHandler {
    fn call<'a>(&'a self, cx: &'a RequestContext, _request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.handle(cx))
    }
}

pub fn render_products(products: &[Product]) -> String {
    let mut html = String::from("<html><body><h1>Our Products</h1><ul>");
    for p in products {
        let _ = write!(
            html,
            "<li><strong>{}</strong>: {} (${}.{:02})</li>",
            p.id,
            escape_html(&p.name),
            p.price / 100,
            p.price % 100
        );
    }
    html.push_str("</ul></body></html>");
    html
}

fn escape_html(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            c => c.to_string(),
        })
        .collect()
}
