//! `store-api`: product and employee listings.
//!
//! `/products` burns CPU in the bottleneck simulator under a
//! `products-handler` span before answering.

use futures_util::future::BoxFuture;

use crate::http::handler::{Handler, HandlerResult, RequestContext, ServiceRequest, ServiceResponse};
use crate::profiling::bottleneck::Bottleneck;
use crate::services::catalog;

pub const PRODUCTS_ROUTE: &str = "/products";
pub const EMPLOYEES_ROUTE: &str = "/employees";
pub const PRODUCTS_SPAN: &str = "products-handler";

pub struct ProductsHandler {
    bottleneck: Bottleneck,
}

impl ProductsHandler {
    pub fn new(bottleneck: Bottleneck) -> Self {
        Self { bottleneck }
    }

    async fn handle(&self, cx: &RequestContext) -> HandlerResult {
        let mut span = cx.start_span(PRODUCTS_SPAN);
        let cx = cx.with_active_span(span.context());
        tracing::info!(trace_id = %span.context().trace_id, "Handling /products request");

        self.bottleneck.run(&cx, &[PRODUCTS_ROUTE, PRODUCTS_SPAN]).await;
        span.set_attribute("bottleneck_simulated", true);

        let response = ServiceResponse::json(&catalog::products())?;
        tracing::info!(trace_id = %span.context().trace_id, "Products request handled");
        Ok(response)
    }
}

impl Handler for ProductsHandler {
    fn call<'a>(&'a self, cx: &'a RequestContext, _request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin(self.handle(cx))
    }
}

pub struct EmployeesHandler;

impl Handler for EmployeesHandler {
    fn call<'a>(&'a self, _cx: &'a RequestContext, _request: ServiceRequest) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async {
            tracing::info!("Handling /employees request");
            ServiceResponse::json(&catalog::employees())
        })
    }
}
