//! The three kitchen-store services.
//!
//! ```text
//!   store-client  GET /            landing text
//!                 GET /products    ──InstrumentedClient──▶  store-api  GET /products
//!                                                                      GET /employees
//!   example-app   GET /            random sleep, app_work_level gauge
//!                 GET /error       always 500
//! ```
//!
//! Each process runs exactly one service with its own `Telemetry`; services
//! only share the `traceparent` header on the wire.

pub mod api;
pub mod app;
pub mod catalog;
pub mod client;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::schema::ServiceConfig;
use crate::http::client::{ClientError, InstrumentedClient};
use crate::http::server::ServiceServer;
use crate::observability::telemetry::Telemetry;
use crate::profiling::bottleneck::Bottleneck;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Api,
    Client,
    App,
}

impl ServiceKind {
    pub fn default_name(self) -> &'static str {
        match self {
            ServiceKind::Api => "store-api",
            ServiceKind::Client => "store-client",
            ServiceKind::App => "example-app",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            ServiceKind::Api => 8080,
            ServiceKind::Client => 8081,
            ServiceKind::App => 8082,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Api => "api",
            ServiceKind::Client => "client",
            ServiceKind::App => "app",
        };
        f.write_str(name)
    }
}

/// Register the routes of `config.service.kind`, each behind the
/// instrumenting wrapper.
pub fn build_server(
    config: &ServiceConfig,
    telemetry: Telemetry,
    bottleneck: &Bottleneck,
) -> Result<ServiceServer, ClientError> {
    let server = ServiceServer::new(
        telemetry,
        config.timeouts.request(),
        config.listener.max_body_bytes,
    );

    let server = match config.service.kind {
        ServiceKind::Api => server
            .route(api::PRODUCTS_ROUTE, api::ProductsHandler::new(bottleneck.clone()))
            .route(api::EMPLOYEES_ROUTE, api::EmployeesHandler),
        ServiceKind::Client => {
            let downstream = InstrumentedClient::new(&config.downstream.base_url, config.downstream.timeout())?;
            server
                .route(client::LANDING_ROUTE, client::LandingHandler)
                .route(api::PRODUCTS_ROUTE, client::ProductsPageHandler::new(downstream))
        }
        ServiceKind::App => server
            .route(
                app::ROOT_ROUTE,
                app::WorkHandler::new(std::time::Duration::from_millis(config.bottleneck.max_work_ms)),
            )
            .route(app::ERROR_ROUTE, app::ErrorHandler),
    };
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_kind_registers_its_routes() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let bottleneck = Bottleneck::new(1);

        let expected: [(ServiceKind, &[&str]); 3] = [
            (ServiceKind::Api, &["/products", "/employees"]),
            (ServiceKind::Client, &["/", "/products"]),
            (ServiceKind::App, &["/", "/error"]),
        ];
        for (kind, routes) in expected {
            let config = ServiceConfig::for_kind(kind);
            let telemetry = Telemetry::builder(crate::observability::resource::ServiceIdentity::new(
                kind.default_name(),
            ))
            .build()
            .unwrap();
            let server = build_server(&config, telemetry, &bottleneck).unwrap();
            assert_eq!(server.paths().collect::<Vec<_>>(), routes);
        }
    }

    #[test]
    fn kind_parses_from_config_text() {
        #[derive(Deserialize)]
        struct Wrapper {
            kind: ServiceKind,
        }
        let parsed: Wrapper = toml::from_str("kind = \"client\"").unwrap();
        assert_eq!(parsed.kind, ServiceKind::Client);
        assert_eq!(ServiceKind::App.to_string(), "app");
    }
}
