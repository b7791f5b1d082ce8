use std::path::PathBuf;

use clap::Parser;

use kitchen_telemetry::config::{load_config, ServiceConfig};
use kitchen_telemetry::lifecycle::launch;
use kitchen_telemetry::observability::logging::init_logging;
use kitchen_telemetry::services::ServiceKind;

#[derive(Parser)]
#[command(name = "kitchen-telemetry")]
#[command(about = "Run one instrumented kitchen-store service", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, conflicts_with = "service")]
    config: Option<PathBuf>,

    /// Run a service with its stock configuration
    #[arg(short, long, value_enum)]
    service: Option<ServiceKind>,

    /// Override the listener bind address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match (&cli.config, cli.service) {
        (Some(path), _) => load_config(path)?,
        (None, Some(kind)) => ServiceConfig::for_kind(kind),
        (None, None) => ServiceConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    init_logging(&config.logging);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        service = %config.service.name,
        kind = %config.service.kind,
        bind_address = %config.listener.bind_address,
        "kitchen-telemetry starting"
    );

    if let Err(e) = launch(&config).await {
        tracing::error!(error = %e, "Service failed");
        return Err(e.into());
    }
    Ok(())
}
