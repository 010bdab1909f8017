//! talup - Talos cluster upgrade automation.
//!
//! Long-running webhook service that reacts to changes of the version-tracking
//! file and drives Talos OS and Kubernetes upgrades through talosctl and the
//! Image Factory, OS layer first, with idempotency and downgrade protection.

mod config;
mod error;
mod factory;
mod kubeconfig;
mod logging;
mod repo;
mod server;
mod talosconfig;
mod talosctl;
mod upgrades;
mod version;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    logging::init(&config.log_format, &config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        repository = %format!("{}/{}", config.github_owner, config.github_repo),
        "talup starting"
    );

    if let Err(e) = config.validate() {
        error!(error = %e, "Configuration validation failed");
        std::process::exit(1);
    }

    if let Err(e) = server::run(config).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }

    info!("Shutdown complete");
    Ok(())
}
