//! # preampctl
//!
//! Command line client for a networked studio preamp.
//!
//! ## Usage
//!
//! ```bash
//! # Switch channel 2 to the line input at gain 30
//! preampctl set 2 --input line --gain 30
//!
//! # Set the active input's gain on channel 0
//! preampctl gain 0 45
//!
//! # Show the frame without sending it
//! preampctl gain 0 45 --dry-run
//!
//! # Follow every change the unit reports
//! PREAMP_HOST=10.0.0.20 preampctl monitor
//! ```

mod cli;
mod commands;
mod config;
mod metrics;
mod session;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "preampctl=info,preamp_core=info,preamp_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = cli::Cli::parse();

    // Load configuration, then let flags override it
    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(encoding) = cli.gain_encoding {
        config.protocol.gain_encoding = encoding;
    }

    tracing::debug!(
        "Using unit at {} ({} gains)",
        config.endpoint(),
        config.protocol.gain_encoding
    );

    if config.metrics.enabled {
        metrics::init_metrics();
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            tracing::error!("Failed to start metrics server: {}", e);
        }
    }

    commands::run(config, cli.command).await
}
