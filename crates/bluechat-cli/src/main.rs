//! BlueChat CLI entry point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use bluechat_ble::BleTransport;
use bluechat_cli::{BluechatApp, Cli, CliAppConfig, CommandDispatcher};
use bluechat_core::RadioTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CliAppConfig::load_with_overrides(&cli.overrides())
        .context("Failed to load configuration")?;
    setup_logging(config.cli.verbose);
    debug!("Loaded configuration: {:?}", config);

    let transport: Arc<dyn RadioTransport> = Arc::new(BleTransport::with_config(config.ble.clone()));
    if cli.needs_radio() && !transport.is_radio_available().await {
        error!("Bluetooth is unavailable; check that the adapter is present and powered on");
        std::process::exit(1);
    }

    let mut app = BluechatApp::open(config, transport).context("Failed to open BlueChat state")?;
    if let Err(e) = CommandDispatcher::execute(cli.command, &mut app).await {
        error!("Command failed: {}", e);
        if let Err(e) = app.stop().await {
            debug!("Shutdown after failure: {}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Setup logging: `RUST_LOG` when set, otherwise DEBUG with --verbose, INFO without
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
