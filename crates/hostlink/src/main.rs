use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hostlink_core::demo::DemoHost;
use hostlink_executor::HostTool;
use hostlink_transport::{Client, SseConnector, StaticDiscovery};
use tracing_subscriber::{EnvFilter, fmt};

mod config;

use config::{Cli, Config, LogFormat};

fn init_logging(format: LogFormat) {
    // stderr, so --print-config output stays clean
    let filter = EnvFilter::try_from_env("HOSTLINK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = Config::load(&cli)?;
    if cli.print_config {
        print!("{}", config.to_redacted_toml()?);
        return Ok(());
    }

    tracing::info!(
        url = %config.server.url,
        tool = %config.tool.name,
        "Starting hostlink"
    );

    let host = Arc::new(DemoHost::new());
    let (tool, host_thread) =
        HostTool::start(host, config.script.clone()).context("Failed to start the host thread")?;

    let connector = Arc::new(SseConnector::new(config.client.session_endpoint_timeout()));
    let discovery = Arc::new(StaticDiscovery::new(
        config.server.url.clone(),
        config.server.token.clone(),
    ));
    let client = Client::spawn(
        config.client.clone(),
        config.tool.clone(),
        discovery,
        connector,
        Arc::new(tool),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    client.shutdown().await;
    let stats = client.stats();
    tracing::info!(?stats, "Client stopped");
    drop(client);

    // The dispatcher held the last marshaler; the host thread exits once it
    // drains.
    tokio::task::spawn_blocking(move || host_thread.join())
        .await
        .context("Host thread join failed")?;
    tracing::info!("hostlink stopped");
    Ok(())
}
