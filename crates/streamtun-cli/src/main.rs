//! streamtun CLI — TUN-to-TCP packet bridge

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::Ordering;
use streamtun_tunnel::{Bridge, BridgeConfig, TunnelError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// streamtun — forward IP packets between a TUN device and a TCP peer
#[derive(Parser)]
#[command(name = "streamtun")]
#[command(version)]
#[command(about = "Bridge a TUN device and a single TCP connection", long_about = None)]
struct Cli {
    /// TUN device name to create
    #[arg(long, default_value = "streamtun")]
    dev: String,

    /// Remote host to connect to (or bind to in listener mode)
    #[arg(long)]
    host: Option<String>,

    /// TCP port to connect to or listen on
    #[arg(long, default_value_t = streamtun_tunnel::DEFAULT_PORT)]
    port: u16,

    /// Accept one inbound connection instead of dialing out
    #[arg(long)]
    listener: bool,

    /// Congestion control algorithm to request on each connection
    #[arg(long)]
    congestion: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap's rendered diagnostic names the offending token.
            // Usage errors share exit status 1 with other setup
            // failures; status 2 is reserved for a dead device.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("{:#}", e);
        let device_failure = e
            .downcast_ref::<TunnelError>()
            .map(TunnelError::is_bridge_fatal)
            .unwrap_or(false);
        std::process::exit(if device_failure { 2 } else { 1 });
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = BridgeConfig::new(&cli.dev)
        .with_port(cli.port)
        .with_listener(cli.listener);
    if let Some(host) = &cli.host {
        config = config.with_host(host);
    }
    if let Some(algo) = &cli.congestion {
        config = config.with_congestion(algo);
    }

    let bridge = Bridge::new(config).context("Invalid configuration")?;

    // Set up signal handling (SIGINT and SIGTERM)
    let shutdown_flag = bridge.shutdown_flag();
    ctrlc::set_handler(move || {
        tracing::info!("Received shutdown signal");
        shutdown_flag.store(true, Ordering::Relaxed);
    })
    .context("Failed to set signal handler")?;

    bridge.run()?;

    tracing::info!("Tunnel stopped");
    Ok(())
}
