//! ArmorIQ proxy - policy-enforcing reverse proxy for agent traffic

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use armoriq_proxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::ProxyServer,
    registry::hash_secret,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::HashSecret { ref secret }) => run_hash_secret(secret),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Print the PHC hash of a shared secret
fn run_hash_secret(secret: &str) -> ExitCode {
    match hash_secret(secret) {
        Ok(hash) => {
            println!("{hash}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to hash secret: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the proxy server
async fn run_server(cli: Cli) -> ExitCode {
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        endpoints = config.endpoints.len(),
        "Starting ArmorIQ proxy"
    );

    let server = match ProxyServer::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Proxy error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}
