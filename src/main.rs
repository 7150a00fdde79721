//! time-server: A concurrent TCP time server
//!
//! Clients connect, receive a greeting, and may send:
//! - `TIME`: reply with the current server time as `JAM HH:MM:SS`
//! - `QUIT`: close the connection
//!
//! Features:
//! - One task per connection, no connection limit
//! - Per-read idle timeout that keeps idle clients connected
//! - Graceful shutdown on SIGINT/SIGTERM with a bounded drain
//! - Configuration via CLI arguments or TOML file

mod acceptor;
mod config;
mod error;
mod protocol;
mod server;
mod session;
mod shutdown;

use config::Config;
use server::TimeServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "Starting time server"
    );

    print_banner(&config);

    let server = TimeServer::new(config);
    if let Err(e) = server.start().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    if let Some(addr) = server.local_addr() {
        println!("Server is running on {}. Press Ctrl+C to stop...", addr);
    }

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received");

    server.stop().await?;
    info!(abandoned = server.active_sessions(), "Shutdown complete");
    Ok(())
}

fn print_banner(config: &Config) {
    println!("=================================================");
    println!("       TIME SERVER - Concurrent TCP Server       ");
    println!("=================================================");
    println!("Listening on: {}", config.address());
    println!("Commands supported:");
    println!("  - TIME    : Get current server time");
    println!("  - QUIT    : Close the connection");
    println!("=================================================");
}

/// Wait for SIGINT or SIGTERM
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
    Ok(())
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
