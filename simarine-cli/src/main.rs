//! Simarine Pico observation toolkit entry point.
//!
//! Command tree:
//!   run                       polling snapshot emitter (JSON per interval)
//!   observe device|sensor     diff observer for one object
//!   graph pressure-history    terminal chart of the 72 h broadcast series
//!   monitor pressure          TCP sensor vs UDP history head delta
//!
//! SIGINT/SIGTERM cancel a shared token; every long-running loop checks it
//! between blocking points, so shutdown lands within one timeout window.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use commands::{graph, monitor, observe, run};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "simarine", about = "Simarine Pico observation toolkit")]
struct Cli {
    /// Verbose wire-level logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Continuously poll devices and sensors and emit JSON snapshots
    Run(run::RunArgs),
    /// Observe changes on a single device or sensor
    #[command(subcommand)]
    Observe(observe::ObserveCommand),
    /// Generate graphs from broadcast data
    #[command(subcommand)]
    Graph(graph::GraphCommand),
    /// Monitor live readings
    #[command(subcommand)]
    Monitor(monitor::MonitorCommand),
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "simarine=debug,simarine_client=debug,simarine_proto=debug"
    } else {
        "simarine=info,simarine_client=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    let result = match cli.command {
        Commands::Run(args) => run::run(args, token).await,
        Commands::Observe(cmd) => observe::run(cmd, token).await,
        Commands::Graph(cmd) => graph::run(cmd, token).await,
        Commands::Monitor(cmd) => monitor::run(cmd, token).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("failed to install SIGTERM handler: {e}");
                        let _ = ctrl_c.await;
                        info!("interrupt received, shutting down");
                        token.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("interrupt received, shutting down");
        token.cancel();
    });
}
