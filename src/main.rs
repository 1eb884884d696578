//! Gateway command line entry point
//!
//! Each invocation runs exactly one phase: import, export, pack,
//! process-held, areafix, maintenance, or check. An external scheduler
//! (cron, a mailer event) drives the cycle; the run lock keeps invocations
//! from overlapping. `--dry-run` performs every read and validation step
//! without writing anything.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ftn_gate::{GateConfig, Gateway, RunLock};

#[derive(Parser)]
#[command(name = "ftngate")]
#[command(about = "FidoNet echomail / NNTP gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Phase,

    /// Configuration file path
    #[arg(short, long, default_value = "ftngate.toml", global = true)]
    config: PathBuf,

    /// Perform all read/validation steps without any write
    #[arg(long, global = true)]
    dry_run: bool,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Phase {
    /// Import inbound FidoNet packets and gate them to the news server
    Import,
    /// Fetch new articles and pack them into FidoNet packets
    Export,
    /// Pack any pending outbound messages into packets
    Pack,
    /// Release approved held messages into both pipelines
    ProcessHeld,
    /// Process areafix requests only
    Areafix,
    /// Expire old processed packets and hold records
    Maintenance,
    /// Validate configuration and test the news server connection
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("ftn_gate={0},ftngate={0}", default_level))),
        )
        .init();

    let config = match GateConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // One run system-wide; finding another active run is a clean no-op exit
    let _lock = match RunLock::acquire(&config.paths.lock_file) {
        Ok(Some(lock)) => Some(lock),
        Ok(None) => {
            info!("another run is active, exiting");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("cannot acquire run lock: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let phase_timeout = Duration::from_secs(config.gateway.phase_timeout_secs.max(1));
    let mut gateway = match Gateway::new(config, cli.dry_run) {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("cannot initialize gateway: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // A stuck phase must never block the whole cycle: the phase is abandoned
    // at the timeout and the scheduler moves on
    let phase_name;
    let result = match cli.command {
        Phase::Import => {
            phase_name = "import";
            tokio::time::timeout(phase_timeout, gateway.import()).await
        }
        Phase::Export => {
            phase_name = "export";
            tokio::time::timeout(phase_timeout, gateway.export()).await
        }
        Phase::Pack => {
            phase_name = "pack";
            Ok(gateway.pack())
        }
        Phase::ProcessHeld => {
            phase_name = "process-held";
            tokio::time::timeout(phase_timeout, gateway.process_held()).await
        }
        Phase::Areafix => {
            phase_name = "areafix";
            Ok(gateway.areafix_only())
        }
        Phase::Maintenance => {
            phase_name = "maintenance";
            Ok(gateway.maintenance())
        }
        Phase::Check => {
            phase_name = "check";
            tokio::time::timeout(phase_timeout, gateway.check()).await
        }
    };

    match result {
        Ok(Ok(())) => {
            info!("{} finished", phase_name);
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("{} failed: {}", phase_name, e);
            ExitCode::FAILURE
        }
        Err(_) => {
            warn!("{} abandoned after {:?} timeout", phase_name, phase_timeout);
            ExitCode::FAILURE
        }
    }
}
