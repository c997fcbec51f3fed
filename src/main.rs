//! MCD Mosaic - batch converter and stitcher for raw imaging containers.
//!
//! This binary wires the CLI to the batch drivers and maps the batch summary
//! onto the three-way process exit status.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcd_mosaic::batch::{
    run_convert, run_stitch, BatchSummary, CancelFlag, ConvertOptions, StitchRunOptions,
};
use mcd_mosaic::config::{Cli, Command, ConvertConfig, StitchConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Convert(config) => convert(config).await,
        Command::Stitch(config) => stitch(config).await,
    }
}

// =============================================================================
// Convert Command
// =============================================================================

async fn convert(config: ConvertConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("configuration error: {e}");
        return ExitCode::from(2);
    }

    let cancel = install_cancel_handler();
    let options = ConvertOptions {
        workers: config.workers,
        extract_snapshots: !config.no_snapshots,
    };

    let summary = run_convert(&config.input, config.output.as_deref(), &options, cancel).await;
    report(summary)
}

// =============================================================================
// Stitch Command
// =============================================================================

async fn stitch(config: StitchConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("configuration error: {e}");
        return ExitCode::from(2);
    }

    let cancel = install_cancel_handler();
    let options = StitchRunOptions {
        pixel_type: config.output_type.into(),
        tile_edge: config.tile_edge,
        compression: config.compression.tag(),
        workers: config.workers,
    };

    let summary = run_stitch(&config.input, config.output.as_deref(), &options, cancel).await;
    report(summary)
}

// =============================================================================
// Helpers
// =============================================================================

/// Print the run summary and map it to the process exit code.
fn report(summary: BatchSummary) -> ExitCode {
    info!(
        "run complete: {} succeeded, {} skipped, {} failed",
        summary.succeeded, summary.skipped, summary.failed
    );
    ExitCode::from(summary.status().code())
}

/// Raise the shared cancel flag on Ctrl-C; the drivers check it between
/// containers and between ROIs.
fn install_cancel_handler() -> CancelFlag {
    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested; finishing the current item");
            flag.store(true, Ordering::Relaxed);
        }
    });
    cancel
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "mcd_mosaic=debug"
    } else {
        "mcd_mosaic=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
