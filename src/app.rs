use std::{io::Write, process::ExitCode};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info};

use crate::{
    batch::run_batch,
    cli::{Args, BatchInput},
    config::BatchConfig,
    dispatch::BatchSummary,
    hostname::hostname,
    logging::{init_logging, LogSink},
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = Args::parse();
    let batch_input = args.batch_input().unwrap_or_else(|e| e.exit());

    let sink = match init_logging(args.verbosity, args.log_file.as_deref()) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    debug!("Fleet updater starting up");
    match inner_main(args, batch_input).await {
        Ok(summary) => {
            info!("{summary}");
            debug!("Fleet updater finished");
            ExitCode::SUCCESS
        }
        Err(e) => handle_toplevel_error(e, sink, &mut std::io::stderr()),
    }
}

/// Logs a fatal error, echoing it to `stderr` when logs go to a file.
fn handle_toplevel_error(err: anyhow::Error, sink: LogSink, stderr: &mut impl Write) -> ExitCode {
    error!("{err:#}");
    if sink == LogSink::File {
        let _ = writeln!(stderr, "{err:#}");
    }
    ExitCode::FAILURE
}

async fn inner_main(args: Args, batch_input: BatchInput) -> anyhow::Result<BatchSummary> {
    let BatchInput { apps, device_csv } = batch_input;

    let hostname = hostname().context("Failed to determine host name")?;
    let input = device_csv
        .open()
        .with_context(|| format!("Failed to open {device_csv}"))?;

    let config = BatchConfig::from_args(&args, &apps, hostname);
    debug!(config = %config.describe(), input = %device_csv, "Resolved configuration");

    let summary = run_batch(config, input).await?;
    Ok(summary)
}
