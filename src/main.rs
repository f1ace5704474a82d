// src/main.rs

use anyhow::Result;
use clap::Parser;
use fconcat::cli::Cli;
use fconcat::config::{resolve_log_level, Config};
use fconcat::errors::Error;
use fconcat::logging::init_logging;
use fconcat::signal::setup_signal_handler;
use fconcat::{run_with, ProcessingContext, RunSummary};
use std::io::{self, BufRead, Write};

fn main() -> Result<()> {
    // --- Setup ---
    let cli = Cli::parse();
    // The logger goes first so warnings raised while parsing the rest are shown.
    init_logging(resolve_log_level(&cli)?);
    let config = Config::try_from(cli)?;
    log::debug!("Starting fconcat v{}", env!("CARGO_PKG_VERSION"));

    let token = setup_signal_handler()?;
    let interactive = config.interactive;

    // --- Execution ---
    let result = run_with(config, &token, |ctx| {
        if interactive {
            wait_for_enter(ctx);
        }
    });

    // --- Error Handling ---
    match result {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(Error::Interrupted) => {
            eprintln!("\nOperation cancelled.");
            std::process::exit(130);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Blocks until a line arrives on stdin, so loaded plugins can be inspected.
fn wait_for_enter(ctx: &ProcessingContext) {
    print!(
        "Processing done with {} plugin(s) loaded. Press Enter to unload them and exit...",
        ctx.plugins().plugin_count()
    );
    let _ = io::stdout().flush();
    let mut line = String::new();
    if let Err(e) = io::stdin().lock().read_line(&mut line) {
        log::warn!("Could not read from stdin: {}", e);
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Processing completed successfully!");
    println!("Processing time: {:.3} s", summary.elapsed.as_secs_f64());
    println!("Files processed: {}", summary.stats.processed_files);
    println!("Bytes processed: {}", summary.stats.processed_bytes);
    println!("Peak tracked memory: {} bytes", summary.memory.peak_usage);
}
