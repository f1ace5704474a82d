// src/pipeline.rs

//! Runs one snapshot from configuration to finished document.
//!
//! The order is fixed: open the output, build the engines, load and register
//! plugins, create the [`ProcessingContext`], initialise plugins, write the
//! document, flush, tear the plugins down. Cancellation is polled between the
//! document phases only; a walk in progress always finishes.

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::context::{Engines, ProcessingContext};
use crate::core_types::ProcessingStats;
use crate::errors::{Error, Result};
use crate::memory::MemoryStats;
use crate::traversal;
use crate::writer::open_output;
use log::{debug, info};
use std::io::Write;
use std::time::{Duration, Instant};

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub stats: ProcessingStats,
    /// Tracked allocator totals at the end of the run.
    pub memory: MemoryStats,
    pub elapsed: Duration,
}

/// Runs the pipeline, writing to `config.output_file`.
///
/// # Errors
/// Fails when the output cannot be created or written, when a formatter
/// fails, or with [`Error::Interrupted`] once `cancel` has been triggered.
/// Per-entry and plugin problems are logged and never fail the run.
pub fn run(config: Config, cancel: &CancellationToken) -> Result<RunSummary> {
    run_with(config, cancel, |_| {})
}

/// Like [`run`], calling `before_teardown` after a successful document and
/// before plugins are cleaned up.
pub fn run_with<F>(config: Config, cancel: &CancellationToken, before_teardown: F) -> Result<RunSummary>
where
    F: FnOnce(&ProcessingContext),
{
    let output = open_output(&config.output_file)?;
    run_to(config, output, cancel, before_teardown)
}

/// Runs the pipeline against an arbitrary sink.
pub fn run_to<F>(
    config: Config,
    output: Box<dyn Write + Send>,
    cancel: &CancellationToken,
    before_teardown: F,
) -> Result<RunSummary>
where
    F: FnOnce(&ProcessingContext),
{
    let started = Instant::now();
    info!(
        "Processing '{}' into '{}'",
        config.input_directory.display(),
        config.output_file.display()
    );

    let engines = Engines::for_config(&config);
    let loaded = engines
        .plugins
        .load_all(&config.plugins, &engines.filter, &engines.format);
    if !config.plugins.is_empty() {
        info!("Loaded {} of {} plugins", loaded, config.plugins.len());
    }
    let plugins = engines.plugins.clone();

    let ctx = ProcessingContext::new(config, output, engines, cancel.clone());
    let failures = plugins.initialize(&ctx);
    if failures > 0 {
        debug!("{} plugins failed to initialise", failures);
    }

    let result = write_document(&ctx).and_then(|()| ctx.flush_output());
    if result.is_ok() {
        before_teardown(&ctx);
    }
    plugins.destroy(Some(&ctx));
    result?;

    let summary = RunSummary {
        stats: ctx.stats(),
        memory: ctx.memory().stats(),
        elapsed: started.elapsed(),
    };
    debug!("Run finished: {:?}", summary);
    Ok(summary)
}

fn checkpoint(ctx: &ProcessingContext, phase: &str) -> Result<()> {
    if ctx.is_cancelled() {
        info!("Cancelled before {}", phase);
        return Err(Error::Interrupted);
    }
    Ok(())
}

fn write_document(ctx: &ProcessingContext) -> Result<()> {
    let format = ctx.format();

    checkpoint(ctx, "begin document")?;
    format.begin_document(ctx)?;

    checkpoint(ctx, "structure")?;
    format.begin_structure(ctx)?;
    traversal::write_structure(ctx)?;
    checkpoint(ctx, "end of structure")?;
    format.end_structure(ctx)?;

    checkpoint(ctx, "content")?;
    format.begin_content(ctx)?;
    traversal::write_contents(ctx)?;
    checkpoint(ctx, "end of content")?;
    format.end_content(ctx)?;

    checkpoint(ctx, "end document")?;
    format.end_document(ctx)
}
