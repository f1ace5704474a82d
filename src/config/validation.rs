// src/config/validation.rs

use crate::cli::Cli;
use crate::constants::MAX_PLUGINS;
use anyhow::{anyhow, Result};

/// Validates combinations of CLI options that clap cannot easily express.
pub(super) fn validate_cli_options(cli: &Cli) -> Result<()> {
    if cli.input_directory.trim().is_empty() {
        return Err(anyhow!("Input directory must not be empty."));
    }
    if cli.output_file.trim().is_empty() {
        return Err(anyhow!("Output file must not be empty."));
    }
    if cli.format.trim().is_empty() {
        return Err(anyhow!("--format requires a non-empty name."));
    }
    if cli.max_depth == 0 {
        return Err(anyhow!("--max-depth must be at least 1."));
    }
    if cli.plugins.len() > MAX_PLUGINS {
        return Err(anyhow!(
            "Too many plugins: {} given, at most {} can be loaded.",
            cli.plugins.len(),
            MAX_PLUGINS
        ));
    }
    Ok(())
}
