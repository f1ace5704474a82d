//! Defines application-specific error types.
//!
//! This module provides the `Error` enum, which categorizes the failures that
//! can stop a run: fatal setup problems, aborted traversals and user
//! cancellation. Per-entry I/O faults and plugin faults are logged and skipped
//! by the engines and never surface here.

use thiserror::Error;

/// Application-specific errors used throughout `fconcat`.
#[derive(Error, Debug)]
pub enum Error {
    // --- I/O Errors ---
    /// Error occurring during file or directory access (read, write, metadata).
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        /// The path that caused the I/O error.
        path: String,
        /// The underlying `std::io::Error`.
        #[source]
        source: std::io::Error,
    },

    /// Writing to the output stream failed.
    #[error("Failed to write output: {0}")]
    Output(#[source] std::io::Error),

    // --- Configuration Errors ---
    /// Invalid configuration settings or combinations.
    #[error("Invalid configuration: {0}")]
    Config(String),

    // --- Engine Errors ---
    /// A plugin library could not be loaded or was rejected.
    #[error("Plugin '{path}' could not be loaded: {reason}")]
    Plugin {
        /// The path of the shared library.
        path: String,
        /// Why the load was refused.
        reason: String,
    },

    /// A formatter hook reported a failure.
    #[error("Format error: {0}")]
    Format(String),

    /// Allocation of core bookkeeping failed.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // --- Signal Handling ---
    /// The operation was cancelled by the user (e.g., Ctrl+C).
    #[error("Operation cancelled by user (Ctrl+C)")]
    Interrupted,
}

/// Result alias used by the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Helper function to create an `Error::Io` with path context.
///
/// # Arguments
/// * `source` - The original `std::io::Error`.
/// * `path` - The path associated with the error.
pub fn io_error_with_path<P: AsRef<std::path::Path>>(source: std::io::Error, path: P) -> Error {
    Error::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}
