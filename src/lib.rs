//! `fconcat` is a library and command-line tool that snapshots a directory
//! tree into a single document: a structural listing followed by the
//! (filtered, transformed) contents of every included file.
//!
//! A run is built from five parts:
//! 1.  **Traversal**: an explicit-stack, cycle-safe directory walk.
//! 2.  **Filtering**: ordered include/exclude/transform rules plus filter plugins.
//! 3.  **Formatting**: the built-in `text` and `json` formats, or a format plugin.
//! 4.  **Plugins**: shared libraries speaking a small versioned C ABI.
//! 5.  **Memory**: a tiered buffer pool and a checked allocator for plugin buffers.
//!
//! # Example: Library Usage
//!
//! ```
//! use fconcat::{run, CancellationToken, ConfigBuilder};
//! use std::fs;
//! use tempfile::tempdir;
//!
//! let temp_dir = tempdir().unwrap();
//! let project = temp_dir.path().join("project");
//! fs::create_dir(&project).unwrap();
//! fs::write(project.join("hello.txt"), "Hello, world!").unwrap();
//!
//! let output = temp_dir.path().join("snapshot.txt");
//! let config = ConfigBuilder::new(&project, &output).build();
//! let summary = run(config, &CancellationToken::new()).unwrap();
//!
//! assert_eq!(summary.stats.processed_files, 1);
//! let document = fs::read_to_string(&output).unwrap();
//! assert!(document.contains("// File: hello.txt\nHello, world!"));
//! ```

pub mod cancellation;
pub mod cli;
pub mod config;
pub mod constants;
pub mod context;
pub mod core_types;
pub mod errors;
pub mod filter;
pub mod format;
pub mod logging;
pub mod memory;
pub mod pipeline;
pub mod plugin;
pub mod signal;
pub mod traversal;
pub mod writer;

mod sync;

pub use cancellation::CancellationToken;
pub use config::{BinaryHandling, Config, ConfigBuilder, LogLevel, SymlinkHandling};
pub use context::{Engines, ProcessingContext};
pub use core_types::{EntryKind, FileInfo, ProcessingStats};
pub use errors::{Error, Result};
pub use pipeline::{run, run_to, run_with, RunSummary};
