//! Defines the frozen `Config` and the policy types it carries.
//!
//! A `Config` is produced once per run, either from the command line
//! (`Config::try_from(cli)`) or programmatically through [`ConfigBuilder`],
//! and is only read afterwards. Plugins see it through the keyed getters
//! [`Config::get_string`], [`Config::get_int`] and [`Config::get_bool`].

use std::fmt;
use std::path::PathBuf;

pub use builder::{resolve_log_level, ConfigBuilder};
mod builder;
mod parsing;
mod validation;

pub use parsing::{parse_log_level, parse_plugin_spec, parse_symlink_handling};

/// What to do with files whose content contains a NUL byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryHandling {
    /// Drop the file's content.
    #[default]
    Skip,
    /// Write the bytes unchanged.
    Include,
    /// Replace the content with a placeholder line.
    Placeholder,
}

impl BinaryHandling {
    /// Stable integer code exposed to plugins.
    pub fn code(self) -> i32 {
        match self {
            BinaryHandling::Skip => 0,
            BinaryHandling::Include => 1,
            BinaryHandling::Placeholder => 2,
        }
    }
}

/// What to do with symbolic links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkHandling {
    /// Leave links out of the snapshot.
    #[default]
    Skip,
    /// Resolve links and treat them as their targets (directories are descended into).
    Follow,
    /// List links as files without following them.
    Include,
    /// List links and write `// [Symbolic link to: <target>]` as their content.
    Placeholder,
}

impl SymlinkHandling {
    /// Stable integer code exposed to plugins.
    pub fn code(self) -> i32 {
        match self {
            SymlinkHandling::Skip => 0,
            SymlinkHandling::Follow => 1,
            SymlinkHandling::Include => 2,
            SymlinkHandling::Placeholder => 3,
        }
    }
}

/// Diagnostic threshold. Lower levels are more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warning,
    /// Normal progress messages.
    #[default]
    Info,
    /// Per-entry decisions.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Stable integer code exposed to plugins (0 = error .. 4 = trace).
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Inverse of [`LogLevel::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(LogLevel::Error),
            1 => Some(LogLevel::Warning),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Debug),
            4 => Some(LogLevel::Trace),
            _ => None,
        }
    }

    /// The `log` crate filter for this threshold.
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }

    /// The `log` crate level for messages at this severity.
    pub fn to_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// A plugin to load: shared library path plus raw parameter strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSpec {
    /// Path of the shared library.
    pub path: PathBuf,
    /// Raw parameters, either `key=value` or bare tokens, in command-line order.
    pub parameters: Vec<String>,
}

/// The resolved, read-only configuration of one run.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory to snapshot.
    pub input_directory: PathBuf,
    /// Destination of the document.
    pub output_file: PathBuf,
    /// Trimmed `--exclude` glob patterns.
    pub exclude_patterns: Vec<String>,
    /// Trimmed `--include` glob patterns. Empty means "include everything".
    pub include_patterns: Vec<String>,
    /// Show `[N KB]` in the text listing.
    pub show_size: bool,
    /// `-v` was given.
    pub verbose: bool,
    /// Wait for Enter before teardown.
    pub interactive: bool,
    /// Requested format name.
    pub output_format: String,
    /// Binary content policy.
    pub binary_handling: BinaryHandling,
    /// Symbolic link policy.
    pub symlink_handling: SymlinkHandling,
    /// Diagnostic threshold.
    pub log_level: LogLevel,
    /// Plugins to load, in order.
    pub plugins: Vec<PluginSpec>,
    /// Traversal depth cap.
    pub max_depth: usize,
}

impl Config {
    /// String-valued settings by key: `output_format`, `input_directory`, `output_file`.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match key {
            "output_format" => Some(self.output_format.clone()),
            "input_directory" => Some(self.input_directory.display().to_string()),
            "output_file" => Some(self.output_file.display().to_string()),
            _ => None,
        }
    }

    /// Integer settings by key: `binary_handling`, `symlink_handling`, `log_level`.
    /// Unknown keys yield 0.
    pub fn get_int(&self, key: &str) -> i32 {
        match key {
            "binary_handling" => self.binary_handling.code(),
            "symlink_handling" => self.symlink_handling.code(),
            "log_level" => self.log_level.code(),
            _ => 0,
        }
    }

    /// Boolean settings by key: `show_size`, `verbose`, `interactive`.
    /// Unknown keys yield `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        match key {
            "show_size" => self.show_size,
            "verbose" => self.verbose,
            "interactive" => self.interactive,
            _ => false,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("input_directory", &self.input_directory)
            .field("output_file", &self.output_file)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("include_patterns", &self.include_patterns)
            .field("output_format", &self.output_format)
            .field("binary_handling", &self.binary_handling)
            .field("symlink_handling", &self.symlink_handling)
            .field("log_level", &self.log_level)
            .field("plugins", &self.plugins.len())
            .field("max_depth", &self.max_depth)
            .finish_non_exhaustive()
    }
}
