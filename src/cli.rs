// src/cli.rs

use clap::{ArgGroup, Parser};

/// Snapshot a directory tree into a single document.
///
/// fconcat walks <INPUT_DIRECTORY>, writes a listing of every included entry
/// and then the (filtered, transformed) content of every included file to
/// <OUTPUT_FILE>, as plain text or JSON. Filter, format and content plugins
/// can be loaded from shared libraries with --plugin.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("binary_mode")
        .args(["binary_skip", "binary_include", "binary_placeholder"])
        .multiple(false)
))]
pub struct Cli {
    /// Directory to snapshot.
    pub input_directory: String,

    /// File the document is written to (created or truncated).
    pub output_file: String,

    // --- Filtering Options ---
    /// Exclude entries matching these glob patterns (case-insensitive, matched against
    /// the relative path and the basename; a matching directory drops its whole subtree).
    #[arg(long, value_name = "PATTERN", num_args = 1..)]
    pub exclude: Option<Vec<String>>,

    /// Include only files matching at least one of these glob patterns (case-insensitive).
    /// Directories are always descended into.
    #[arg(long, value_name = "PATTERN", num_args = 1..)]
    pub include: Option<Vec<String>>,

    /// Skip files whose content contains a NUL byte (default).
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub binary_skip: bool,

    /// Write binary files verbatim.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub binary_include: bool,

    /// Replace binary content with a placeholder line.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub binary_placeholder: bool,

    /// How to treat symbolic links: skip, follow, include or placeholder.
    #[arg(long, value_name = "MODE", default_value = "skip")]
    pub symlinks: String,

    /// Do not descend below this many directory levels.
    #[arg(long, value_name = "N", default_value_t = crate::constants::MAX_DEPTH)]
    pub max_depth: usize,

    // --- Output Options ---
    /// Output format: text, json, or the name of a loaded format plugin.
    #[arg(long, value_name = "NAME", default_value = "text")]
    pub format: String,

    /// Show file sizes (in KB, rounded up) in the structure listing.
    #[arg(short = 's', long, action = clap::ArgAction::SetTrue)]
    pub show_size: bool,

    // --- Plugins ---
    /// Load a plugin: PATH[:key=value,flag,...] (repeatable).
    #[arg(long = "plugin", value_name = "SPEC", action = clap::ArgAction::Append)]
    pub plugins: Vec<String>,

    // --- Diagnostics & Execution Control ---
    /// Shorthand for --log-level debug.
    #[arg(short = 'v', long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,

    /// Log threshold: error, warning, info, debug or trace.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Wait for Enter after processing, before plugins are unloaded.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub interactive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_and_multi_value_patterns() {
        let cli = Cli::parse_from([
            "fconcat", "src", "out.txt", "--exclude", "*.o", ".git", "--include", "*.c",
        ]);
        assert_eq!(cli.input_directory, "src");
        assert_eq!(cli.output_file, "out.txt");
        assert_eq!(
            cli.exclude,
            Some(vec!["*.o".to_string(), ".git".to_string()])
        );
        assert_eq!(cli.include, Some(vec!["*.c".to_string()]));
        assert_eq!(cli.symlinks, "skip");
        assert_eq!(cli.format, "text");
    }

    #[test]
    fn test_binary_modes_are_exclusive() {
        let result = Cli::try_parse_from([
            "fconcat",
            "in",
            "out",
            "--binary-skip",
            "--binary-placeholder",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_repeated_plugins_accumulate() {
        let cli = Cli::parse_from([
            "fconcat", "in", "out", "--plugin", "a.so", "--plugin", "b.so:x=1",
        ]);
        assert_eq!(cli.plugins, vec!["a.so", "b.so:x=1"]);
    }
}
