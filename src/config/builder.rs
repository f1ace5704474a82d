use super::{
    parsing::{normalize_patterns, parse_log_level, parse_plugin_spec, parse_symlink_handling},
    validation::validate_cli_options,
    BinaryHandling, Config, LogLevel, PluginSpec, SymlinkHandling,
};
use crate::cli::Cli;
use crate::constants::MAX_DEPTH;
use anyhow::Result;
use std::path::PathBuf;

/// Log threshold requested on the command line.
///
/// Resolved on its own so the logger can be installed before the rest of the
/// configuration is parsed.
pub fn resolve_log_level(cli: &Cli) -> Result<LogLevel> {
    // An explicit --log-level wins over -v.
    match &cli.log_level {
        Some(level) => parse_log_level(level),
        None if cli.verbose => Ok(LogLevel::Debug),
        None => Ok(LogLevel::Info),
    }
}

impl TryFrom<Cli> for Config {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        validate_cli_options(&cli)?;

        let binary_handling = if cli.binary_include {
            BinaryHandling::Include
        } else if cli.binary_placeholder {
            BinaryHandling::Placeholder
        } else {
            BinaryHandling::Skip
        };

        let log_level = resolve_log_level(&cli)?;

        let plugins = cli
            .plugins
            .iter()
            .map(|spec| parse_plugin_spec(spec))
            .collect::<Result<Vec<_>>>()?;

        let config = ConfigBuilder::new(cli.input_directory, cli.output_file)
            .exclude_patterns(normalize_patterns(cli.exclude))
            .include_patterns(normalize_patterns(cli.include))
            .show_size(cli.show_size)
            .verbose(cli.verbose)
            .interactive(cli.interactive)
            .output_format(cli.format.trim())
            .binary_handling(binary_handling)
            .symlink_handling(parse_symlink_handling(&cli.symlinks)?)
            .log_level(log_level)
            .plugins(plugins)
            .max_depth(cli.max_depth)
            .build();

        log::debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }
}

/// Builds a [`Config`] programmatically.
///
/// Every setting starts at the command-line default: text format, binary
/// skip, symlink skip, info logging, no patterns, no plugins.
///
/// # Examples
///
/// ```
/// use fconcat::config::{BinaryHandling, ConfigBuilder};
///
/// let config = ConfigBuilder::new("project", "snapshot.json")
///     .output_format("json")
///     .exclude_patterns(vec!["target".to_string()])
///     .binary_handling(BinaryHandling::Placeholder)
///     .build();
///
/// assert_eq!(config.output_format, "json");
/// assert_eq!(config.exclude_patterns, vec!["target"]);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Starts a builder for the given input directory and output file.
    pub fn new(input_directory: impl Into<PathBuf>, output_file: impl Into<PathBuf>) -> Self {
        Self {
            config: Config {
                input_directory: input_directory.into(),
                output_file: output_file.into(),
                exclude_patterns: Vec::new(),
                include_patterns: Vec::new(),
                show_size: false,
                verbose: false,
                interactive: false,
                output_format: "text".to_string(),
                binary_handling: BinaryHandling::default(),
                symlink_handling: SymlinkHandling::default(),
                log_level: LogLevel::default(),
                plugins: Vec::new(),
                max_depth: MAX_DEPTH,
            },
        }
    }

    /// Sets the exclude glob patterns.
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.exclude_patterns = patterns;
        self
    }

    /// Sets the include glob patterns.
    pub fn include_patterns(mut self, patterns: Vec<String>) -> Self {
        self.config.include_patterns = patterns;
        self
    }

    /// Enables `[N KB]` annotations in the text listing.
    pub fn show_size(mut self, show: bool) -> Self {
        self.config.show_size = show;
        self
    }

    /// Records the `-v` flag.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.config.verbose = verbose;
        self
    }

    /// Enables waiting for Enter before teardown.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.config.interactive = interactive;
        self
    }

    /// Sets the requested format name.
    pub fn output_format(mut self, name: impl Into<String>) -> Self {
        self.config.output_format = name.into();
        self
    }

    /// Sets the binary policy.
    pub fn binary_handling(mut self, handling: BinaryHandling) -> Self {
        self.config.binary_handling = handling;
        self
    }

    /// Sets the symlink policy.
    pub fn symlink_handling(mut self, handling: SymlinkHandling) -> Self {
        self.config.symlink_handling = handling;
        self
    }

    /// Sets the diagnostic threshold.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    /// Sets the plugins to load.
    pub fn plugins(mut self, plugins: Vec<PluginSpec>) -> Self {
        self.config.plugins = plugins;
        self
    }

    /// Sets the traversal depth cap.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Config {
        self.config
    }
}
