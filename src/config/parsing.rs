// src/config/parsing.rs

use super::{LogLevel, PluginSpec, SymlinkHandling};
use crate::constants::MAX_PLUGIN_PARAMS;
use anyhow::{anyhow, Result};
use std::path::PathBuf;

/// Parses a `--log-level` value. `warn` is accepted as an alias of `warning`.
pub fn parse_log_level(value: &str) -> Result<LogLevel> {
    match value.trim().to_ascii_lowercase().as_str() {
        "error" => Ok(LogLevel::Error),
        "warning" | "warn" => Ok(LogLevel::Warning),
        "info" => Ok(LogLevel::Info),
        "debug" => Ok(LogLevel::Debug),
        "trace" => Ok(LogLevel::Trace),
        other => Err(anyhow!(
            "Invalid log level '{}'. Expected error, warning, info, debug or trace.",
            other
        )),
    }
}

/// Parses a `--symlinks` value.
pub fn parse_symlink_handling(value: &str) -> Result<SymlinkHandling> {
    match value.trim().to_ascii_lowercase().as_str() {
        "skip" => Ok(SymlinkHandling::Skip),
        "follow" => Ok(SymlinkHandling::Follow),
        "include" => Ok(SymlinkHandling::Include),
        "placeholder" => Ok(SymlinkHandling::Placeholder),
        other => Err(anyhow!(
            "Invalid symlink mode '{}'. Expected skip, follow, include or placeholder.",
            other
        )),
    }
}

/// Parses `PATH[:param,param,...]` into a [`PluginSpec`].
///
/// Parameters beyond [`MAX_PLUGIN_PARAMS`] are dropped with a warning and
/// empty parameters are ignored.
pub fn parse_plugin_spec(spec: &str) -> Result<PluginSpec> {
    let (path, params) = match spec.split_once(':') {
        Some((path, params)) => (path, Some(params)),
        None => (spec, None),
    };
    if path.trim().is_empty() {
        return Err(anyhow!("Plugin specification '{}' has no library path", spec));
    }

    let mut parameters: Vec<String> = params
        .into_iter()
        .flat_map(|p| p.split(','))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();
    if parameters.len() > MAX_PLUGIN_PARAMS {
        log::warn!(
            "Plugin '{}' has {} parameters, only the first {} are used",
            path,
            parameters.len(),
            MAX_PLUGIN_PARAMS
        );
        parameters.truncate(MAX_PLUGIN_PARAMS);
    }

    Ok(PluginSpec {
        path: PathBuf::from(path.trim()),
        parameters,
    })
}

/// Trims spaces and tabs from each pattern and drops the empty ones.
pub(super) fn normalize_patterns(patterns: Option<Vec<String>>) -> Vec<String> {
    patterns
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.trim_matches(|c| c == ' ' || c == '\t').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level_variants() -> Result<()> {
        assert_eq!(parse_log_level("error")?, LogLevel::Error);
        assert_eq!(parse_log_level("WARNING")?, LogLevel::Warning);
        assert_eq!(parse_log_level("warn")?, LogLevel::Warning);
        assert_eq!(parse_log_level(" trace ")?, LogLevel::Trace);
        assert!(parse_log_level("loud").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_symlink_handling() -> Result<()> {
        assert_eq!(parse_symlink_handling("follow")?, SymlinkHandling::Follow);
        assert_eq!(parse_symlink_handling("Placeholder")?, SymlinkHandling::Placeholder);
        assert!(parse_symlink_handling("maybe").is_err());
        Ok(())
    }

    #[test]
    fn test_parse_plugin_spec_with_parameters() -> Result<()> {
        let spec = parse_plugin_spec("./libstats.so:mode=fast,verbose, limit=3")?;
        assert_eq!(spec.path, PathBuf::from("./libstats.so"));
        assert_eq!(spec.parameters, vec!["mode=fast", "verbose", "limit=3"]);

        let bare = parse_plugin_spec("libplain.so")?;
        assert!(bare.parameters.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_plugin_spec_caps_parameters() -> Result<()> {
        let many: Vec<String> = (0..20).map(|i| format!("p{}", i)).collect();
        let spec = parse_plugin_spec(&format!("lib.so:{}", many.join(",")))?;
        assert_eq!(spec.parameters.len(), MAX_PLUGIN_PARAMS);
        assert_eq!(spec.parameters[15], "p15");
        Ok(())
    }

    #[test]
    fn test_parse_plugin_spec_requires_path() {
        assert!(parse_plugin_spec(":a=b").is_err());
    }

    #[test]
    fn test_normalize_patterns_trims_and_drops_empty() {
        let patterns = normalize_patterns(Some(vec![
            " *.o\t".to_string(),
            "  ".to_string(),
            ".git".to_string(),
        ]));
        assert_eq!(patterns, vec!["*.o", ".git"]);
        assert!(normalize_patterns(None).is_empty());
    }
}
