// src/filter/path_rules.rs

//! Built-in path rules: output self-exclusion and user include/exclude patterns.

use super::{FilterRule, PatternList, RuleKind};
use crate::constants::priority;
use crate::core_types::basename;
use log::debug;
use std::path::{Path, PathBuf};

/// Keeps the output file out of its own snapshot.
///
/// Installed only when `output_file` resolves to a path inside
/// `input_directory`. The rule matches the output's absolute path, its path
/// relative to the input root and its basename.
pub fn output_exclusion_rule(input_directory: &Path, output_file: &Path) -> Option<FilterRule> {
    let input_root = input_directory.canonicalize().ok()?;
    let absolute = resolve_output(output_file)?;
    let relative = absolute.strip_prefix(&input_root).ok()?;

    let relative = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");
    let name = basename(&relative).to_string();
    debug!(
        "Output file {} is inside the input directory, excluding it as '{}'",
        absolute.display(),
        relative
    );

    Some(
        FilterRule::new("output-exclusion", RuleKind::Exclude, priority::OUTPUT_EXCLUSION)
            .with_path_matcher(move |path, _| {
                path == relative || basename(path) == name || input_root.join(path) == absolute
            }),
    )
}

/// Canonical path of the output file, also when it does not exist yet.
fn resolve_output(output_file: &Path) -> Option<PathBuf> {
    if let Ok(path) = output_file.canonicalize() {
        return Some(path);
    }
    let name = output_file.file_name()?;
    let parent = match output_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.canonicalize().ok()?,
        _ => std::env::current_dir().ok()?,
    };
    Some(parent.join(name))
}

/// Drops entries matching any `--exclude` pattern.
pub fn exclude_rule(patterns: &[String]) -> Option<FilterRule> {
    if patterns.is_empty() {
        return None;
    }
    let list = PatternList::new(patterns);
    Some(
        FilterRule::new("exclude-patterns", RuleKind::Exclude, priority::EXCLUDE)
            .with_path_matcher(move |path, info| list.matches(path, info.is_directory)),
    )
}

/// Requires files to match at least one `--include` pattern.
///
/// Directories always pass so that matching files deeper down stay reachable.
pub fn include_rule(patterns: &[String]) -> Option<FilterRule> {
    if patterns.is_empty() {
        return None;
    }
    let list = PatternList::new(patterns);
    Some(
        FilterRule::new("include-patterns", RuleKind::Include, priority::INCLUDE)
            .with_path_matcher(move |path, info| info.is_directory || list.matches(path, false)),
    )
}
