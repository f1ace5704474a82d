// src/filter/content_rules.rs

//! Built-in content rules: binary policy and symlink policy.

use super::{FilterRule, RuleKind};
use crate::config::{BinaryHandling, SymlinkHandling};
use crate::constants::{priority, BINARY_PLACEHOLDER, BINARY_SCAN_LIMIT, SYMLINK_UNREADABLE_PLACEHOLDER};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// `true` if the first [`BINARY_SCAN_LIMIT`] bytes of `sample` contain a NUL.
pub fn contains_nul(sample: &[u8]) -> bool {
    let end = sample.len().min(BINARY_SCAN_LIMIT);
    sample[..end].contains(&0)
}

/// Rule implementing the binary policy.
///
/// * `Skip`: an `Exclude` rule on content containing a NUL byte.
/// * `Placeholder`: a `Transform` replacing such content with
///   [`BINARY_PLACEHOLDER`].
/// * `Include`: no rule.
pub fn binary_rule(handling: BinaryHandling) -> Option<FilterRule> {
    match handling {
        BinaryHandling::Skip => Some(
            FilterRule::new("binary-skip", RuleKind::Exclude, priority::BINARY)
                .with_content_matcher(|_, sample| contains_nul(sample)),
        ),
        BinaryHandling::Placeholder => Some(
            FilterRule::new("binary-placeholder", RuleKind::Transform, priority::BINARY)
                .with_transform(|path, input| {
                    if contains_nul(input) {
                        debug!("Replacing binary content of '{}'", path);
                        Some(BINARY_PLACEHOLDER.as_bytes().to_vec())
                    } else {
                        None
                    }
                }),
        ),
        BinaryHandling::Include => None,
    }
}

/// Rule implementing the symlink policy.
///
/// * `Skip`: an `Exclude` rule on entries that are symlinks.
/// * `Placeholder`: a `Transform` that, for symlinks, emits
///   `// [Symbolic link to: <target>]`.
/// * `Follow` / `Include`: no rule; the traversal handles these.
pub fn symlink_rule(handling: SymlinkHandling, input_directory: &Path) -> Option<FilterRule> {
    match handling {
        SymlinkHandling::Skip => Some(
            FilterRule::new("symlink-skip", RuleKind::Exclude, priority::SYMLINK)
                .with_path_matcher(|_, info| info.is_symlink),
        ),
        SymlinkHandling::Placeholder => {
            let root: PathBuf = input_directory.to_path_buf();
            Some(
                FilterRule::new("symlink-placeholder", RuleKind::Transform, priority::SYMLINK)
                    .with_transform(move |path, _| symlink_placeholder(&root.join(path))),
            )
        }
        SymlinkHandling::Follow | SymlinkHandling::Include => None,
    }
}

fn symlink_placeholder(full_path: &Path) -> Option<Vec<u8>> {
    let metadata = fs::symlink_metadata(full_path).ok()?;
    if !metadata.file_type().is_symlink() {
        return None;
    }
    let text = match fs::read_link(full_path) {
        Ok(target) => format!("// [Symbolic link to: {}]\n", target.display()),
        Err(_) => SYMLINK_UNREADABLE_PLACEHOLDER.to_string(),
    };
    Some(text.into_bytes())
}
