// src/filter/patterns.rs

//! Case-insensitive glob matching for `--include` / `--exclude`.

use crate::core_types::basename;
use glob::{MatchOptions, Pattern};
use log::{debug, warn};

/// `*` may cross `/`, leading dots need no literal match, case is ignored.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug)]
struct CompiledPattern {
    raw: String,
    pattern: Pattern,
    /// `pattern/*`, probed for directories so a pattern can name a subtree.
    subtree: Pattern,
}

/// An ordered list of compiled glob patterns.
///
/// A pattern matches an entry when it matches the full relative path or the
/// basename; for directories `pattern/*` is also tried against the path.
///
/// # Examples
///
/// ```
/// use fconcat::filter::PatternList;
///
/// let list = PatternList::new(&["*.C".to_string(), "build".to_string()]);
/// assert!(list.matches("src/main.c", false));
/// assert!(list.matches("build", true));
/// assert!(!list.matches("README.md", false));
/// ```
#[derive(Debug, Default)]
pub struct PatternList {
    patterns: Vec<CompiledPattern>,
}

impl PatternList {
    /// Compiles `patterns`. Patterns that are not valid globs are matched literally.
    pub fn new(patterns: &[String]) -> Self {
        let patterns = patterns
            .iter()
            .map(|raw| CompiledPattern {
                raw: raw.clone(),
                pattern: compile(raw),
                subtree: compile(&format!("{}/*", raw.trim_end_matches('/'))),
            })
            .collect();
        Self { patterns }
    }

    /// Number of patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// `true` when the list holds no pattern.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns the first pattern matching `path`, if any.
    pub fn find_match(&self, path: &str, is_directory: bool) -> Option<&str> {
        let name = basename(path);
        self.patterns
            .iter()
            .find(|p| {
                p.pattern.matches_with(path, MATCH_OPTIONS)
                    || p.pattern.matches_with(name, MATCH_OPTIONS)
                    || (is_directory && p.subtree.matches_with(path, MATCH_OPTIONS))
            })
            .map(|p| p.raw.as_str())
    }

    /// `true` if any pattern matches `path`.
    pub fn matches(&self, path: &str, is_directory: bool) -> bool {
        match self.find_match(path, is_directory) {
            Some(pattern) => {
                debug!("'{}' matched pattern '{}'", path, pattern);
                true
            }
            None => false,
        }
    }
}

fn compile(raw: &str) -> Pattern {
    Pattern::new(raw).unwrap_or_else(|e| {
        warn!("Invalid glob pattern '{}' ({}), matching it literally", raw, e);
        Pattern::new(&Pattern::escape(raw)).unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(patterns: &[&str]) -> PatternList {
        PatternList::new(&patterns.iter().map(|s| s.to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn test_basename_and_full_path_matching() {
        let patterns = list(&["*.log", "docs/*.md"]);
        assert!(patterns.matches("server.log", false));
        assert!(patterns.matches("var/run/server.log", false));
        assert!(patterns.matches("docs/intro.md", false));
        assert!(!patterns.matches("intro.md", false));
    }

    #[test]
    fn test_matching_ignores_case() {
        let patterns = list(&["readme*"]);
        assert!(patterns.matches("README.md", false));
        assert!(patterns.matches("sub/ReadMe.txt", false));
    }

    #[test]
    fn test_star_crosses_separators() {
        let patterns = list(&["src*.rs"]);
        assert!(patterns.matches("src/deep/lib.rs", false));
    }

    #[test]
    fn test_directory_subtree_probe() {
        let patterns = list(&["vendor"]);
        assert!(patterns.matches("vendor", true));
        assert!(patterns.matches("third/vendor", true));
        let nested = list(&["third"]);
        assert!(nested.matches("third/vendor", true));
        assert!(!nested.matches("third/vendor", false));
    }

    #[test]
    fn test_hidden_entries_match_wildcards() {
        let patterns = list(&["*git"]);
        assert!(patterns.matches(".git", true));
    }

    #[test]
    fn test_invalid_pattern_is_literal() {
        let patterns = list(&["[oops"]);
        assert!(patterns.matches("[oops", false));
        assert!(!patterns.matches("o", false));
    }
}
