//! The filter engine: path inclusion, content inclusion and content transformation.
//!
//! The engine holds an ordered list of [`FilterRule`]s plus the filter hooks of
//! loaded plugins. Three decision points are exposed:
//!
//! * [`FilterEngine::should_include_path`]: any matching `Exclude` rule vetoes,
//!   and when `Include` rules exist at least one of them must match.
//! * [`FilterEngine::should_include_content`]: the same aggregation over
//!   content matchers, consulted per chunk for files only.
//! * [`FilterEngine::transform_content`]: every `Transform` rule, then every
//!   plugin hook, chained; a stage that declines leaves the bytes unchanged.
//!
//! Rules carry a priority, but evaluation follows registration order; the
//! priority is informational only.

mod content_rules;
mod path_rules;
mod patterns;

pub use content_rules::{binary_rule, contains_nul, symlink_rule};
pub use path_rules::{exclude_rule, include_rule, output_exclusion_rule};
pub use patterns::PatternList;

use crate::config::Config;
use crate::context::ProcessingContext;
use crate::core_types::FileInfo;
use crate::sync::lock;
use log::{debug, trace};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};

/// What a rule does when its matcher fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    /// Entries must match (directories are included by default).
    Include,
    /// Matching entries are dropped.
    Exclude,
    /// Content is rewritten; match results are ignored.
    Transform,
}

/// Decides on a relative path and its metadata.
pub type PathMatcher = Box<dyn Fn(&str, &FileInfo) -> bool + Send + Sync>;
/// Decides on a path and a sample of its content.
pub type ContentMatcher = Box<dyn Fn(&str, &[u8]) -> bool + Send + Sync>;
/// Rewrites a chunk; `None` declines and keeps the input.
pub type ContentTransform = Box<dyn Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// A single filter rule.
///
/// Rule-specific state (pattern lists, the input root) is captured by the
/// matcher closures and released when the rule is dropped.
pub struct FilterRule {
    name: String,
    kind: RuleKind,
    priority: i32,
    path_matcher: Option<PathMatcher>,
    content_matcher: Option<ContentMatcher>,
    transform: Option<ContentTransform>,
}

impl FilterRule {
    /// Creates a rule with no matchers.
    pub fn new(name: impl Into<String>, kind: RuleKind, priority: i32) -> Self {
        Self {
            name: name.into(),
            kind,
            priority,
            path_matcher: None,
            content_matcher: None,
            transform: None,
        }
    }

    /// Attaches a path matcher.
    pub fn with_path_matcher(
        mut self,
        matcher: impl Fn(&str, &FileInfo) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.path_matcher = Some(Box::new(matcher));
        self
    }

    /// Attaches a content matcher.
    pub fn with_content_matcher(
        mut self,
        matcher: impl Fn(&str, &[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.content_matcher = Some(Box::new(matcher));
        self
    }

    /// Attaches a content transform.
    pub fn with_transform(
        mut self,
        transform: impl Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    /// Rule name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rule kind.
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Stored priority. Not used for ordering.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Applies the path matcher, if any.
    pub fn match_path(&self, path: &str, info: &FileInfo) -> Option<bool> {
        self.path_matcher.as_ref().map(|m| m(path, info))
    }

    /// Applies the content matcher, if any.
    pub fn match_content(&self, path: &str, sample: &[u8]) -> Option<bool> {
        self.content_matcher.as_ref().map(|m| m(path, sample))
    }

    /// Applies the transform, if any.
    pub fn apply_transform(&self, path: &str, input: &[u8]) -> Option<Vec<u8>> {
        self.transform.as_ref().and_then(|t| t(path, input))
    }
}

impl fmt::Debug for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRule")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("path_matcher", &self.path_matcher.is_some())
            .field("content_matcher", &self.content_matcher.is_some())
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Filter hooks contributed by a loaded plugin.
///
/// Every method returns `None` when the plugin does not implement the hook or
/// the call failed; the engine treats that as "no opinion".
pub trait FilterHook: Send + Sync {
    /// Plugin name.
    fn name(&self) -> &str;
    /// `Some(false)` vetoes the entry.
    fn should_include_path(&self, ctx: &ProcessingContext, path: &str, info: &FileInfo)
        -> Option<bool>;
    /// `Some(false)` vetoes the content.
    fn should_include_content(&self, ctx: &ProcessingContext, path: &str, sample: &[u8])
        -> Option<bool>;
    /// Replacement bytes, or `None` to keep the input.
    fn transform_content(&self, ctx: &ProcessingContext, path: &str, input: &[u8])
        -> Option<Vec<u8>>;
}

impl fmt::Debug for dyn FilterHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterHook").field(&self.name()).finish()
    }
}

/// Ordered rules plus plugin hooks.
///
/// The lists are only mutated while the run is being configured. Evaluation
/// snapshots them and releases the lock before calling into matchers, so a
/// plugin hook may safely call back into the engine.
#[derive(Default)]
pub struct FilterEngine {
    rules: Mutex<Vec<Arc<FilterRule>>>,
    plugins: Mutex<Vec<Arc<dyn FilterHook>>>,
}

impl FilterEngine {
    /// Creates an engine with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the built-in rules for `config`:
    /// output self-exclusion, exclude patterns, include patterns, binary
    /// policy and symlink policy, in that order.
    pub fn configure(&self, config: &Config) {
        let rules = [
            output_exclusion_rule(&config.input_directory, &config.output_file),
            exclude_rule(&config.exclude_patterns),
            include_rule(&config.include_patterns),
            binary_rule(config.binary_handling),
            symlink_rule(config.symlink_handling, &config.input_directory),
        ];
        for rule in rules.into_iter().flatten() {
            self.add_rule(rule);
        }
        debug!("Filter engine configured with {} rules", self.rule_count());
    }

    /// Appends a rule.
    pub fn add_rule(&self, rule: FilterRule) {
        debug!(
            "Adding filter rule '{}' ({:?}, priority {})",
            rule.name, rule.kind, rule.priority
        );
        lock(&self.rules).push(Arc::new(rule));
    }

    /// Appends a plugin's hooks.
    pub fn register_plugin(&self, hook: Arc<dyn FilterHook>) {
        debug!("Registering filter plugin '{}'", hook.name());
        lock(&self.plugins).push(hook);
    }

    /// Number of installed rules.
    pub fn rule_count(&self) -> usize {
        lock(&self.rules).len()
    }

    /// Number of registered plugin hooks.
    pub fn plugin_count(&self) -> usize {
        lock(&self.plugins).len()
    }

    /// Names of the installed rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<String> {
        lock(&self.rules).iter().map(|r| r.name.clone()).collect()
    }

    fn snapshot(&self) -> (Vec<Arc<FilterRule>>, Vec<Arc<dyn FilterHook>>) {
        (lock(&self.rules).clone(), lock(&self.plugins).clone())
    }

    /// Decides whether an entry takes part in the walk at all.
    pub fn should_include_path(&self, ctx: &ProcessingContext, path: &str, info: &FileInfo) -> bool {
        let (rules, plugins) = self.snapshot();
        let verdicts = rules
            .iter()
            .filter(|rule| rule.kind != RuleKind::Transform)
            .filter_map(|rule| rule.match_path(path, info).map(|m| (rule.as_ref(), m)));
        if !aggregate(path, verdicts) {
            return false;
        }

        for plugin in &plugins {
            if plugin.should_include_path(ctx, path, info) == Some(false) {
                trace!("'{}' excluded by plugin '{}'", path, plugin.name());
                return false;
            }
        }
        true
    }

    /// Decides whether a chunk of a file's content may be written.
    pub fn should_include_content(&self, ctx: &ProcessingContext, path: &str, sample: &[u8]) -> bool {
        let (rules, plugins) = self.snapshot();
        let verdicts = rules
            .iter()
            .filter(|rule| rule.kind != RuleKind::Transform)
            .filter_map(|rule| rule.match_content(path, sample).map(|m| (rule.as_ref(), m)));
        if !aggregate(path, verdicts) {
            return false;
        }

        for plugin in &plugins {
            if plugin.should_include_content(ctx, path, sample) == Some(false) {
                trace!("Content of '{}' excluded by plugin '{}'", path, plugin.name());
                return false;
            }
        }
        true
    }

    /// Runs `input` through every transform rule and plugin hook.
    pub fn transform_content<'a>(
        &self,
        ctx: &ProcessingContext,
        path: &str,
        input: &'a [u8],
    ) -> Cow<'a, [u8]> {
        let (rules, plugins) = self.snapshot();
        let mut current = Cow::Borrowed(input);

        for rule in rules.iter().filter(|r| r.kind == RuleKind::Transform) {
            if let Some(output) = rule.apply_transform(path, &current) {
                trace!("Rule '{}' transformed content of '{}'", rule.name, path);
                current = Cow::Owned(output);
            }
        }
        for plugin in &plugins {
            if let Some(output) = plugin.transform_content(ctx, path, &current) {
                trace!("Plugin '{}' transformed content of '{}'", plugin.name(), path);
                current = Cow::Owned(output);
            }
        }
        current
    }
}

/// Folds `(rule, matched)` pairs: an Exclude match vetoes, and when any
/// Include verdict exists one of them must be a match.
fn aggregate<'r>(path: &str, verdicts: impl Iterator<Item = (&'r FilterRule, bool)>) -> bool {
    let mut saw_include = false;
    let mut include_matched = false;
    for (rule, matched) in verdicts {
        match rule.kind {
            RuleKind::Exclude if matched => {
                debug!("Excluding '{}' (rule '{}')", path, rule.name);
                return false;
            }
            RuleKind::Include => {
                saw_include = true;
                include_matched |= matched;
            }
            _ => {}
        }
    }
    if saw_include && !include_matched {
        debug!("Excluding '{}' (no include rule matched)", path);
        return false;
    }
    true
}
