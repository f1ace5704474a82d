//! Output formats.
//!
//! A [`Formatter`] receives the document protocol:
//!
//! ```text
//! begin_document
//!   begin_structure  (write_directory | write_file_entry)*  end_structure
//!   begin_content    (write_file_header write_file_chunk* write_file_footer)*  end_content
//! end_document
//! ```
//!
//! The [`FormatEngine`] owns the registered formatters (built-in `text` and
//! `json` plus format plugins) and forwards every call to the active one.
//! The registry lock is released before the formatter runs, so a format
//! plugin may query the engine from inside a hook.

mod json;
mod text;

pub use json::{escape_json, JsonFormatter};
pub use text::TextFormatter;

use crate::context::ProcessingContext;
use crate::core_types::FileInfo;
use crate::errors::{Error, Result};
use crate::sync::{lock, try_lock};
use log::{debug, warn};
use std::sync::{Arc, Mutex};

/// Name of the format used when the requested one is unknown.
pub const DEFAULT_FORMAT: &str = "text";

/// A document writer. Every hook defaults to writing nothing.
pub trait Formatter: Send {
    /// Name selected with `--format`.
    fn name(&self) -> &str;

    fn begin_document(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn begin_structure(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    /// A directory of the listing, `level` levels below the root.
    fn write_directory(&mut self, _ctx: &ProcessingContext, _path: &str, _level: usize) -> Result<()> {
        Ok(())
    }

    /// A file of the listing, `level` levels below the root.
    fn write_file_entry(
        &mut self,
        _ctx: &ProcessingContext,
        _path: &str,
        _info: &FileInfo,
        _level: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn end_structure(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn begin_content(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    /// Opens the content section of one file.
    fn write_file_header(&mut self, _ctx: &ProcessingContext, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Content bytes of the file opened by the last header.
    fn write_file_chunk(&mut self, _ctx: &ProcessingContext, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn write_file_footer(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn end_content(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }

    fn end_document(&mut self, _ctx: &ProcessingContext) -> Result<()> {
        Ok(())
    }
}

/// A registered formatter. The name is cached so lookups never touch the
/// formatter itself.
struct Registered {
    name: String,
    formatter: Arc<Mutex<Box<dyn Formatter>>>,
}

impl Registered {
    fn new(formatter: Box<dyn Formatter>) -> Self {
        Self {
            name: formatter.name().to_string(),
            formatter: Arc::new(Mutex::new(formatter)),
        }
    }
}

struct FormatState {
    formatters: Vec<Registered>,
    requested: String,
    active: usize,
}

/// Registry of formatters plus the active selection.
pub struct FormatEngine {
    state: Mutex<FormatState>,
}

impl Default for FormatEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatEngine {
    /// Creates an engine with the built-in formatters, `text` active.
    pub fn new() -> Self {
        let formatters = vec![
            Registered::new(Box::new(TextFormatter::new())),
            Registered::new(Box::new(JsonFormatter::new())),
        ];
        Self {
            state: Mutex::new(FormatState {
                formatters,
                requested: DEFAULT_FORMAT.to_string(),
                active: 0,
            }),
        }
    }

    /// Selects the formatter called `name`.
    ///
    /// An unknown name falls back to `text` with a warning. The request is
    /// remembered: a format plugin registered later under that name becomes
    /// active.
    pub fn configure(&self, name: &str) {
        let mut state = lock(&self.state);
        state.requested = name.to_string();
        match position(&state.formatters, name) {
            Some(index) => state.active = index,
            None => {
                warn!("Unknown output format '{}', using '{}'", name, DEFAULT_FORMAT);
                state.active = position(&state.formatters, DEFAULT_FORMAT).unwrap_or(0);
            }
        }
        debug!("Output format: {}", state.formatters[state.active].name);
    }

    /// Adds a formatter, activating it if its name is the requested one.
    pub fn register(&self, formatter: Box<dyn Formatter>) {
        let formatter = Registered::new(formatter);
        let mut state = lock(&self.state);
        debug!("Registering formatter '{}'", formatter.name);
        let activate = formatter.name == state.requested;
        state.formatters.push(formatter);
        if activate {
            state.active = state.formatters.len() - 1;
            debug!("Formatter '{}' is now active", state.requested);
        }
    }

    /// Name of the active formatter.
    pub fn active_name(&self) -> String {
        let state = lock(&self.state);
        state.formatters[state.active].name.clone()
    }

    /// Names of all registered formatters.
    pub fn names(&self) -> Vec<String> {
        lock(&self.state)
            .formatters
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    /// Runs `f` on the active formatter without holding the registry lock.
    ///
    /// A hook that re-enters the document protocol of its own formatter gets
    /// an error instead of a deadlock.
    fn with_active(&self, f: impl FnOnce(&mut dyn Formatter) -> Result<()>) -> Result<()> {
        let (name, formatter) = {
            let state = lock(&self.state);
            let active = &state.formatters[state.active];
            (active.name.clone(), active.formatter.clone())
        };
        let Some(mut guard) = try_lock(&formatter) else {
            return Err(Error::Format(format!("formatter '{}' re-entered while busy", name)));
        };
        f(&mut **guard)
    }

    pub fn begin_document(&self, ctx: &ProcessingContext) -> Result<()> {
        self.with_active(|f| f.begin_document(ctx))
    }

    pub fn begin_structure(&self, ctx: &ProcessingContext) -> Result<()> {
        self.with_active(|f| f.begin_structure(ctx))
    }

    pub fn write_directory(&self, ctx: &ProcessingContext, path: &str, level: usize) -> Result<()> {
        self.with_active(|f| f.write_directory(ctx, path, level))
    }

    pub fn write_file_entry(
        &self,
        ctx: &ProcessingContext,
        path: &str,
        info: &FileInfo,
        level: usize,
    ) -> Result<()> {
        self.with_active(|f| f.write_file_entry(ctx, path, info, level))
    }

    pub fn end_structure(&self, ctx: &ProcessingContext) -> Result<()> {
        self.with_active(|f| f.end_structure(ctx))
    }

    pub fn begin_content(&self, ctx: &ProcessingContext) -> Result<()> {
        self.with_active(|f| f.begin_content(ctx))
    }

    pub fn write_file_header(&self, ctx: &ProcessingContext, path: &str) -> Result<()> {
        self.with_active(|f| f.write_file_header(ctx, path))
    }

    pub fn write_file_chunk(&self, ctx: &ProcessingContext, data: &[u8]) -> Result<()> {
        self.with_active(|f| f.write_file_chunk(ctx, data))
    }

    pub fn write_file_footer(&self, ctx: &ProcessingContext) -> Result<()> {
        self.with_active(|f| f.write_file_footer(ctx))
    }

    pub fn end_content(&self, ctx: &ProcessingContext) -> Result<()> {
        self.with_active(|f| f.end_content(ctx))
    }

    pub fn end_document(&self, ctx: &ProcessingContext) -> Result<()> {
        self.with_active(|f| f.end_document(ctx))
    }
}

fn position(formatters: &[Registered], name: &str) -> Option<usize> {
    formatters.iter().position(|f| f.name == name)
}
