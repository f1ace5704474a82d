// src/context.rs

//! The per-run processing context.
//!
//! A [`ProcessingContext`] bundles the frozen configuration, the output sink,
//! the engines and the run statistics. The same value is what plugins see
//! through the [`FconcatHost`] table: the table's `host` field points back at
//! the context, so it is created inside an `Arc` and never moves.

use crate::cancellation::CancellationToken;
use crate::config::{Config, LogLevel};
use crate::core_types::ProcessingStats;
use crate::errors::{Error, Result};
use crate::filter::FilterEngine;
use crate::format::FormatEngine;
use crate::memory::{MemoryManager, StreamBuffer};
use crate::plugin::abi::FconcatHost;
use crate::plugin::{host, PluginManager};
use crate::sync::lock;
use crate::writer::SharedBuffer;
use log::{log, trace};
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_void, CString};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The engines a context runs with.
///
/// Created before the context so that plugins can be loaded and registered
/// while no context exists yet.
#[derive(Clone, Default)]
pub struct Engines {
    pub memory: Arc<MemoryManager>,
    pub filter: Arc<FilterEngine>,
    pub format: Arc<FormatEngine>,
    pub plugins: Arc<PluginManager>,
}

impl Engines {
    /// Fresh engines with the built-in filter rules and the requested format selected.
    pub fn for_config(config: &Config) -> Self {
        let engines = Self::default();
        engines.filter.configure(config);
        engines.format.configure(&config.output_format);
        engines
    }
}

/// The host table, shared with plugin code through a raw pointer.
struct HostTable(UnsafeCell<FconcatHost>);

// SAFETY: the table is written once during construction; afterwards only
// foreign code holds `*mut` views of it, and the host never mutates it.
unsafe impl Send for HostTable {}
unsafe impl Sync for HostTable {}

/// Everything a run needs, shared by the walks, the engines and plugins.
pub struct ProcessingContext {
    config: Config,
    output: Mutex<Box<dyn Write + Send>>,
    engines: Engines,
    stats: Mutex<ProcessingStats>,
    cancel: CancellationToken,
    current_level: AtomicUsize,
    streams: Mutex<HashMap<u64, StreamBuffer>>,
    next_stream: AtomicU64,
    config_strings: HashMap<&'static str, CString>,
    host: HostTable,
}

impl ProcessingContext {
    /// Builds a context writing to `output`.
    pub fn new(
        config: Config,
        output: Box<dyn Write + Send>,
        engines: Engines,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let config_strings = ["output_format", "input_directory", "output_file"]
            .into_iter()
            .filter_map(|key| {
                let value = config.get_string(key)?;
                CString::new(value.replace('\0', "")).ok().map(|c| (key, c))
            })
            .collect();

        Arc::new_cyclic(|weak| {
            let back_pointer = weak.as_ptr() as *const c_void;
            Self {
                config,
                output: Mutex::new(output),
                engines,
                stats: Mutex::new(ProcessingStats::default()),
                cancel,
                current_level: AtomicUsize::new(0),
                streams: Mutex::new(HashMap::new()),
                next_stream: AtomicU64::new(1),
                config_strings,
                host: HostTable(UnsafeCell::new(host::host_table(back_pointer))),
            }
        })
    }

    /// A context with freshly configured engines that discards its output.
    pub fn in_memory(config: Config) -> Arc<Self> {
        let engines = Engines::for_config(&config);
        Self::new(config, Box::new(io::sink()), engines, CancellationToken::new())
    }

    /// Like [`ProcessingContext::in_memory`], but the output is captured.
    pub fn with_buffer(config: Config) -> (Arc<Self>, SharedBuffer) {
        let buffer = SharedBuffer::new();
        let engines = Engines::for_config(&config);
        let ctx = Self::new(
            config,
            Box::new(buffer.clone()),
            engines,
            CancellationToken::new(),
        );
        (ctx, buffer)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn filter(&self) -> &FilterEngine {
        &self.engines.filter
    }

    pub fn format(&self) -> &FormatEngine {
        &self.engines.format
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.engines.plugins
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.engines.memory
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Appends bytes to the document.
    ///
    /// # Errors
    /// Returns [`Error::Output`] when the sink rejects the write.
    pub fn write_output(&self, data: &[u8]) -> Result<()> {
        lock(&self.output).write_all(data).map_err(Error::Output)
    }

    /// Flushes the output sink.
    pub fn flush_output(&self) -> Result<()> {
        lock(&self.output).flush().map_err(Error::Output)
    }

    /// Logs `message` at `level`, counting warnings and errors in the stats.
    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => self.update_stats(|s| s.errors += 1),
            LogLevel::Warning => self.update_stats(|s| s.warnings += 1),
            _ => {}
        }
        if self.is_log_enabled(level) {
            log!(level.to_level(), "{}", message);
        }
    }

    pub fn warning(&self, message: &str) {
        self.log(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    /// `true` if a message at `level` passes the configured threshold.
    pub fn is_log_enabled(&self, level: LogLevel) -> bool {
        level <= self.config.log_level
    }

    /// Snapshot of the statistics.
    pub fn stats(&self) -> ProcessingStats {
        *lock(&self.stats)
    }

    /// Mutates the statistics under their lock.
    pub fn update_stats(&self, f: impl FnOnce(&mut ProcessingStats)) {
        f(&mut lock(&self.stats));
    }

    /// Depth of the entry currently handed to a formatter.
    pub fn current_level(&self) -> usize {
        self.current_level.load(Ordering::Relaxed)
    }

    pub fn set_current_level(&self, level: usize) {
        self.current_level.store(level, Ordering::Relaxed);
    }

    /// Pointer handed to plugin callbacks.
    pub fn host_ptr(&self) -> *mut FconcatHost {
        self.host.0.get()
    }

    /// NUL-terminated string setting, valid as long as the context.
    pub(crate) fn config_c_string(&self, key: &str) -> Option<*const c_char> {
        self.config_strings.get(key).map(|c| c.as_ptr())
    }

    /// Creates a plugin stream buffer and returns its handle.
    pub(crate) fn create_stream(&self, initial_capacity: usize) -> Result<u64> {
        let buffer = self.memory().stream_buffer(initial_capacity)?;
        let id = self.next_stream.fetch_add(1, Ordering::Relaxed);
        lock(&self.streams).insert(id, buffer);
        trace!("Created stream buffer {}", id);
        Ok(id)
    }

    pub(crate) fn stream_write(&self, id: u64, data: &[u8]) -> Result<()> {
        let mut streams = lock(&self.streams);
        let stream = streams
            .get_mut(&id)
            .ok_or_else(|| Error::Config(format!("unknown stream buffer {}", id)))?;
        stream.write(data)
    }

    /// Moves a stream buffer's bytes to the output.
    pub(crate) fn stream_flush(&self, id: u64) -> Result<()> {
        let bytes = {
            let mut streams = lock(&self.streams);
            let stream = streams
                .get_mut(&id)
                .ok_or_else(|| Error::Config(format!("unknown stream buffer {}", id)))?;
            let mut bytes = Vec::with_capacity(stream.len());
            stream.flush_to(&mut bytes).map_err(Error::Output)?;
            bytes
        };
        self.write_output(&bytes)
    }

    pub(crate) fn stream_destroy(&self, id: u64) -> bool {
        lock(&self.streams).remove(&id).is_some()
    }
}

impl Drop for ProcessingContext {
    fn drop(&mut self) {
        if let Ok(output) = self.output.get_mut() {
            let _ = output.flush();
        }
    }
}
