// src/plugin/loaded.rs

//! Safe wrappers around the function tables of loaded plugins.

use super::abi::{
    filter_kind, CleanupFn, FconcatHost, InitFn, RawContentPlugin, RawFileInfo, RawFilterPlugin,
    RawFormatPlugin,
};
use crate::context::ProcessingContext;
use crate::core_types::FileInfo;
use crate::errors::{Error, Result};
use crate::filter::{FilterHook, RuleKind};
use crate::format::Formatter;
use crate::memory::TrackedPtr;
use libloading::Library;
use log::{debug, trace};
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Which entry point a plugin was found through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Format,
    Filter,
    Content,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PluginKind::Format => "format",
            PluginKind::Filter => "filter",
            PluginKind::Content => "content",
        })
    }
}

/// Copies a plugin-owned C string. Null yields `fallback`.
///
/// # Safety
/// `s` must be null or a valid NUL-terminated string.
pub(crate) unsafe fn owned_string(s: *const c_char, fallback: &str) -> String {
    if s.is_null() {
        fallback.to_string()
    } else {
        CStr::from_ptr(s).to_string_lossy().into_owned()
    }
}

fn c_string(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

/// A `FileInfo` converted for one foreign call.
struct ForeignFileInfo {
    _path: CString,
    raw: RawFileInfo,
}

impl ForeignFileInfo {
    fn new(info: &FileInfo) -> Self {
        let path = c_string(&info.path);
        let modified = info
            .modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);
        let raw = RawFileInfo {
            path: path.as_ptr(),
            size: info.size,
            modified,
            permissions: info.permissions,
            is_directory: info.is_directory,
            is_symlink: info.is_symlink,
            is_binary: info.is_binary,
        };
        Self { _path: path, raw }
    }
}

/// Takes ownership of a buffer a plugin returned through an out-parameter.
///
/// The buffer must come from the host allocator; anything else is refused
/// and left alone.
fn take_output(ctx: &ProcessingContext, plugin: &str, output: *mut c_char, size: usize) -> Option<Vec<u8>> {
    let block = TrackedPtr::from_raw(output as *mut u8)?;
    let tracked = ctx.memory().tracked();
    match tracked.copy_payload(block, size) {
        Some(bytes) => {
            tracked.free(block);
            Some(bytes)
        }
        None => {
            ctx.warning(&format!(
                "Plugin '{}' returned a buffer not allocated by the host, ignoring it",
                plugin
            ));
            None
        }
    }
}

/// State shared by every kind of plugin.
pub struct PluginCore {
    name: String,
    version: String,
    description: String,
    initialized: AtomicBool,
    _library: Option<Arc<Library>>,
}

impl PluginCore {
    pub(crate) fn new(name: String, version: String, description: String, library: Option<Arc<Library>>) -> Self {
        Self {
            name,
            version,
            description,
            initialized: AtomicBool::new(false),
            _library: library,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }
}

impl fmt::Debug for PluginCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCore")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

/// A loaded format plugin.
pub struct FormatPlugin {
    core: PluginCore,
    raw: RawFormatPlugin,
}

/// A loaded filter plugin.
pub struct FilterPlugin {
    core: PluginCore,
    raw: RawFilterPlugin,
}

/// A loaded content plugin.
pub struct ContentPlugin {
    core: PluginCore,
    raw: RawContentPlugin,
}

// SAFETY: the raw tables hold pointers into the plugin library's static data
// and code, which stay mapped while the `Library` in `core` is alive.
unsafe impl Send for FormatPlugin {}
unsafe impl Sync for FormatPlugin {}
unsafe impl Send for FilterPlugin {}
unsafe impl Sync for FilterPlugin {}
unsafe impl Send for ContentPlugin {}
unsafe impl Sync for ContentPlugin {}

impl FormatPlugin {
    pub(crate) fn new(core: PluginCore, raw: RawFormatPlugin) -> Self {
        Self { core, raw }
    }

    pub fn core(&self) -> &PluginCore {
        &self.core
    }

    fn call(&self, hook: &str, f: impl FnOnce() -> c_int) -> Result<()> {
        match f() {
            0 => Ok(()),
            code => Err(Error::Format(format!(
                "format plugin '{}' failed in {} ({})",
                self.core.name, hook, code
            ))),
        }
    }
}

impl FilterPlugin {
    pub(crate) fn new(core: PluginCore, raw: RawFilterPlugin) -> Self {
        Self { core, raw }
    }

    pub fn core(&self) -> &PluginCore {
        &self.core
    }

    /// Declared kind of the filter.
    pub fn kind(&self) -> RuleKind {
        match self.raw.kind {
            filter_kind::INCLUDE => RuleKind::Include,
            filter_kind::EXCLUDE => RuleKind::Exclude,
            _ => RuleKind::Transform,
        }
    }

    /// Declared priority. Informational.
    pub fn priority(&self) -> i32 {
        self.raw.priority
    }
}

impl ContentPlugin {
    pub(crate) fn new(core: PluginCore, raw: RawContentPlugin) -> Self {
        Self { core, raw }
    }

    pub fn core(&self) -> &PluginCore {
        &self.core
    }

    /// Capability bits declared by the plugin.
    pub fn capabilities(&self) -> u32 {
        self.raw.capabilities
    }

    /// Starts a file. The returned session must be passed to the other
    /// per-file calls and finished with [`ContentPlugin::finish_file`].
    pub fn start_file(&self, ctx: &ProcessingContext, path: &str, info: &FileInfo) -> FileSession {
        let state = match self.raw.file_start {
            Some(file_start) => {
                let path_c = c_string(path);
                let info = ForeignFileInfo::new(info);
                // SAFETY: arguments are valid for the duration of the call.
                unsafe { file_start(ctx.host_ptr(), path_c.as_ptr(), &info.raw) }
            }
            None => ptr::null_mut(),
        };
        FileSession { state }
    }

    /// Offers a chunk to the plugin. Returns replacement bytes, if any.
    pub fn process_chunk(&self, ctx: &ProcessingContext, session: &FileSession, data: &[u8]) -> Option<Vec<u8>> {
        let process_chunk = self.raw.process_chunk?;
        let mut output: *mut c_char = ptr::null_mut();
        let mut output_size = 0usize;
        // SAFETY: `data` outlives the call; the out-parameters are valid locals.
        let status = unsafe {
            process_chunk(
                ctx.host_ptr(),
                session.state,
                data.as_ptr() as *const c_char,
                data.len(),
                &mut output,
                &mut output_size,
            )
        };
        if status != 0 {
            trace!("Content plugin '{}' declined a chunk ({})", self.core.name, status);
            return None;
        }
        take_output(ctx, &self.core.name, output, output_size)
    }

    /// Ends a file: `file_end`, then `file_cleanup`.
    pub fn finish_file(&self, ctx: &ProcessingContext, session: FileSession) {
        if let Some(file_end) = self.raw.file_end {
            // SAFETY: the state pointer is the one `file_start` returned.
            let status = unsafe { file_end(ctx.host_ptr(), session.state) };
            if status != 0 {
                debug!("Content plugin '{}' file_end returned {}", self.core.name, status);
            }
        }
        if let Some(file_cleanup) = self.raw.file_cleanup {
            // SAFETY: as above; the state is not used afterwards.
            unsafe { file_cleanup(ctx.host_ptr(), session.state) };
        }
    }
}

/// Per-file state of a content plugin.
#[derive(Debug)]
pub struct FileSession {
    state: *mut c_void,
}

/// Formatter backed by a format plugin.
pub(crate) struct PluginFormatter(pub(crate) Arc<FormatPlugin>);

impl Formatter for PluginFormatter {
    fn name(&self) -> &str {
        &self.0.core.name
    }

    fn begin_document(&mut self, ctx: &ProcessingContext) -> Result<()> {
        document_hook(&self.0, ctx, "begin_document", self.0.raw.begin_document)
    }

    fn begin_structure(&mut self, ctx: &ProcessingContext) -> Result<()> {
        document_hook(&self.0, ctx, "begin_structure", self.0.raw.begin_structure)
    }

    fn write_directory(&mut self, ctx: &ProcessingContext, path: &str, level: usize) -> Result<()> {
        let Some(hook) = self.0.raw.write_directory else {
            return Ok(());
        };
        let path = c_string(path);
        let level = c_int::try_from(level).unwrap_or(c_int::MAX);
        // SAFETY: `path` outlives the call.
        self.0
            .call("write_directory", || unsafe { hook(ctx.host_ptr(), path.as_ptr(), level) })
    }

    fn write_file_entry(
        &mut self,
        ctx: &ProcessingContext,
        path: &str,
        info: &FileInfo,
        _level: usize,
    ) -> Result<()> {
        let Some(hook) = self.0.raw.write_file_entry else {
            return Ok(());
        };
        let path = c_string(path);
        let info = ForeignFileInfo::new(info);
        // SAFETY: `path` and `info` outlive the call.
        self.0.call("write_file_entry", || unsafe {
            hook(ctx.host_ptr(), path.as_ptr(), &info.raw)
        })
    }

    fn end_structure(&mut self, ctx: &ProcessingContext) -> Result<()> {
        document_hook(&self.0, ctx, "end_structure", self.0.raw.end_structure)
    }

    fn begin_content(&mut self, ctx: &ProcessingContext) -> Result<()> {
        document_hook(&self.0, ctx, "begin_content", self.0.raw.begin_content)
    }

    fn write_file_header(&mut self, ctx: &ProcessingContext, path: &str) -> Result<()> {
        let Some(hook) = self.0.raw.write_file_header else {
            return Ok(());
        };
        let path = c_string(path);
        // SAFETY: `path` outlives the call.
        self.0
            .call("write_file_header", || unsafe { hook(ctx.host_ptr(), path.as_ptr()) })
    }

    fn write_file_chunk(&mut self, ctx: &ProcessingContext, data: &[u8]) -> Result<()> {
        let Some(hook) = self.0.raw.write_file_chunk else {
            return Ok(());
        };
        // SAFETY: `data` outlives the call.
        self.0.call("write_file_chunk", || unsafe {
            hook(ctx.host_ptr(), data.as_ptr() as *const c_char, data.len())
        })
    }

    fn write_file_footer(&mut self, ctx: &ProcessingContext) -> Result<()> {
        document_hook(&self.0, ctx, "write_file_footer", self.0.raw.write_file_footer)
    }

    fn end_content(&mut self, ctx: &ProcessingContext) -> Result<()> {
        document_hook(&self.0, ctx, "end_content", self.0.raw.end_content)
    }

    fn end_document(&mut self, ctx: &ProcessingContext) -> Result<()> {
        document_hook(&self.0, ctx, "end_document", self.0.raw.end_document)
    }
}

fn document_hook(
    plugin: &FormatPlugin,
    ctx: &ProcessingContext,
    name: &str,
    hook: Option<super::abi::DocumentFn>,
) -> Result<()> {
    match hook {
        // SAFETY: the table pointer is valid for the lifetime of `ctx`.
        Some(hook) => plugin.call(name, || unsafe { hook(ctx.host_ptr()) }),
        None => Ok(()),
    }
}

impl FilterHook for FilterPlugin {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn should_include_path(&self, ctx: &ProcessingContext, path: &str, info: &FileInfo) -> Option<bool> {
        let hook = self.raw.should_include_path?;
        let path = c_string(path);
        let info = ForeignFileInfo::new(info);
        // SAFETY: `path` and `info` outlive the call.
        verdict(unsafe { hook(ctx.host_ptr(), path.as_ptr(), &info.raw) })
    }

    fn should_include_content(&self, ctx: &ProcessingContext, path: &str, sample: &[u8]) -> Option<bool> {
        let hook = self.raw.should_include_content?;
        let path = c_string(path);
        // SAFETY: `path` and `sample` outlive the call.
        verdict(unsafe {
            hook(
                ctx.host_ptr(),
                path.as_ptr(),
                sample.as_ptr() as *const c_char,
                sample.len(),
            )
        })
    }

    fn transform_content(&self, ctx: &ProcessingContext, path: &str, input: &[u8]) -> Option<Vec<u8>> {
        let hook = self.raw.transform_content?;
        let path_c = c_string(path);
        let mut output: *mut c_char = ptr::null_mut();
        let mut output_size = 0usize;
        // SAFETY: inputs outlive the call; the out-parameters are valid locals.
        let status = unsafe {
            hook(
                ctx.host_ptr(),
                path_c.as_ptr(),
                input.as_ptr() as *const c_char,
                input.len(),
                &mut output,
                &mut output_size,
            )
        };
        if status != 0 {
            return None;
        }
        take_output(ctx, &self.core.name, output, output_size)
    }
}

fn verdict(code: c_int) -> Option<bool> {
    match code {
        c if c > 0 => Some(true),
        0 => Some(false),
        _ => None,
    }
}

/// A loaded plugin of any kind.
#[derive(Clone)]
pub enum LoadedPlugin {
    Format(Arc<FormatPlugin>),
    Filter(Arc<FilterPlugin>),
    Content(Arc<ContentPlugin>),
}

impl LoadedPlugin {
    pub fn kind(&self) -> PluginKind {
        match self {
            LoadedPlugin::Format(_) => PluginKind::Format,
            LoadedPlugin::Filter(_) => PluginKind::Filter,
            LoadedPlugin::Content(_) => PluginKind::Content,
        }
    }

    pub fn core(&self) -> &PluginCore {
        match self {
            LoadedPlugin::Format(p) => &p.core,
            LoadedPlugin::Filter(p) => &p.core,
            LoadedPlugin::Content(p) => &p.core,
        }
    }

    fn lifecycle(&self) -> (Option<InitFn>, Option<CleanupFn>) {
        match self {
            LoadedPlugin::Format(p) => (p.raw.init, p.raw.cleanup),
            LoadedPlugin::Filter(p) => (p.raw.init, p.raw.cleanup),
            LoadedPlugin::Content(p) => (p.raw.init, p.raw.cleanup),
        }
    }

    /// Calls `init`. A plugin without `init` counts as initialized.
    pub(crate) fn initialize(&self, host: *mut FconcatHost) -> c_int {
        let status = match self.lifecycle().0 {
            // SAFETY: `host` is the live table of the current context.
            Some(init) => unsafe { init(host) },
            None => 0,
        };
        self.core().set_initialized(status == 0);
        status
    }

    /// Calls `cleanup` with `host`, which may be null.
    pub(crate) fn cleanup(&self, host: *mut FconcatHost) {
        if let Some(cleanup) = self.lifecycle().1 {
            // SAFETY: plugins must accept a null table in cleanup.
            unsafe { cleanup(host) };
        }
        self.core().set_initialized(false);
    }
}

impl fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoadedPlugin")
            .field(&self.kind())
            .field(self.core())
            .finish()
    }
}
