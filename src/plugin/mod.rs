//! Dynamic plugins.
//!
//! Plugins are shared libraries exporting one of the entry points described
//! in [`abi`]. The [`PluginManager`] loads and validates them, registers
//! their hooks with the format and filter engines, runs their lifecycle and
//! serves the parameter and data services of the host table.

pub mod abi;
pub(crate) mod host;
mod loaded;

pub use loaded::{ContentPlugin, FileSession, FilterPlugin, FormatPlugin, LoadedPlugin, PluginCore, PluginKind};

use abi::{RawContentPlugin, RawFilterPlugin, RawFormatPlugin, CONTENT_ENTRY, FILTER_ENTRY, FORMAT_ENTRY};
use loaded::{owned_string, PluginFormatter};

use crate::config::PluginSpec;
use crate::constants::{MAX_PLUGINS, MAX_PLUGIN_PARAMS, PLUGIN_DATA_SIZE};
use crate::context::ProcessingContext;
use crate::errors::{Error, Result};
use crate::filter::FilterEngine;
use crate::format::FormatEngine;
use crate::sync::lock;
use libloading::Library;
use log::{debug, error, info, warn};
use std::ffi::{c_char, c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex};

/// One raw plugin parameter.
#[derive(Debug)]
struct Parameter {
    /// `key` of `key=value`; `None` for a bare token.
    key: Option<String>,
    raw: CString,
    /// The value part, or the whole token.
    value: CString,
}

impl Parameter {
    fn parse(raw: &str) -> Self {
        let clean = raw.replace('\0', "");
        let (key, value) = match clean.split_once('=') {
            Some((key, value)) => (Some(key.to_string()), value.to_string()),
            None => (None, clean.clone()),
        };
        Self {
            key,
            raw: CString::new(clean).unwrap_or_default(),
            value: CString::new(value).unwrap_or_default(),
        }
    }

    fn matches(&self, key: &str) -> bool {
        match &self.key {
            Some(k) => k == key,
            None => self.value.to_bytes() == key.as_bytes(),
        }
    }
}

/// A registered plugin.
#[derive(Debug)]
pub struct PluginMetadata {
    path: PathBuf,
    plugin: LoadedPlugin,
    parameters: Vec<Parameter>,
    data: Mutex<PluginData>,
}

#[derive(Debug)]
struct PluginData {
    slot: Box<[u8]>,
    len: usize,
}

impl PluginMetadata {
    pub fn name(&self) -> &str {
        self.plugin.core().name()
    }

    pub fn version(&self) -> &str {
        self.plugin.core().version()
    }

    pub fn description(&self) -> &str {
        self.plugin.core().description()
    }

    pub fn kind(&self) -> PluginKind {
        self.plugin.kind()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn plugin(&self) -> &LoadedPlugin {
        &self.plugin
    }

    pub fn is_initialized(&self) -> bool {
        self.plugin.core().is_initialized()
    }

    /// Raw parameters in command-line order.
    pub fn parameters(&self) -> Vec<String> {
        self.parameters
            .iter()
            .map(|p| p.raw.to_string_lossy().into_owned())
            .collect()
    }

    /// Value of `key=value`, or the token itself if a bare token equals `key`.
    pub fn parameter(&self, key: &str) -> Option<String> {
        self.find_parameter(key)
            .map(|p| p.value.to_string_lossy().into_owned())
    }

    fn find_parameter(&self, key: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.matches(key))
    }
}

/// A validated plugin table, before it is wrapped.
pub(crate) enum Probe {
    Format(RawFormatPlugin),
    Filter(RawFilterPlugin),
    Content(RawContentPlugin),
}

impl Probe {
    fn rejection(&self) -> Option<String> {
        match self {
            Probe::Format(raw) => raw.header.rejection(),
            Probe::Filter(raw) => raw.header.rejection(),
            Probe::Content(raw) => raw.header.rejection(),
        }
    }
}

/// Signature shared by every plugin entry point.
pub(crate) type EntryPoint = unsafe extern "C" fn() -> *const c_void;

/// Symbol lookup used while probing a library.
pub(crate) trait EntryPoints {
    fn entry_point(&self, symbol: &[u8]) -> Option<EntryPoint>;
}

impl EntryPoints for Library {
    fn entry_point(&self, symbol: &[u8]) -> Option<EntryPoint> {
        // SAFETY: every entry point of the ABI takes no arguments and
        // returns a table pointer.
        unsafe { self.get::<EntryPoint>(symbol) }.ok().map(|entry| *entry)
    }
}

/// Looks up the entry points in probe order and copies the returned table.
///
/// # Safety
/// Calls foreign code in `library`.
unsafe fn probe_library(library: &impl EntryPoints) -> std::result::Result<Probe, String> {
    if let Some(entry) = library.entry_point(FORMAT_ENTRY) {
        return copy_table(entry).map(Probe::Format);
    }
    if let Some(entry) = library.entry_point(FILTER_ENTRY) {
        return copy_table(entry).map(Probe::Filter);
    }
    if let Some(entry) = library.entry_point(CONTENT_ENTRY) {
        return copy_table(entry).map(Probe::Content);
    }
    Err("no get_format_plugin, get_filter_plugin or get_plugin entry point".to_string())
}

/// # Safety
/// `entry` must return null or a pointer to a live `T`.
unsafe fn copy_table<T: Copy>(entry: EntryPoint) -> std::result::Result<T, String> {
    (entry() as *const T).as_ref().copied().ok_or_else(null_table)
}

fn null_table() -> String {
    "entry point returned a null plugin table".to_string()
}

/// Registry of loaded plugins.
#[derive(Debug, Default)]
pub struct PluginManager {
    registry: Mutex<Vec<Arc<PluginMetadata>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every plugin in `specs`. Failures are logged and skipped.
    /// Returns the number of plugins loaded.
    pub fn load_all(&self, specs: &[PluginSpec], filter: &FilterEngine, format: &FormatEngine) -> usize {
        specs
            .iter()
            .filter(|spec| match self.load(spec, filter, format) {
                Ok(_) => true,
                Err(e) => {
                    error!("{}", e);
                    false
                }
            })
            .count()
    }

    /// Opens `spec.path`, validates the plugin and registers it.
    ///
    /// # Errors
    /// Returns [`Error::Plugin`] if the library cannot be opened, exports no
    /// known entry point, carries a foreign ABI header, or the registry is full.
    pub fn load(&self, spec: &PluginSpec, filter: &FilterEngine, format: &FormatEngine) -> Result<Arc<PluginMetadata>> {
        let fail = |reason: String| Error::Plugin {
            path: spec.path.display().to_string(),
            reason,
        };
        self.ensure_capacity().map_err(fail)?;

        debug!("Loading plugin {}", spec.path.display());
        // SAFETY: loading a library runs its initializers; plugins are trusted
        // code named explicitly on the command line.
        let library = unsafe { Library::new(&spec.path) }.map_err(|e| fail(e.to_string()))?;
        // SAFETY: the entry point is called as declared by the ABI.
        let probe = unsafe { probe_library(&library) }.map_err(|reason| {
            warn!("Rejecting {}: {}", spec.path.display(), reason);
            fail(reason)
        })?;
        self.adopt(&spec.path, Some(Arc::new(library)), probe, &spec.parameters, filter, format)
    }

    fn ensure_capacity(&self) -> std::result::Result<(), String> {
        if lock(&self.registry).len() >= MAX_PLUGINS {
            Err(format!("plugin limit of {} reached", MAX_PLUGINS))
        } else {
            Ok(())
        }
    }

    /// Registers a probed table. `library` keeps the code mapped while any
    /// wrapper of the plugin is alive.
    pub(crate) fn adopt(
        &self,
        path: &Path,
        library: Option<Arc<Library>>,
        probe: Probe,
        parameters: &[String],
        filter: &FilterEngine,
        format: &FormatEngine,
    ) -> Result<Arc<PluginMetadata>> {
        let fail = |reason: String| Error::Plugin {
            path: path.display().to_string(),
            reason,
        };
        if let Some(reason) = probe.rejection() {
            return Err(fail(reason));
        }
        self.ensure_capacity().map_err(fail)?;

        let core = |name, version, description| {
            // SAFETY: the strings live in the plugin's static data.
            unsafe {
                PluginCore::new(
                    owned_string(name, "unnamed"),
                    owned_string(version, "0.0.0"),
                    owned_string(description, ""),
                    library.clone(),
                )
            }
        };
        let plugin = match probe {
            Probe::Format(raw) => {
                let plugin = Arc::new(FormatPlugin::new(core(raw.name, raw.version, raw.description), raw));
                format.register(Box::new(PluginFormatter(plugin.clone())));
                LoadedPlugin::Format(plugin)
            }
            Probe::Filter(raw) => {
                let plugin = Arc::new(FilterPlugin::new(core(raw.name, raw.version, raw.description), raw));
                filter.register_plugin(plugin.clone());
                LoadedPlugin::Filter(plugin)
            }
            Probe::Content(raw) => LoadedPlugin::Content(Arc::new(ContentPlugin::new(
                core(raw.name, raw.version, raw.description),
                raw,
            ))),
        };

        if parameters.len() > MAX_PLUGIN_PARAMS {
            warn!(
                "Plugin '{}' was given {} parameters, keeping the first {}",
                plugin.core().name(),
                parameters.len(),
                MAX_PLUGIN_PARAMS
            );
        }
        let metadata = Arc::new(PluginMetadata {
            path: path.to_path_buf(),
            parameters: parameters
                .iter()
                .take(MAX_PLUGIN_PARAMS)
                .map(|raw| Parameter::parse(raw))
                .collect(),
            data: Mutex::new(PluginData {
                slot: vec![0u8; PLUGIN_DATA_SIZE].into_boxed_slice(),
                len: 0,
            }),
            plugin,
        });
        info!(
            "Loaded {} plugin '{}' v{} from {}",
            metadata.kind(),
            metadata.name(),
            metadata.version(),
            path.display()
        );
        lock(&self.registry).push(metadata.clone());
        Ok(metadata)
    }

    /// Runs `init` of every plugin not yet initialized.
    ///
    /// The registry lock is not held during the calls, so `init` may use any
    /// host service. A failing plugin stays registered and keeps receiving
    /// hook calls. Returns the number of failures.
    pub fn initialize(&self, ctx: &ProcessingContext) -> usize {
        let pending: Vec<_> = self
            .plugins()
            .into_iter()
            .filter(|p| !p.is_initialized())
            .collect();
        let mut failures = 0;
        for plugin in pending {
            match plugin.plugin.initialize(ctx.host_ptr()) {
                0 => debug!(
                    "Initialized plugin '{}' with {} parameters",
                    plugin.name(),
                    plugin.parameters.len()
                ),
                status => {
                    failures += 1;
                    ctx.error(&format!(
                        "Plugin '{}' failed to initialize (status {})",
                        plugin.name(),
                        status
                    ));
                }
            }
        }
        failures
    }

    /// Calls every plugin's `cleanup` and empties the registry.
    ///
    /// `ctx` is `None` when no processing context was ever created; plugins
    /// then receive a null table. Libraries are unloaded once the engines
    /// drop their wrappers as well.
    pub fn destroy(&self, ctx: Option<&ProcessingContext>) {
        let plugins = std::mem::take(&mut *lock(&self.registry));
        let host = ctx.map_or(ptr::null_mut(), ProcessingContext::host_ptr);
        for plugin in plugins.iter().rev() {
            debug!("Cleaning up plugin '{}'", plugin.name());
            plugin.plugin.cleanup(host);
        }
    }

    /// Snapshot of the registry, in load order.
    pub fn plugins(&self) -> Vec<Arc<PluginMetadata>> {
        lock(&self.registry).clone()
    }

    pub fn plugin_count(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn find(&self, name: &str) -> Option<Arc<PluginMetadata>> {
        lock(&self.registry).iter().find(|p| p.name() == name).cloned()
    }

    /// Loaded content plugins, in load order.
    pub fn content_plugins(&self) -> Vec<Arc<ContentPlugin>> {
        lock(&self.registry)
            .iter()
            .filter_map(|p| match &p.plugin {
                LoadedPlugin::Content(content) => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn parameter(&self, plugin: &str, key: &str) -> Option<String> {
        self.find(plugin)?.parameter(key)
    }

    pub fn parameter_count(&self, plugin: &str) -> usize {
        self.find(plugin).map_or(0, |p| p.parameters.len())
    }

    pub fn parameter_by_index(&self, plugin: &str, index: usize) -> Option<String> {
        self.find(plugin)?.parameters().into_iter().nth(index)
    }

    // The returned pointers stay valid while the registry holds the plugin.
    pub(crate) fn parameter_ptr(&self, plugin: &str, key: &str) -> Option<*const c_char> {
        let registry = lock(&self.registry);
        let metadata = registry.iter().find(|p| p.name() == plugin)?;
        metadata.find_parameter(key).map(|p| p.value.as_ptr())
    }

    pub(crate) fn parameter_ptr_by_index(&self, plugin: &str, index: usize) -> Option<*const c_char> {
        let registry = lock(&self.registry);
        let metadata = registry.iter().find(|p| p.name() == plugin)?;
        metadata.parameters.get(index).map(|p| p.raw.as_ptr())
    }

    /// Stores up to [`PLUGIN_DATA_SIZE`] bytes in a plugin's data slot.
    ///
    /// # Errors
    /// Fails for unknown plugins and oversized data.
    pub fn set_plugin_data(&self, plugin: &str, data: &[u8]) -> Result<()> {
        if data.len() > PLUGIN_DATA_SIZE {
            return Err(Error::Config(format!(
                "plugin data of {} bytes exceeds the limit of {}",
                data.len(),
                PLUGIN_DATA_SIZE
            )));
        }
        let metadata = self
            .find(plugin)
            .ok_or_else(|| Error::Config(format!("no plugin named '{}'", plugin)))?;
        let mut slot = lock(&metadata.data);
        slot.slot[..data.len()].copy_from_slice(data);
        slot.len = data.len();
        Ok(())
    }

    /// Copy of a plugin's data slot.
    pub fn plugin_data(&self, plugin: &str) -> Option<Vec<u8>> {
        let metadata = self.find(plugin)?;
        let slot = lock(&metadata.data);
        Some(slot.slot[..slot.len].to_vec())
    }

    // The slot never moves, so the pointer stays valid while the plugin is registered.
    pub(crate) fn plugin_data_ptr(&self, plugin: &str) -> Option<(*const u8, usize)> {
        let metadata = self.find(plugin)?;
        let slot = lock(&metadata.data);
        Some((slot.slot.as_ptr(), slot.len))
    }
}

#[cfg(test)]
mod tests {
    use super::abi::{filter_kind, AbiHeader, FconcatHost, FCONCAT_PLUGIN_MAGIC};
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::core_types::FileInfo;
    use std::ffi::{c_int, CStr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    unsafe extern "C" fn upper_transform(
        host: *mut FconcatHost,
        _path: *const c_char,
        input: *const c_char,
        size: usize,
        output: *mut *mut c_char,
        output_size: *mut usize,
    ) -> c_int {
        let block = ((*host).alloc)(host, size.max(1)) as *mut u8;
        if block.is_null() {
            return -1;
        }
        let input = std::slice::from_raw_parts(input as *const u8, size);
        for (i, b) in input.iter().enumerate() {
            *block.add(i) = b.to_ascii_uppercase();
        }
        *output = block as *mut c_char;
        *output_size = size;
        0
    }

    unsafe extern "C" fn hide_secrets(
        _host: *mut FconcatHost,
        path: *const c_char,
        _info: *const abi::RawFileInfo,
    ) -> c_int {
        let path = CStr::from_ptr(path).to_string_lossy();
        c_int::from(!path.contains("secret"))
    }

    static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);
    static CLEANUP_CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn counting_init(host: *mut FconcatHost) -> c_int {
        INIT_CALLS.fetch_add(1, Ordering::SeqCst);
        let mode = ((*host).get_plugin_parameter)(host, c"upper".as_ptr(), c"mode".as_ptr());
        if mode.is_null() {
            return -1;
        }
        0
    }

    unsafe extern "C" fn counting_cleanup(_host: *mut FconcatHost) {
        CLEANUP_CALLS.fetch_add(1, Ordering::SeqCst);
    }

    unsafe extern "C" fn failing_init(_host: *mut FconcatHost) -> c_int {
        7
    }

    fn filter_table(name: &'static CStr) -> RawFilterPlugin {
        RawFilterPlugin {
            header: AbiHeader::CURRENT,
            name: name.as_ptr(),
            version: c"1.0".as_ptr(),
            description: ptr::null(),
            kind: filter_kind::TRANSFORM,
            priority: 10,
            init: Some(counting_init),
            should_include_path: Some(hide_secrets),
            should_include_content: None,
            transform_content: Some(upper_transform),
            cleanup: Some(counting_cleanup),
        }
    }

    fn format_table(name: &'static CStr) -> RawFormatPlugin {
        RawFormatPlugin {
            header: AbiHeader::CURRENT,
            name: name.as_ptr(),
            version: ptr::null(),
            description: ptr::null(),
            file_extension: c"tag".as_ptr(),
            mime_type: ptr::null(),
            init: None,
            begin_document: None,
            begin_structure: None,
            write_directory: None,
            write_file_entry: None,
            end_structure: None,
            begin_content: None,
            write_file_header: None,
            write_file_chunk: None,
            write_file_footer: None,
            end_content: None,
            end_document: None,
            cleanup: None,
        }
    }

    fn context() -> Arc<ProcessingContext> {
        ProcessingContext::in_memory(ConfigBuilder::new("in", "elsewhere/out.txt").build())
    }

    fn adopt_filter(ctx: &ProcessingContext, raw: RawFilterPlugin, params: &[&str]) -> Result<Arc<PluginMetadata>> {
        let params: Vec<String> = params.iter().map(|s| s.to_string()).collect();
        ctx.plugins().adopt(
            Path::new("test-plugin.so"),
            None,
            Probe::Filter(raw),
            &params,
            ctx.filter(),
            ctx.format(),
        )
    }

    #[test]
    fn test_parameter_lookup() {
        let with_value = Parameter::parse("mode=fast");
        assert!(with_value.matches("mode"));
        assert!(!with_value.matches("mod"));
        assert_eq!(with_value.value.to_str(), Ok("fast"));

        let bare = Parameter::parse("verbose");
        assert!(bare.matches("verbose"));
        assert!(!bare.matches("verb"));

        let empty_value = Parameter::parse("x=");
        assert!(empty_value.matches("x"));
        assert_eq!(empty_value.value.to_str(), Ok(""));
    }

    #[test]
    fn test_adopted_filter_plugin_runs_through_engine() -> anyhow::Result<()> {
        let ctx = context();
        let metadata = adopt_filter(&ctx, filter_table(c"upper"), &["mode=shout", "strict"])?;
        assert_eq!(metadata.kind(), PluginKind::Filter);
        assert_eq!(metadata.version(), "1.0");
        assert_eq!(ctx.plugins().parameter("upper", "mode").as_deref(), Some("shout"));
        assert_eq!(ctx.plugins().parameter("upper", "strict").as_deref(), Some("strict"));
        assert_eq!(ctx.plugins().parameter_count("upper"), 2);
        assert_eq!(ctx.plugins().parameter_by_index("upper", 1).as_deref(), Some("strict"));
        assert_eq!(ctx.plugins().parameter_by_index("upper", 2), None);

        let before = INIT_CALLS.load(Ordering::SeqCst);
        assert_eq!(ctx.plugins().initialize(&ctx), 0);
        assert!(INIT_CALLS.load(Ordering::SeqCst) > before);
        assert!(metadata.is_initialized());

        let engine = ctx.filter();
        let info = FileInfo::default();
        assert!(!engine.should_include_path(&ctx, "secret.txt", &info));
        assert!(engine.should_include_path(&ctx, "plain.txt", &info));
        assert_eq!(engine.transform_content(&ctx, "plain.txt", b"abc").as_ref(), b"ABC");
        assert_eq!(ctx.memory().stats().current_usage, 0);

        let cleanups = CLEANUP_CALLS.load(Ordering::SeqCst);
        ctx.plugins().destroy(Some(&ctx));
        assert!(CLEANUP_CALLS.load(Ordering::SeqCst) > cleanups);
        assert_eq!(ctx.plugins().plugin_count(), 0);
        Ok(())
    }

    #[test]
    fn test_failed_init_is_advisory() -> anyhow::Result<()> {
        let ctx = context();
        let mut raw = filter_table(c"broken");
        raw.init = Some(failing_init);
        let metadata = adopt_filter(&ctx, raw, &[])?;

        assert_eq!(ctx.plugins().initialize(&ctx), 1);
        assert!(!metadata.is_initialized());
        assert_eq!(ctx.plugins().plugin_count(), 1);
        assert_eq!(ctx.stats().errors, 1);
        assert!(!ctx
            .filter()
            .should_include_path(&ctx, "secret.txt", &FileInfo::default()));
        Ok(())
    }

    #[test]
    fn test_bad_header_is_rejected() {
        let ctx = context();
        let mut raw = filter_table(c"alien");
        raw.header = AbiHeader {
            magic: FCONCAT_PLUGIN_MAGIC,
            abi_version: 99,
        };
        let err = adopt_filter(&ctx, raw, &[]).expect_err("rejected");
        assert!(err.to_string().contains("ABI version 99"));
        assert_eq!(ctx.plugins().plugin_count(), 0);
        assert_eq!(ctx.filter().plugin_count(), 0);
    }

    #[test]
    fn test_registry_limit() -> anyhow::Result<()> {
        let ctx = context();
        for _ in 0..MAX_PLUGINS {
            adopt_filter(&ctx, filter_table(c"many"), &[])?;
        }
        let err = adopt_filter(&ctx, filter_table(c"many"), &[]).expect_err("full");
        assert!(err.to_string().contains("plugin limit"));
        Ok(())
    }

    #[test]
    fn test_parameters_are_capped() -> anyhow::Result<()> {
        let ctx = context();
        let params: Vec<String> = (0..MAX_PLUGIN_PARAMS + 4).map(|i| format!("p{}=v", i)).collect();
        let refs: Vec<&str> = params.iter().map(String::as_str).collect();
        adopt_filter(&ctx, filter_table(c"capped"), &refs)?;
        assert_eq!(ctx.plugins().parameter_count("capped"), MAX_PLUGIN_PARAMS);
        Ok(())
    }

    #[test]
    fn test_plugin_data_slot() -> anyhow::Result<()> {
        let ctx = context();
        adopt_filter(&ctx, filter_table(c"holder"), &[])?;
        let plugins = ctx.plugins();

        assert_eq!(plugins.plugin_data("holder"), Some(Vec::new()));
        plugins.set_plugin_data("holder", b"state")?;
        assert_eq!(plugins.plugin_data("holder"), Some(b"state".to_vec()));

        let (first, _) = plugins.plugin_data_ptr("holder").expect("slot");
        plugins.set_plugin_data("holder", b"longer state")?;
        let (second, len) = plugins.plugin_data_ptr("holder").expect("slot");
        assert_eq!(first, second);
        assert_eq!(len, 12);

        assert!(plugins.set_plugin_data("nobody", b"x").is_err());
        assert!(plugins
            .set_plugin_data("holder", &vec![0u8; PLUGIN_DATA_SIZE + 1])
            .is_err());
        Ok(())
    }

    #[test]
    fn test_missing_library_is_a_plugin_error() {
        let ctx = context();
        let spec = PluginSpec {
            path: PathBuf::from("/definitely/not/here/libnothing.so"),
            parameters: Vec::new(),
        };
        let err = ctx
            .plugins()
            .load(&spec, ctx.filter(), ctx.format())
            .expect_err("missing library");
        assert!(matches!(err, Error::Plugin { .. }));
        assert_eq!(ctx.plugins().load_all(&[spec], ctx.filter(), ctx.format()), 0);
    }

    unsafe extern "C" fn format_chunk(host: *mut FconcatHost, data: *const c_char, size: usize) -> c_int {
        let level = ((*host).current_directory_level)(host);
        let tag = format!("<{}>", level);
        ((*host).write_output)(host, tag.as_ptr() as *const c_char, tag.len());
        ((*host).write_output)(host, data, size)
    }

    #[test]
    fn test_format_plugin_becomes_active_when_requested() -> anyhow::Result<()> {
        let config = ConfigBuilder::new("in", "elsewhere/out.txt").output_format("tagged").build();
        let (ctx, buffer) = ProcessingContext::with_buffer(config);
        let mut raw = format_table(c"tagged");
        raw.write_file_chunk = Some(format_chunk);
        let metadata = ctx.plugins().adopt(
            Path::new("tagged.so"),
            None,
            Probe::Format(raw),
            &[],
            ctx.filter(),
            ctx.format(),
        )?;
        assert_eq!(metadata.version(), "0.0.0");
        assert_eq!(ctx.format().active_name(), "tagged");
        ctx.plugins().initialize(&ctx);

        ctx.set_current_level(2);
        ctx.format().write_file_chunk(&ctx, b"body")?;
        ctx.flush_output()?;
        assert_eq!(buffer.contents(), b"<2>body");
        Ok(())
    }

    unsafe extern "C" fn start(_host: *mut FconcatHost, _path: *const c_char, info: *const abi::RawFileInfo) -> *mut c_void {
        Box::into_raw(Box::new((*info).size)) as *mut c_void
    }

    unsafe extern "C" fn reverse_chunk(
        host: *mut FconcatHost,
        _state: *mut c_void,
        input: *const c_char,
        size: usize,
        output: *mut *mut c_char,
        output_size: *mut usize,
    ) -> c_int {
        let block = ((*host).alloc)(host, size.max(1)) as *mut u8;
        let input = std::slice::from_raw_parts(input as *const u8, size);
        for (i, b) in input.iter().rev().enumerate() {
            *block.add(i) = *b;
        }
        *output = block as *mut c_char;
        *output_size = size;
        0
    }

    static FREED_STATES: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn free_state(_host: *mut FconcatHost, state: *mut c_void) {
        drop(Box::from_raw(state as *mut u64));
        FREED_STATES.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_content_plugin_session() -> anyhow::Result<()> {
        let ctx = context();
        let raw = RawContentPlugin {
            header: AbiHeader::CURRENT,
            name: c"reverse".as_ptr(),
            version: c"2".as_ptr(),
            description: c"reverses chunks".as_ptr(),
            init: None,
            cleanup: None,
            file_start: Some(start),
            process_chunk: Some(reverse_chunk),
            file_end: None,
            file_cleanup: Some(free_state),
            capabilities: 1,
        };
        let metadata = ctx.plugins().adopt(
            Path::new("reverse.so"),
            None,
            Probe::Content(raw),
            &[],
            ctx.filter(),
            ctx.format(),
        )?;
        assert_eq!(metadata.description(), "reverses chunks");
        ctx.plugins().initialize(&ctx);

        let content = ctx.plugins().content_plugins();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].capabilities(), 1);

        let freed = FREED_STATES.load(Ordering::SeqCst);
        let session = content[0].start_file(&ctx, "a.txt", &FileInfo::default());
        assert_eq!(content[0].process_chunk(&ctx, &session, b"abc"), Some(b"cba".to_vec()));
        content[0].finish_file(&ctx, session);
        assert_eq!(FREED_STATES.load(Ordering::SeqCst), freed + 1);
        assert_eq!(ctx.memory().stats().current_usage, 0);
        Ok(())
    }

    /// A library stand-in exporting only the listed symbols.
    struct Exports(Vec<(&'static [u8], EntryPoint)>);

    fn export(symbol: &'static [u8], entry: EntryPoint) -> (&'static [u8], EntryPoint) {
        (symbol, entry)
    }

    impl EntryPoints for Exports {
        fn entry_point(&self, symbol: &[u8]) -> Option<EntryPoint> {
            self.0.iter().find(|(name, _)| *name == symbol).map(|(_, entry)| *entry)
        }
    }

    unsafe extern "C" fn format_entry() -> *const c_void {
        Box::into_raw(Box::new(format_table(c"both"))) as *const c_void
    }

    unsafe extern "C" fn filter_entry() -> *const c_void {
        Box::into_raw(Box::new(filter_table(c"filtering"))) as *const c_void
    }

    static CONTENT_PROBES: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn content_entry() -> *const c_void {
        CONTENT_PROBES.fetch_add(1, Ordering::SeqCst);
        ptr::null()
    }

    unsafe extern "C" fn null_entry() -> *const c_void {
        ptr::null()
    }

    #[test]
    fn test_format_entry_point_wins_over_content() {
        let library = Exports(vec![export(CONTENT_ENTRY, content_entry), export(FORMAT_ENTRY, format_entry)]);
        let probe = unsafe { probe_library(&library) }.expect("format plugin");
        match probe {
            Probe::Format(raw) => {
                let name = unsafe { CStr::from_ptr(raw.name) };
                assert_eq!(name.to_str(), Ok("both"));
            }
            _ => panic!("expected a format plugin"),
        }
        assert_eq!(CONTENT_PROBES.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_filter_entry_point_wins_over_content() {
        let library = Exports(vec![export(CONTENT_ENTRY, content_entry), export(FILTER_ENTRY, filter_entry)]);
        let probe = unsafe { probe_library(&library) }.expect("filter plugin");
        assert!(matches!(probe, Probe::Filter(_)));
        assert_eq!(CONTENT_PROBES.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_library_without_entry_point_is_rejected() {
        let library = Exports(vec![export(b"get_something_else\0", format_entry)]);
        let reason = unsafe { probe_library(&library) }.err().expect("rejected");
        assert!(reason.contains("no get_format_plugin, get_filter_plugin or get_plugin"));
    }

    #[test]
    fn test_null_table_is_rejected() {
        let library = Exports(vec![export(FILTER_ENTRY, null_entry), export(CONTENT_ENTRY, content_entry)]);
        let reason = unsafe { probe_library(&library) }.err().expect("rejected");
        assert!(reason.contains("null plugin table"));
    }
}
