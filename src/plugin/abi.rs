// src/plugin/abi.rs

//! The versioned C ABI shared with plugin libraries.
//!
//! A plugin exports one of three entry points, probed in this order:
//!
//! | symbol              | returns                      |
//! |---------------------|------------------------------|
//! | `get_format_plugin` | `*const RawFormatPlugin`     |
//! | `get_filter_plugin` | `*const RawFilterPlugin`     |
//! | `get_plugin`        | `*const RawContentPlugin`    |
//!
//! Every struct starts with an [`AbiHeader`] that must carry
//! [`FCONCAT_PLUGIN_MAGIC`] and [`FCONCAT_ABI_VERSION`]; anything else is
//! rejected before a single function pointer is trusted.
//!
//! Every callback receives a `*mut FconcatHost` as its first argument. It is
//! null only for `cleanup` when no processing context exists.
//!
//! Buffers returned through `output` out-parameters must be allocated with
//! the host's `alloc`/`realloc`; the host copies and frees them.

use std::ffi::{c_char, c_int, c_void};

/// `"FCNT"`.
pub const FCONCAT_PLUGIN_MAGIC: u32 = 0x4643_4E54;

/// Current ABI revision.
pub const FCONCAT_ABI_VERSION: u32 = 1;

/// Entry point symbol of format plugins.
pub const FORMAT_ENTRY: &[u8] = b"get_format_plugin\0";
/// Entry point symbol of filter plugins.
pub const FILTER_ENTRY: &[u8] = b"get_filter_plugin\0";
/// Entry point symbol of content plugins.
pub const CONTENT_ENTRY: &[u8] = b"get_plugin\0";

/// Leading fields of every ABI struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbiHeader {
    /// Must be [`FCONCAT_PLUGIN_MAGIC`].
    pub magic: u32,
    /// Must be [`FCONCAT_ABI_VERSION`].
    pub abi_version: u32,
}

impl AbiHeader {
    /// The header the host expects.
    pub const CURRENT: AbiHeader = AbiHeader {
        magic: FCONCAT_PLUGIN_MAGIC,
        abi_version: FCONCAT_ABI_VERSION,
    };

    /// Describes why a header is unacceptable, or `None` if it is valid.
    pub fn rejection(&self) -> Option<String> {
        if self.magic != FCONCAT_PLUGIN_MAGIC {
            Some(format!("bad magic 0x{:08X}", self.magic))
        } else if self.abi_version != FCONCAT_ABI_VERSION {
            Some(format!(
                "ABI version {} is not supported (expected {})",
                self.abi_version, FCONCAT_ABI_VERSION
            ))
        } else {
            None
        }
    }
}

/// Entry metadata handed to plugins. Valid only for the duration of the call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawFileInfo {
    /// NUL-terminated relative path.
    pub path: *const c_char,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in seconds since the Unix epoch, or 0.
    pub modified: i64,
    /// Raw permission bits.
    pub permissions: u32,
    /// Directory flag.
    pub is_directory: bool,
    /// Symlink flag.
    pub is_symlink: bool,
    /// Binary flag.
    pub is_binary: bool,
}

/// Log levels used by [`FconcatHost::log`].
pub mod log_level {
    use std::ffi::c_int;
    /// Errors.
    pub const ERROR: c_int = 0;
    /// Warnings.
    pub const WARNING: c_int = 1;
    /// Informational messages.
    pub const INFO: c_int = 2;
    /// Debug output.
    pub const DEBUG: c_int = 3;
    /// Trace output.
    pub const TRACE: c_int = 4;
}

/// Lifecycle `init`: returns 0 on success.
pub type InitFn = unsafe extern "C" fn(*mut FconcatHost) -> c_int;
/// Lifecycle `cleanup`. The host pointer may be null.
pub type CleanupFn = unsafe extern "C" fn(*mut FconcatHost);
/// Document hook without arguments: returns 0 on success.
pub type DocumentFn = unsafe extern "C" fn(*mut FconcatHost) -> c_int;
/// Content rewrite: `(ctx, path, input, input_size, &output, &output_size) -> status`.
pub type TransformFn = unsafe extern "C" fn(
    *mut FconcatHost,
    *const c_char,
    *const c_char,
    usize,
    *mut *mut c_char,
    *mut usize,
) -> c_int;

/// Format plugin table.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawFormatPlugin {
    pub header: AbiHeader,
    pub name: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    pub file_extension: *const c_char,
    pub mime_type: *const c_char,
    pub init: Option<InitFn>,
    pub begin_document: Option<DocumentFn>,
    pub begin_structure: Option<DocumentFn>,
    pub write_directory: Option<unsafe extern "C" fn(*mut FconcatHost, *const c_char, c_int) -> c_int>,
    pub write_file_entry:
        Option<unsafe extern "C" fn(*mut FconcatHost, *const c_char, *const RawFileInfo) -> c_int>,
    pub end_structure: Option<DocumentFn>,
    pub begin_content: Option<DocumentFn>,
    pub write_file_header: Option<unsafe extern "C" fn(*mut FconcatHost, *const c_char) -> c_int>,
    pub write_file_chunk: Option<unsafe extern "C" fn(*mut FconcatHost, *const c_char, usize) -> c_int>,
    pub write_file_footer: Option<DocumentFn>,
    pub end_content: Option<DocumentFn>,
    pub end_document: Option<DocumentFn>,
    pub cleanup: Option<CleanupFn>,
}

/// Filter plugin kind codes.
pub mod filter_kind {
    use std::ffi::c_int;
    /// Include filter.
    pub const INCLUDE: c_int = 0;
    /// Exclude filter.
    pub const EXCLUDE: c_int = 1;
    /// Transform filter.
    pub const TRANSFORM: c_int = 2;
}

/// Filter plugin table.
///
/// `should_include_*` return a positive value to include, 0 to exclude and a
/// negative value on failure (treated as "no opinion"). `transform_content`
/// returns 0 and sets `output` to substitute the chunk.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawFilterPlugin {
    pub header: AbiHeader,
    pub name: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    pub kind: c_int,
    pub priority: c_int,
    pub init: Option<InitFn>,
    pub should_include_path:
        Option<unsafe extern "C" fn(*mut FconcatHost, *const c_char, *const RawFileInfo) -> c_int>,
    pub should_include_content:
        Option<unsafe extern "C" fn(*mut FconcatHost, *const c_char, *const c_char, usize) -> c_int>,
    pub transform_content: Option<TransformFn>,
    pub cleanup: Option<CleanupFn>,
}

/// Content plugin table.
///
/// Per file the host calls `file_start`, then `process_chunk` for each chunk
/// (with the opaque per-file pointer `file_start` returned), then `file_end`
/// and `file_cleanup`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawContentPlugin {
    pub header: AbiHeader,
    pub name: *const c_char,
    pub version: *const c_char,
    pub description: *const c_char,
    pub init: Option<InitFn>,
    pub cleanup: Option<CleanupFn>,
    pub file_start:
        Option<unsafe extern "C" fn(*mut FconcatHost, *const c_char, *const RawFileInfo) -> *mut c_void>,
    pub process_chunk: Option<
        unsafe extern "C" fn(
            *mut FconcatHost,
            *mut c_void,
            *const c_char,
            usize,
            *mut *mut c_char,
            *mut usize,
        ) -> c_int,
    >,
    pub file_end: Option<unsafe extern "C" fn(*mut FconcatHost, *mut c_void) -> c_int>,
    pub file_cleanup: Option<unsafe extern "C" fn(*mut FconcatHost, *mut c_void)>,
    pub capabilities: u32,
}

/// Services the host offers to plugins.
///
/// Returned strings and data pointers stay valid until plugin teardown.
/// `get_plugin_data` always returns the same slot for a plugin; its contents
/// change with every `set_plugin_data`.
#[repr(C)]
pub struct FconcatHost {
    pub header: AbiHeader,
    /// Opaque back-pointer to the host's processing context.
    pub host: *const c_void,
    pub get_config_string: unsafe extern "C" fn(*mut FconcatHost, *const c_char) -> *const c_char,
    pub get_config_int: unsafe extern "C" fn(*mut FconcatHost, *const c_char) -> c_int,
    pub get_config_bool: unsafe extern "C" fn(*mut FconcatHost, *const c_char) -> bool,
    pub get_plugin_parameter:
        unsafe extern "C" fn(*mut FconcatHost, *const c_char, *const c_char) -> *const c_char,
    pub get_plugin_parameter_count: unsafe extern "C" fn(*mut FconcatHost, *const c_char) -> c_int,
    pub get_plugin_parameter_by_index:
        unsafe extern "C" fn(*mut FconcatHost, *const c_char, c_int) -> *const c_char,
    pub log: unsafe extern "C" fn(*mut FconcatHost, c_int, *const c_char),
    pub is_log_enabled: unsafe extern "C" fn(*mut FconcatHost, c_int) -> bool,
    pub alloc: unsafe extern "C" fn(*mut FconcatHost, usize) -> *mut c_void,
    pub realloc: unsafe extern "C" fn(*mut FconcatHost, *mut c_void, usize) -> *mut c_void,
    pub free: unsafe extern "C" fn(*mut FconcatHost, *mut c_void),
    pub write_output: unsafe extern "C" fn(*mut FconcatHost, *const c_char, usize) -> c_int,
    pub get_plugin_data: unsafe extern "C" fn(*mut FconcatHost, *const c_char, *mut usize) -> *const c_void,
    pub set_plugin_data: unsafe extern "C" fn(*mut FconcatHost, *const c_char, *const c_void, usize) -> c_int,
    pub create_stream_buffer: unsafe extern "C" fn(*mut FconcatHost, usize) -> *mut c_void,
    pub stream_write: unsafe extern "C" fn(*mut FconcatHost, *mut c_void, *const c_char, usize) -> c_int,
    pub stream_flush: unsafe extern "C" fn(*mut FconcatHost, *mut c_void) -> c_int,
    pub stream_destroy: unsafe extern "C" fn(*mut FconcatHost, *mut c_void),
    pub current_directory_level: unsafe extern "C" fn(*mut FconcatHost) -> c_int,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_validation() {
        assert_eq!(AbiHeader::CURRENT.rejection(), None);

        let bad_magic = AbiHeader {
            magic: 0xDEAD_BEEF,
            abi_version: FCONCAT_ABI_VERSION,
        };
        assert!(bad_magic.rejection().unwrap_or_default().contains("magic"));

        let future = AbiHeader {
            magic: FCONCAT_PLUGIN_MAGIC,
            abi_version: FCONCAT_ABI_VERSION + 1,
        };
        assert!(future.rejection().unwrap_or_default().contains("version"));
    }

    #[test]
    fn test_entry_symbols_are_nul_terminated() {
        for symbol in [FORMAT_ENTRY, FILTER_ENTRY, CONTENT_ENTRY] {
            assert_eq!(symbol.last(), Some(&0));
        }
    }
}
