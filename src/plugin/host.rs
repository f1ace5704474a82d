// src/plugin/host.rs

//! `extern "C"` implementations of the [`FconcatHost`] services.
//!
//! Every function tolerates a null table, a table without a back-pointer and
//! null string arguments, answering with a neutral value.

use super::abi::{AbiHeader, FconcatHost};
use crate::config::LogLevel;
use crate::constants::PLUGIN_DATA_SIZE;
use crate::context::ProcessingContext;
use crate::memory::TrackedPtr;
use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr;
use std::slice;

/// Builds the table for the context at `host`.
pub(crate) fn host_table(host: *const c_void) -> FconcatHost {
    FconcatHost {
        header: AbiHeader::CURRENT,
        host,
        get_config_string,
        get_config_int,
        get_config_bool,
        get_plugin_parameter,
        get_plugin_parameter_count,
        get_plugin_parameter_by_index,
        log: host_log,
        is_log_enabled,
        alloc: host_alloc,
        realloc: host_realloc,
        free: host_free,
        write_output,
        get_plugin_data,
        set_plugin_data,
        create_stream_buffer,
        stream_write,
        stream_flush,
        stream_destroy,
        current_directory_level,
    }
}

/// Resolves the context behind a host table.
///
/// # Safety
/// `table` must be null or point at a table built by [`host_table`] whose
/// context is still alive.
unsafe fn context<'a>(table: *mut FconcatHost) -> Option<&'a ProcessingContext> {
    if table.is_null() {
        return None;
    }
    let host = (*table).host as *const ProcessingContext;
    host.as_ref()
}

/// # Safety
/// `s` must be null or a valid NUL-terminated string.
unsafe fn text<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    CStr::from_ptr(s).to_str().ok()
}

/// # Safety
/// `data` must be null or valid for `size` bytes.
unsafe fn bytes<'a>(data: *const c_char, size: usize) -> Option<&'a [u8]> {
    match (data.is_null(), size) {
        (_, 0) => Some(&[]),
        (true, _) => None,
        (false, _) => Some(slice::from_raw_parts(data as *const u8, size)),
    }
}

fn stream_id(handle: *mut c_void) -> u64 {
    handle as usize as u64
}

unsafe extern "C" fn get_config_string(table: *mut FconcatHost, key: *const c_char) -> *const c_char {
    match (context(table), text(key)) {
        (Some(ctx), Some(key)) => ctx.config_c_string(key).unwrap_or(ptr::null()),
        _ => ptr::null(),
    }
}

unsafe extern "C" fn get_config_int(table: *mut FconcatHost, key: *const c_char) -> c_int {
    match (context(table), text(key)) {
        (Some(ctx), Some(key)) => ctx.config().get_int(key),
        _ => 0,
    }
}

unsafe extern "C" fn get_config_bool(table: *mut FconcatHost, key: *const c_char) -> bool {
    match (context(table), text(key)) {
        (Some(ctx), Some(key)) => ctx.config().get_bool(key),
        _ => false,
    }
}

unsafe extern "C" fn get_plugin_parameter(
    table: *mut FconcatHost,
    plugin: *const c_char,
    key: *const c_char,
) -> *const c_char {
    match (context(table), text(plugin), text(key)) {
        (Some(ctx), Some(plugin), Some(key)) => ctx
            .plugins()
            .parameter_ptr(plugin, key)
            .unwrap_or(ptr::null()),
        _ => ptr::null(),
    }
}

unsafe extern "C" fn get_plugin_parameter_count(table: *mut FconcatHost, plugin: *const c_char) -> c_int {
    match (context(table), text(plugin)) {
        (Some(ctx), Some(plugin)) => ctx.plugins().parameter_count(plugin) as c_int,
        _ => 0,
    }
}

unsafe extern "C" fn get_plugin_parameter_by_index(
    table: *mut FconcatHost,
    plugin: *const c_char,
    index: c_int,
) -> *const c_char {
    let Ok(index) = usize::try_from(index) else {
        return ptr::null();
    };
    match (context(table), text(plugin)) {
        (Some(ctx), Some(plugin)) => ctx
            .plugins()
            .parameter_ptr_by_index(plugin, index)
            .unwrap_or(ptr::null()),
        _ => ptr::null(),
    }
}

unsafe extern "C" fn host_log(table: *mut FconcatHost, level: c_int, message: *const c_char) {
    let Some(ctx) = context(table) else {
        return;
    };
    if message.is_null() {
        return;
    }
    let message = CStr::from_ptr(message).to_string_lossy();
    let level = LogLevel::from_code(level).unwrap_or(LogLevel::Info);
    ctx.log(level, &message);
}

unsafe extern "C" fn is_log_enabled(table: *mut FconcatHost, level: c_int) -> bool {
    match (context(table), LogLevel::from_code(level)) {
        (Some(ctx), Some(level)) => ctx.is_log_enabled(level),
        _ => false,
    }
}

unsafe extern "C" fn host_alloc(table: *mut FconcatHost, size: usize) -> *mut c_void {
    context(table)
        .and_then(|ctx| ctx.memory().tracked().alloc(size))
        .map_or(ptr::null_mut(), |p| p.as_ptr() as *mut c_void)
}

unsafe extern "C" fn host_realloc(table: *mut FconcatHost, old: *mut c_void, size: usize) -> *mut c_void {
    let Some(ctx) = context(table) else {
        return ptr::null_mut();
    };
    let old = TrackedPtr::from_raw(old as *mut u8);
    ctx.memory()
        .tracked()
        .realloc(old, size)
        .map_or(ptr::null_mut(), |p| p.as_ptr() as *mut c_void)
}

unsafe extern "C" fn host_free(table: *mut FconcatHost, block: *mut c_void) {
    if let (Some(ctx), Some(block)) = (context(table), TrackedPtr::from_raw(block as *mut u8)) {
        ctx.memory().tracked().free(block);
    }
}

unsafe extern "C" fn write_output(table: *mut FconcatHost, data: *const c_char, size: usize) -> c_int {
    match (context(table), bytes(data, size)) {
        (Some(ctx), Some(data)) => match ctx.write_output(data) {
            Ok(()) => 0,
            Err(e) => {
                ctx.error(&format!("Plugin output write failed: {}", e));
                -1
            }
        },
        _ => -1,
    }
}

unsafe extern "C" fn get_plugin_data(
    table: *mut FconcatHost,
    plugin: *const c_char,
    size: *mut usize,
) -> *const c_void {
    let found = match (context(table), text(plugin)) {
        (Some(ctx), Some(plugin)) => ctx.plugins().plugin_data_ptr(plugin),
        _ => None,
    };
    let (data, len) = found.unwrap_or((ptr::null(), 0));
    if !size.is_null() {
        *size = len;
    }
    data as *const c_void
}

unsafe extern "C" fn set_plugin_data(
    table: *mut FconcatHost,
    plugin: *const c_char,
    data: *const c_void,
    size: usize,
) -> c_int {
    if size > PLUGIN_DATA_SIZE {
        return -1;
    }
    match (context(table), text(plugin), bytes(data as *const c_char, size)) {
        (Some(ctx), Some(plugin), Some(data)) => match ctx.plugins().set_plugin_data(plugin, data) {
            Ok(()) => 0,
            Err(e) => {
                ctx.warning(&e.to_string());
                -1
            }
        },
        _ => -1,
    }
}

unsafe extern "C" fn create_stream_buffer(table: *mut FconcatHost, initial_capacity: usize) -> *mut c_void {
    let Some(ctx) = context(table) else {
        return ptr::null_mut();
    };
    match ctx.create_stream(initial_capacity) {
        Ok(id) => id as usize as *mut c_void,
        Err(e) => {
            ctx.error(&e.to_string());
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn stream_write(
    table: *mut FconcatHost,
    handle: *mut c_void,
    data: *const c_char,
    size: usize,
) -> c_int {
    match (context(table), bytes(data, size)) {
        (Some(ctx), Some(data)) => match ctx.stream_write(stream_id(handle), data) {
            Ok(()) => 0,
            Err(e) => {
                ctx.warning(&format!("Stream buffer write failed: {}", e));
                -1
            }
        },
        _ => -1,
    }
}

unsafe extern "C" fn stream_flush(table: *mut FconcatHost, handle: *mut c_void) -> c_int {
    let Some(ctx) = context(table) else {
        return -1;
    };
    match ctx.stream_flush(stream_id(handle)) {
        Ok(()) => 0,
        Err(e) => {
            ctx.warning(&format!("Stream buffer flush failed: {}", e));
            -1
        }
    }
}

unsafe extern "C" fn stream_destroy(table: *mut FconcatHost, handle: *mut c_void) {
    if let Some(ctx) = context(table) {
        ctx.stream_destroy(stream_id(handle));
    }
}

unsafe extern "C" fn current_directory_level(table: *mut FconcatHost) -> c_int {
    context(table).map_or(0, |ctx| ctx.current_level() as c_int)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use std::ffi::CString;

    fn context_for_tests() -> (std::sync::Arc<ProcessingContext>, crate::writer::SharedBuffer) {
        let config = ConfigBuilder::new("in", "elsewhere/out.txt")
            .output_format("json")
            .show_size(true)
            .log_level(LogLevel::Debug)
            .build();
        ProcessingContext::with_buffer(config)
    }

    #[test]
    fn test_config_access_through_table() {
        let (ctx, _) = context_for_tests();
        let table = ctx.host_ptr();
        // SAFETY: the table and the context outlive these calls.
        unsafe {
            let format = get_config_string(table, c"output_format".as_ptr());
            assert_eq!(CStr::from_ptr(format).to_str(), Ok("json"));
            assert!(get_config_string(table, c"missing".as_ptr()).is_null());
            assert!(get_config_bool(table, c"show_size".as_ptr()));
            assert_eq!(get_config_int(table, c"log_level".as_ptr()), 3);
            assert!(is_log_enabled(table, 3));
            assert!(!is_log_enabled(table, 4));
        }
    }

    #[test]
    fn test_null_table_is_tolerated() {
        // SAFETY: null is explicitly accepted.
        unsafe {
            assert!(get_config_string(ptr::null_mut(), c"output_format".as_ptr()).is_null());
            assert!(host_alloc(ptr::null_mut(), 8).is_null());
            assert_eq!(write_output(ptr::null_mut(), c"x".as_ptr(), 1), -1);
            host_free(ptr::null_mut(), ptr::null_mut());
            assert_eq!(current_directory_level(ptr::null_mut()), 0);
        }
    }

    #[test]
    fn test_memory_and_output_services() -> anyhow::Result<()> {
        let (ctx, buffer) = context_for_tests();
        let table = ctx.host_ptr();
        // SAFETY: the block is used within its allocated size.
        unsafe {
            let block = host_alloc(table, 4) as *mut u8;
            assert!(!block.is_null());
            ptr::copy_nonoverlapping(b"abcd".as_ptr(), block, 4);
            let grown = host_realloc(table, block as *mut c_void, 8) as *mut c_char;
            assert!(!grown.is_null());
            assert_eq!(write_output(table, grown, 4), 0);
            host_free(table, grown as *mut c_void);
        }
        assert_eq!(ctx.memory().stats().current_usage, 0);
        ctx.flush_output()?;
        assert_eq!(buffer.contents(), b"abcd");
        Ok(())
    }

    #[test]
    fn test_stream_services() -> anyhow::Result<()> {
        let (ctx, buffer) = context_for_tests();
        let table = ctx.host_ptr();
        let payload = CString::new("streamed")?;
        // SAFETY: the handle came from `create_stream_buffer`.
        unsafe {
            let handle = create_stream_buffer(table, 0);
            assert!(!handle.is_null());
            assert_eq!(stream_write(table, handle, payload.as_ptr(), 8), 0);
            assert_eq!(stream_flush(table, handle), 0);
            stream_destroy(table, handle);
            assert_eq!(stream_flush(table, handle), -1);
        }
        ctx.flush_output()?;
        assert_eq!(buffer.contents(), b"streamed");
        Ok(())
    }

    #[test]
    fn test_plugin_data_limit() {
        let (ctx, _) = context_for_tests();
        let table = ctx.host_ptr();
        let big = vec![0u8; PLUGIN_DATA_SIZE + 1];
        // SAFETY: `big` is valid for its length.
        unsafe {
            assert_eq!(
                set_plugin_data(table, c"p".as_ptr(), big.as_ptr() as *const c_void, big.len()),
                -1
            );
        }
    }

    #[test]
    fn test_log_counts_warnings() {
        let (ctx, _) = context_for_tests();
        // SAFETY: valid table and message.
        unsafe { host_log(ctx.host_ptr(), 1, c"from a plugin".as_ptr()) };
        assert_eq!(ctx.stats().warnings, 1);
    }

    #[test]
    fn test_current_level_follows_context() {
        let (ctx, _) = context_for_tests();
        ctx.set_current_level(3);
        // SAFETY: valid table.
        assert_eq!(unsafe { current_directory_level(ctx.host_ptr()) }, 3);
    }
}
