// src/format/json.rs

//! JSON output.
//!
//! ```json
//! {
//!   "structure": {
//!     "directories": [ { "path": "src", "level": 0 } ],
//!     "files": [ { "path": "src/a.c", "level": 1, "size": 3,
//!                  "is_binary": false, "is_symlink": false } ]
//!   },
//!   "contents": [ { "path": "src/a.c", "content": "..." } ]
//! }
//! ```
//!
//! The structure walk interleaves directories and files, so file entries are
//! collected in a [`StreamBuffer`] and written after the directory array.

use super::Formatter;
use crate::context::ProcessingContext;
use crate::core_types::FileInfo;
use crate::errors::{Error, Result};
use crate::memory::StreamBuffer;

/// Escapes `"`, `\`, newline, carriage return and tab. Other bytes pass through.
pub fn escape_json(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    for &byte in data {
        match byte {
            b'"' => out.extend_from_slice(b"\\\""),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            other => out.push(other),
        }
    }
    out
}

fn escape_str(path: &str) -> String {
    String::from_utf8_lossy(&escape_json(path.as_bytes())).into_owned()
}

/// JSON document writer.
pub struct JsonFormatter {
    first_directory: bool,
    first_file: bool,
    first_content: bool,
    files: Option<StreamBuffer>,
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self {
            first_directory: true,
            first_file: true,
            first_content: true,
            files: None,
        }
    }
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter for JsonFormatter {
    fn name(&self) -> &str {
        "json"
    }

    fn begin_document(&mut self, ctx: &ProcessingContext) -> Result<()> {
        self.first_directory = true;
        self.first_file = true;
        self.first_content = true;
        self.files = None;
        ctx.write_output(b"{\n")
    }

    fn begin_structure(&mut self, ctx: &ProcessingContext) -> Result<()> {
        self.files = Some(ctx.memory().stream_buffer(4096)?);
        ctx.write_output(b"  \"structure\": {\n    \"directories\": [\n")
    }

    fn write_directory(&mut self, ctx: &ProcessingContext, path: &str, level: usize) -> Result<()> {
        let separator = if self.first_directory { "" } else { ",\n" };
        self.first_directory = false;
        let entry = format!(
            "{}      {{\n        \"path\": \"{}\",\n        \"level\": {}\n      }}",
            separator,
            escape_str(path),
            level
        );
        ctx.write_output(entry.as_bytes())
    }

    fn write_file_entry(
        &mut self,
        ctx: &ProcessingContext,
        path: &str,
        info: &FileInfo,
        level: usize,
    ) -> Result<()> {
        let separator = if self.first_file { "" } else { ",\n" };
        self.first_file = false;
        let entry = format!(
            "{}      {{\n        \"path\": \"{}\",\n        \"level\": {},\n        \"size\": {},\n        \"is_binary\": {},\n        \"is_symlink\": {}\n      }}",
            separator,
            escape_str(path),
            level,
            info.size,
            info.is_binary,
            info.is_symlink
        );
        if self.files.is_none() {
            self.files = Some(ctx.memory().stream_buffer(4096)?);
        }
        match self.files.as_mut() {
            Some(files) => files.write(entry.as_bytes()),
            None => Err(Error::Format("file entry buffer unavailable".into())),
        }
    }

    fn end_structure(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"\n    ],\n    \"files\": [\n")?;
        if let Some(files) = self.files.take() {
            ctx.write_output(&files.contents())?;
        }
        Ok(())
    }

    fn begin_content(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"\n    ]\n  },\n  \"contents\": [\n")
    }

    fn write_file_header(&mut self, ctx: &ProcessingContext, path: &str) -> Result<()> {
        let separator = if self.first_content { "" } else { ",\n" };
        self.first_content = false;
        let header = format!(
            "{}    {{\n      \"path\": \"{}\",\n      \"content\": \"",
            separator,
            escape_str(path)
        );
        ctx.write_output(header.as_bytes())
    }

    fn write_file_chunk(&mut self, ctx: &ProcessingContext, data: &[u8]) -> Result<()> {
        ctx.write_output(&escape_json(data))
    }

    fn write_file_footer(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"\"\n    }")
    }

    fn end_content(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"\n  ]\n")
    }

    fn end_document(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"}\n")
    }
}
