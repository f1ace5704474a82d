// src/format/text.rs

//! The default human-readable layout.
//!
//! ```text
//! Directory Structure:
//! ==================
//!
//! 📁 src/
//!   📄 src/main.c
//!
//! File Contents:
//! =============
//!
//! // File: src/main.c
//! int main(void) { return 0; }
//!
//! ```

use super::Formatter;
use crate::context::ProcessingContext;
use crate::core_types::FileInfo;
use crate::errors::Result;

/// Plain text output: an indented tree, then every file's content.
#[derive(Debug, Default)]
pub struct TextFormatter;

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }
}

fn indent(level: usize) -> String {
    " ".repeat(level * 2)
}

impl Formatter for TextFormatter {
    fn name(&self) -> &str {
        "text"
    }

    fn begin_structure(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"Directory Structure:\n==================\n\n")
    }

    fn write_directory(&mut self, ctx: &ProcessingContext, path: &str, level: usize) -> Result<()> {
        ctx.write_output(format!("{}📁 {}/\n", indent(level), path).as_bytes())
    }

    fn write_file_entry(
        &mut self,
        ctx: &ProcessingContext,
        path: &str,
        info: &FileInfo,
        level: usize,
    ) -> Result<()> {
        let size = if ctx.config().show_size {
            format!("[{} KB] ", info.size_kib())
        } else {
            String::new()
        };
        ctx.write_output(format!("{}📄 {}{}\n", indent(level), size, path).as_bytes())
    }

    fn begin_content(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"\nFile Contents:\n=============\n\n")
    }

    fn write_file_header(&mut self, ctx: &ProcessingContext, path: &str) -> Result<()> {
        ctx.write_output(format!("// File: {}\n", path).as_bytes())
    }

    fn write_file_chunk(&mut self, ctx: &ProcessingContext, data: &[u8]) -> Result<()> {
        ctx.write_output(data)
    }

    fn write_file_footer(&mut self, ctx: &ProcessingContext) -> Result<()> {
        ctx.write_output(b"\n\n")
    }
}
