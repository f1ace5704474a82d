// src/writer.rs

//! Output destinations.

use crate::errors::{io_error_with_path, Result};
use crate::sync::lock;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Creates (or truncates) the output file behind a buffered writer.
///
/// # Errors
/// Returns [`crate::Error::Io`] if the file cannot be created.
pub fn open_output(path: &Path) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path).map_err(|e| io_error_with_path(e, path))?;
    Ok(Box::new(BufWriter::new(file)))
}

/// In-memory destination whose bytes stay readable after the writer is moved
/// into a processing context.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.0).clone()
    }

    /// Contents decoded as UTF-8, lossily.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
