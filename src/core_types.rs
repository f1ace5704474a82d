//! Defines core data structures shared by the engines.
//!
//! `FileInfo` describes one traversal entry, `EntryKind` tells callbacks what
//! they are looking at and `ProcessingStats` accumulates run totals.

use std::fs::Metadata;
use std::time::SystemTime;

/// Metadata of a single traversal entry.
///
/// A `FileInfo` is built fresh for every entry and only lives for the duration
/// of one callback invocation. Callbacks that need data beyond that must copy
/// it out.
///
/// # Examples
///
/// ```
/// use fconcat::core_types::FileInfo;
///
/// let info = FileInfo {
///     path: "src/main.rs".to_string(),
///     size: 2048,
///     ..Default::default()
/// };
///
/// assert_eq!(info.basename(), "main.rs");
/// assert_eq!(info.size_kib(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Path relative to the input directory, always `/`-separated.
    pub path: String,
    /// Size in bytes as reported by `lstat` (or `stat` of a followed link target).
    pub size: u64,
    /// Last modification time, when the platform reports one.
    pub modified: Option<SystemTime>,
    /// The entry is (or, for followed symlinks, resolves to) a directory.
    pub is_directory: bool,
    /// The entry itself is a symbolic link.
    pub is_symlink: bool,
    /// The first bytes of the file look binary.
    pub is_binary: bool,
    /// Raw permission bits (`st_mode` on Unix, `0o444`/`0o666` elsewhere).
    pub permissions: u32,
}

impl FileInfo {
    /// Builds a `FileInfo` from `lstat`-style metadata.
    pub fn from_metadata(path: impl Into<String>, metadata: &Metadata) -> Self {
        let mut info = Self {
            path: path.into(),
            is_symlink: metadata.file_type().is_symlink(),
            ..Default::default()
        };
        info.refresh_from(metadata);
        info
    }

    /// Refreshes the directory flag, size, mtime and mode from `metadata`.
    ///
    /// Used after resolving a followed symlink; `is_symlink` is left untouched.
    pub fn refresh_from(&mut self, metadata: &Metadata) {
        self.is_directory = metadata.is_dir();
        self.size = metadata.len();
        self.modified = metadata.modified().ok();
        self.permissions = permission_bits(metadata);
    }

    /// Last path component.
    pub fn basename(&self) -> &str {
        basename(&self.path)
    }

    /// Size in KiB, rounded up.
    pub fn size_kib(&self) -> u64 {
        self.size.div_ceil(1024)
    }
}

/// Last `/`-separated component of a relative path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode()
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o666
    }
}

/// Kind of entry reported to traversal callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    /// A directory the walk will try to descend into.
    Directory,
    /// Anything else: regular files, unfollowed symlinks, devices.
    File,
}

impl EntryKind {
    /// Classifies an entry from its info.
    pub fn of(info: &FileInfo) -> Self {
        if info.is_directory {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }
}

/// Totals accumulated over one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    /// Entries seen by the content walk that were files.
    pub total_files: usize,
    /// Files whose content was written.
    pub processed_files: usize,
    /// Files dropped by content filters, size limits or read failures.
    pub skipped_files: usize,
    /// Directories listed by the structure walk.
    pub directories: usize,
    /// Raw bytes read from included files.
    pub processed_bytes: u64,
    /// Bytes written after the transform chain.
    pub filtered_bytes: u64,
    /// Warnings reported through the processing context.
    pub warnings: usize,
    /// Errors reported through the processing context.
    pub errors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basename_of_nested_and_flat_paths() {
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("c.txt"), "c.txt");
        assert_eq!(basename(""), "");
    }

    #[test]
    fn test_size_kib_rounds_up() {
        let mut info = FileInfo::default();
        assert_eq!(info.size_kib(), 0);
        info.size = 1;
        assert_eq!(info.size_kib(), 1);
        info.size = 1024;
        assert_eq!(info.size_kib(), 1);
        info.size = 1025;
        assert_eq!(info.size_kib(), 2);
    }

    #[test]
    fn test_from_metadata_reads_flags() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("f.txt");
        std::fs::write(&file, "12345")?;

        let info = FileInfo::from_metadata("f.txt", &std::fs::symlink_metadata(&file)?);
        assert_eq!(info.size, 5);
        assert!(!info.is_directory);
        assert!(!info.is_symlink);
        assert_eq!(EntryKind::of(&info), EntryKind::File);

        let dir_info = FileInfo::from_metadata("", &std::fs::symlink_metadata(temp.path())?);
        assert_eq!(EntryKind::of(&dir_info), EntryKind::Directory);
        Ok(())
    }
}
