//! Directory traversal.
//!
//! [`walk`] enumerates every entry below a root with an explicit stack of
//! open directories, so native stack usage stays flat however deep the tree
//! is. The two passes of a run are built on it: [`write_structure`] feeds the
//! listing writers and [`write_contents`] streams file bytes through the
//! filter chain into the content writers.

mod content;
mod structure;

pub use content::{chunk_size, write_contents};
pub use structure::write_structure;

use crate::config::SymlinkHandling;
use crate::constants::BINARY_SCAN_LIMIT;
use crate::context::ProcessingContext;
use crate::core_types::{EntryKind, FileInfo};
use crate::errors::{Error, Result};
use crate::filter::contains_nul;
use log::{debug, trace};
use std::collections::HashSet;
use std::fs::{self, File, ReadDir};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// One entry handed to a traversal callback.
#[derive(Debug)]
pub struct Entry<'a> {
    /// Path relative to the root, `/`-separated.
    pub path: &'a str,
    /// Filesystem path used to open the entry.
    pub full_path: &'a Path,
    pub kind: EntryKind,
    pub info: &'a FileInfo,
    /// Depth below the root; the root's children are level 0.
    pub level: usize,
}

/// Identity of a directory on disk, used to break symlink cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DirKey {
    #[cfg_attr(not(unix), allow(dead_code))]
    Inode(u64, u64),
    #[cfg_attr(unix, allow(dead_code))]
    Canonical(PathBuf),
}

#[cfg(unix)]
fn dir_key(_path: &Path, metadata: &fs::Metadata) -> Option<DirKey> {
    use std::os::unix::fs::MetadataExt;
    Some(DirKey::Inode(metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn dir_key(path: &Path, _metadata: &fs::Metadata) -> Option<DirKey> {
    fs::canonicalize(path).ok().map(DirKey::Canonical)
}

/// An open directory on the traversal stack.
struct Frame {
    entries: ReadDir,
    full_path: PathBuf,
    relative: String,
    /// Level of the entries read from this frame.
    level: usize,
    key: Option<DirKey>,
}

/// Walks the tree below `root`, calling `visit` for every included entry.
///
/// Entries are visited depth first, in directory order. A directory is
/// reported before its children. Per-entry failures (vanished files,
/// permission problems, unreadable directories) are logged through `ctx` and
/// skipped. A missing or unreadable root is a warning and an empty walk.
///
/// # Errors
/// Returns the first error produced by `visit`, which stops the walk, or
/// [`Error::OutOfMemory`] when the directory stack cannot grow.
pub fn walk<F>(ctx: &ProcessingContext, root: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Entry<'_>) -> Result<()>,
{
    let root_metadata = match fs::metadata(root) {
        Ok(metadata) => metadata,
        Err(e) => {
            ctx.warning(&format!("Cannot stat {}: {}", root.display(), e));
            return Ok(());
        }
    };
    if !root_metadata.is_dir() {
        ctx.warning(&format!("{} is not a directory", root.display()));
        return Ok(());
    }

    let mut visited: HashSet<DirKey> = HashSet::new();
    let mut stack: Vec<Frame> = Vec::new();
    let root_key = dir_key(root, &root_metadata);
    if let Some(frame) = open_frame(ctx, root, String::new(), 0, root_key)? {
        if let Some(key) = &frame.key {
            visited.insert(key.clone());
        }
        push(&mut stack, frame)?;
    }

    while let Some(frame) = stack.last_mut() {
        let next = match frame.entries.next() {
            Some(next) => next,
            None => {
                if let Some(done) = stack.pop() {
                    trace!("Leaving directory '{}'", done.full_path.display());
                    if let Some(key) = done.key {
                        visited.remove(&key);
                    }
                }
                continue;
            }
        };

        let dirent = match next {
            Ok(dirent) => dirent,
            Err(e) => {
                ctx.warning(&format!(
                    "Cannot read directory entry in {}: {}",
                    frame.full_path.display(),
                    e
                ));
                continue;
            }
        };

        let name = dirent.file_name().to_string_lossy().into_owned();
        let full_path = frame.full_path.join(&name);
        let relative = if frame.relative.is_empty() {
            name
        } else {
            format!("{}/{}", frame.relative, name)
        };
        let level = frame.level;

        let Some(mut info) = inspect(ctx, &full_path, relative) else {
            continue;
        };

        if !ctx.filter().should_include_path(ctx, &info.path, &info) {
            debug!("Excluded '{}'", info.path);
            continue;
        }

        let kind = EntryKind::of(&info);
        if kind == EntryKind::File && (!info.is_symlink || ctx.config().symlink_handling == SymlinkHandling::Follow) {
            info.is_binary = sniff_binary(&full_path);
        }

        ctx.set_current_level(level);
        visit(&Entry {
            path: &info.path,
            full_path: &full_path,
            kind,
            info: &info,
            level,
        })?;

        if kind != EntryKind::Directory {
            continue;
        }

        let child_level = level + 1;
        let max_depth = ctx.config().max_depth;
        if child_level >= max_depth {
            ctx.warning(&format!(
                "Maximum depth {} reached, not descending into {}",
                max_depth, info.path
            ));
            continue;
        }

        let metadata = match fs::metadata(&full_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                ctx.warning(&format!("Cannot stat {}: {}", full_path.display(), e));
                continue;
            }
        };
        let key = dir_key(&full_path, &metadata);
        if let Some(key) = &key {
            if visited.contains(key) {
                ctx.warning(&format!("Skipping circular symlink: {}", info.path));
                continue;
            }
        }

        if let Some(frame) = open_frame(ctx, &full_path, info.path, child_level, key)? {
            if let Some(key) = &frame.key {
                visited.insert(key.clone());
            }
            push(&mut stack, frame)?;
        }
    }

    Ok(())
}

fn push(stack: &mut Vec<Frame>, frame: Frame) -> Result<()> {
    stack
        .try_reserve(1)
        .map_err(|e| Error::OutOfMemory(format!("traversal stack: {}", e)))?;
    stack.push(frame);
    Ok(())
}

/// Opens a directory for reading. Failure is a warning and `None`.
fn open_frame(
    ctx: &ProcessingContext,
    full_path: &Path,
    relative: String,
    level: usize,
    key: Option<DirKey>,
) -> Result<Option<Frame>> {
    match fs::read_dir(full_path) {
        Ok(entries) => {
            trace!("Entering directory '{}' at level {}", full_path.display(), level);
            Ok(Some(Frame {
                entries,
                full_path: full_path.to_path_buf(),
                relative,
                level,
                key,
            }))
        }
        Err(e) => {
            ctx.warning(&format!("Cannot open directory {}: {}", full_path.display(), e));
            Ok(None)
        }
    }
}

/// `lstat`s an entry and, under the follow policy, re-stats a link's target.
fn inspect(ctx: &ProcessingContext, full_path: &Path, relative: String) -> Option<FileInfo> {
    let metadata = match fs::symlink_metadata(full_path) {
        Ok(metadata) => metadata,
        Err(e) => {
            ctx.warning(&describe_stat_failure(full_path, &e));
            return None;
        }
    };

    let mut info = FileInfo::from_metadata(relative, &metadata);
    if info.is_symlink && ctx.config().symlink_handling == SymlinkHandling::Follow {
        match fs::metadata(full_path) {
            Ok(target) => info.refresh_from(&target),
            Err(e) => ctx.warning(&format!(
                "Cannot resolve symlink {}: {}",
                full_path.display(),
                e
            )),
        }
    }
    Some(info)
}

fn describe_stat_failure(path: &Path, e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::NotFound => format!("File disappeared during processing: {}", path.display()),
        io::ErrorKind::PermissionDenied => format!("Permission denied accessing: {}", path.display()),
        _ => format!("Cannot stat {}: {}", path.display(), e),
    }
}

/// Classifies a file with the same NUL test the binary rule applies to content.
fn sniff_binary(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut head = Vec::with_capacity(BINARY_SCAN_LIMIT);
    if file.take(BINARY_SCAN_LIMIT as u64).read_to_end(&mut head).is_err() {
        return false;
    }
    contains_nul(&head)
}
