use super::{walk, Entry};
use crate::config::SymlinkHandling;
use crate::constants::{LARGE_CHUNK_SIZE, MAX_FILE_SIZE, MEDIUM_FILE_THRESHOLD, SMALL_CHUNK_SIZE};
use crate::context::ProcessingContext;
use crate::core_types::EntryKind;
use crate::errors::Result;
use crate::plugin::{ContentPlugin, FileSession};
use log::{debug, trace};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

/// Read size for a file of `size` bytes.
///
/// Small files are read in one go, the rest in 4 KiB or 16 KiB chunks.
pub fn chunk_size(size: u64) -> usize {
    if size > 0 && size < SMALL_CHUNK_SIZE as u64 {
        size as usize
    } else if size < MEDIUM_FILE_THRESHOLD {
        SMALL_CHUNK_SIZE
    } else {
        LARGE_CHUNK_SIZE
    }
}

/// Second pass: streams every included file through the filter chain and
/// content plugins into the active formatter.
pub fn write_contents(ctx: &ProcessingContext) -> Result<()> {
    let root = ctx.config().input_directory.clone();
    let plugins = ctx.plugins().content_plugins();
    walk(ctx, &root, |entry| {
        if entry.kind == EntryKind::Directory {
            return Ok(());
        }
        process_file(ctx, entry, &plugins)
    })
}

/// A file whose header has been written.
struct OpenFile<'p> {
    sessions: Vec<(&'p ContentPlugin, FileSession)>,
}

fn open_file<'p>(
    ctx: &ProcessingContext,
    entry: &Entry<'_>,
    plugins: &'p [Arc<ContentPlugin>],
) -> Result<OpenFile<'p>> {
    ctx.format().write_file_header(ctx, entry.path)?;
    let sessions = plugins
        .iter()
        .map(|plugin| (plugin.as_ref(), plugin.start_file(ctx, entry.path, entry.info)))
        .collect();
    Ok(OpenFile { sessions })
}

fn close_file(ctx: &ProcessingContext, file: OpenFile<'_>) -> Result<()> {
    let footer = ctx.format().write_file_footer(ctx);
    for (plugin, session) in file.sessions {
        plugin.finish_file(ctx, session);
    }
    footer
}

fn process_file(ctx: &ProcessingContext, entry: &Entry<'_>, plugins: &[Arc<ContentPlugin>]) -> Result<()> {
    ctx.update_stats(|s| s.total_files += 1);

    let size = entry.info.size;
    if size > MAX_FILE_SIZE {
        ctx.warning(&format!(
            "Skipping {}: {} bytes exceeds the {} byte limit",
            entry.path, size, MAX_FILE_SIZE
        ));
        ctx.update_stats(|s| s.skipped_files += 1);
        return Ok(());
    }

    // A placeholder link is never read; its single empty chunk goes through
    // the transform chain, where the symlink rule replaces it.
    let placeholder = entry.info.is_symlink && ctx.config().symlink_handling == SymlinkHandling::Placeholder;
    let mut source = if placeholder {
        None
    } else {
        match File::open(entry.full_path) {
            // A link to a directory under the include policy opens fine but
            // has no bytes to offer.
            Ok(file) if file.metadata().is_ok_and(|m| m.is_dir()) => {
                ctx.warning(&format!("Skipping {}: target is a directory", entry.path));
                ctx.update_stats(|s| s.skipped_files += 1);
                return Ok(());
            }
            Ok(file) => Some(file),
            Err(e) => {
                ctx.warning(&format!("Cannot open {}: {}", entry.full_path.display(), e));
                ctx.update_stats(|s| s.skipped_files += 1);
                return Ok(());
            }
        }
    };

    let mut buffer = ctx.memory().pool().get(chunk_size(size));
    let capacity = chunk_size(size).min(buffer.len());
    let mut open: Option<OpenFile<'_>> = None;
    let mut excluded = false;
    let mut raw_bytes = 0u64;
    let mut written_bytes = 0u64;
    let mut placeholder_pending = placeholder;

    loop {
        let read = match source.as_mut() {
            Some(file) => match read_chunk(file, &mut buffer[..capacity]) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    ctx.warning(&format!("Error reading {}: {}", entry.full_path.display(), e));
                    break;
                }
            },
            None if placeholder_pending => {
                placeholder_pending = false;
                0
            }
            None => break,
        };
        let chunk = &buffer[..read];

        if !ctx.filter().should_include_content(ctx, entry.path, chunk) {
            debug!("Content of '{}' excluded", entry.path);
            excluded = true;
            break;
        }

        let mut data: Cow<'_, [u8]> = ctx.filter().transform_content(ctx, entry.path, chunk);
        if open.is_none() {
            open = Some(open_file(ctx, entry, plugins)?);
        }
        if let Some(file) = &open {
            for (plugin, session) in &file.sessions {
                if let Some(replaced) = plugin.process_chunk(ctx, session, &data) {
                    data = Cow::Owned(replaced);
                }
            }
        }

        ctx.format().write_file_chunk(ctx, &data)?;
        raw_bytes += read as u64;
        written_bytes += data.len() as u64;
    }

    // Empty files still get a header and a footer.
    if open.is_none() && !excluded {
        open = Some(open_file(ctx, entry, plugins)?);
    }
    if let Some(file) = open {
        close_file(ctx, file)?;
    }

    trace!(
        "Finished '{}': {} bytes read, {} bytes written",
        entry.path,
        raw_bytes,
        written_bytes
    );
    ctx.update_stats(|s| {
        if excluded {
            s.skipped_files += 1;
        } else {
            s.processed_files += 1;
        }
        s.processed_bytes += raw_bytes;
        s.filtered_bytes += written_bytes;
    });
    Ok(())
}

/// Fills `buf` unless the file ends first. Returns the bytes read.
fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
