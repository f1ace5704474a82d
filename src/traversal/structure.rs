use super::walk;
use crate::context::ProcessingContext;
use crate::core_types::EntryKind;
use crate::errors::Result;

/// First pass: lists every included directory and file through the active
/// formatter's listing writers.
pub fn write_structure(ctx: &ProcessingContext) -> Result<()> {
    let root = ctx.config().input_directory.clone();
    walk(ctx, &root, |entry| match entry.kind {
        EntryKind::Directory => {
            ctx.update_stats(|s| s.directories += 1);
            ctx.format().write_directory(ctx, entry.path, entry.level)
        }
        EntryKind::File => ctx
            .format()
            .write_file_entry(ctx, entry.path, entry.info, entry.level),
    })
}
