// src/constants.rs

/// Buffer pool tiers as `(buffer size, buffer count)`, smallest first.
pub const POOL_TIERS: [(usize, usize); 3] = [(4096, 20), (16384, 10), (65536, 5)];

/// Maximum directory depth the traversal descends to.
pub const MAX_DEPTH: usize = 256;

/// Files larger than this are skipped by the content walk.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Read chunk for files smaller than [`MEDIUM_FILE_THRESHOLD`].
pub const SMALL_CHUNK_SIZE: usize = 4096;

/// Read chunk for everything else.
pub const LARGE_CHUNK_SIZE: usize = 16384;

/// Files below this size are read with [`SMALL_CHUNK_SIZE`] chunks.
pub const MEDIUM_FILE_THRESHOLD: u64 = 16384;

/// Number of leading bytes scanned for a NUL byte, both when a file is
/// classified during the walk and by the binary rule on content.
pub const BINARY_SCAN_LIMIT: usize = 1024;

/// Placeholder emitted instead of binary content.
pub const BINARY_PLACEHOLDER: &str = "// [Binary file content not displayed]\n";

/// Placeholder emitted for a symbolic link whose target cannot be read.
pub const SYMLINK_UNREADABLE_PLACEHOLDER: &str = "// [Symbolic link - target unreadable]\n";

/// Maximum number of plugins a run may load.
pub const MAX_PLUGINS: usize = 32;

/// Maximum number of raw parameters accepted per plugin.
pub const MAX_PLUGIN_PARAMS: usize = 16;

/// Maximum size in bytes of one plugin's blackboard entry.
pub const PLUGIN_DATA_SIZE: usize = 1024;

/// Initial capacity of a stream buffer created with a zero size hint.
pub const DEFAULT_STREAM_CAPACITY: usize = 1024;

/// Rule priorities of the built-in filters.
pub mod priority {
    /// Excludes the output file from its own snapshot.
    pub const OUTPUT_EXCLUSION: i32 = 200;
    /// User `--exclude` patterns.
    pub const EXCLUDE: i32 = 100;
    /// Binary policy.
    pub const BINARY: i32 = 90;
    /// Symlink policy.
    pub const SYMLINK: i32 = 80;
    /// User `--include` patterns.
    pub const INCLUDE: i32 = 50;
}
