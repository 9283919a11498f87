//! Durable, rotating, append-only log sink.
//!
//! Provides:
//! - `RotatingLogWriter` - one JSON record per line, rotated by line count and elapsed time
//! - gzip archival of every rotated file under `<log_dir>/archive`

mod archive;
pub mod writer;

pub use writer::{LogWriterConfig, LogWriterError, RotatingLogWriter};

/// Subdirectory of the log directory that holds compressed archives.
pub const ARCHIVE_DIR_NAME: &str = "archive";

/// Suffix appended to a rotated file's name in the archive.
pub const ARCHIVE_SUFFIX: &str = "gz";
