//! Low-level fsync operations for durability.
//!
//! These functions ensure data is persisted to disk before returning. Both
//! file and directory fsyncs are required for crash safety: renaming a file
//! updates the directory entry, and without a directory fsync that entry may
//! not survive a power loss even if the file contents were synced.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory to disk, ensuring directory entries are durable.
///
/// Without this, a renamed file might revert to its old name after a crash.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
