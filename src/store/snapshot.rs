//! On-disk snapshot of the durable flow state.
//!
//! The whole state (both pull request mappings) is written as one JSON
//! document using a write-to-temp-then-rename pattern:
//!
//! 1. Write to `<path>.tmp`
//! 2. fsync the file
//! 3. Rename to `<path>`
//! 4. fsync the directory
//!
//! Readers always see either the old or new snapshot, never a partial write.
//! Because both mappings live in the same document, a commit of the PR-URL
//! mapping and the reverse subscription index is atomic by construction.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};
use crate::types::{InFlightPullRequest, PrUrl, SubscriptionId};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// The persisted durable state: both pull request mappings plus metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedFlowState {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// When this snapshot was last written.
    pub saved_at: DateTime<Utc>,

    /// In-flight pull requests, keyed by PR URL.
    pub pull_requests: HashMap<PrUrl, InFlightPullRequest>,

    /// Reverse index: which PR (if any) a subscription currently has open.
    pub by_subscription: HashMap<SubscriptionId, PrUrl>,
}

impl PersistedFlowState {
    pub fn new() -> Self {
        PersistedFlowState {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            pull_requests: HashMap::new(),
            by_subscription: HashMap::new(),
        }
    }
}

impl Default for PersistedFlowState {
    fn default() -> Self {
        Self::new()
    }
}

/// Saves a snapshot atomically to disk.
pub fn save_snapshot_atomic(path: &Path, snapshot: &PersistedFlowState) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(snapshot)?;

    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }

    Ok(())
}

/// Loads a snapshot from disk.
pub fn load_snapshot(path: &Path) -> Result<PersistedFlowState> {
    let bytes = std::fs::read(path)?;
    let snapshot: PersistedFlowState = serde_json::from_slice(&bytes)?;

    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }

    Ok(snapshot)
}

/// Attempts to load a snapshot, returning None if the file doesn't exist.
///
/// Other errors (malformed JSON, schema mismatch) are propagated.
pub fn try_load_snapshot(path: &Path) -> Result<Option<PersistedFlowState>> {
    match load_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
