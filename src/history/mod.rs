//! Append-only action history with externally triggered retry.
//!
//! Every state-changing action the flow engine performs is recorded here:
//! the retryable description of the action, the scope it ran under, when it
//! ran, and whether it succeeded. Entries are never mutated, only appended
//! and read.
//!
//! The log uses JSON Lines format: one JSON object per line. Complete lines
//! are always valid JSON; a partial line from a crash mid-write is detected
//! and skipped on replay. Appends fsync before returning so a recorded
//! action survives a crash.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::fsync::fsync_file;
use crate::types::{BuildId, SubscriptionId};

/// Errors that can occur during history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A retry was requested for an action that already succeeded.
    #[error("action recorded at {recorded_at} for {scope} succeeded and cannot be retried")]
    NotRetryable {
        scope: ActionScope,
        recorded_at: DateTime<Utc>,
    },

    /// No entry close enough to the requested timestamp.
    #[error("no recorded action for {scope} near {requested}")]
    EntryNotFound {
        scope: ActionScope,
        requested: DateTime<Utc>,
    },
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// What a recorded action applied to.
///
/// Tagged so further scopes can be added without breaking recorded entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionScope {
    /// An action on behalf of one subscription.
    Subscription { id: SubscriptionId },
}

impl std::fmt::Display for ActionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionScope::Subscription { id } => write!(f, "{id}"),
        }
    }
}

/// A state-changing action, stored with enough arguments to re-invoke it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RetryableAction {
    /// Apply a build's assets to a subscription's target.
    ApplyBuild {
        subscription_id: SubscriptionId,
        build_id: BuildId,
    },

    /// Re-evaluate merge policy for a subscription's tracked PR.
    CheckMergePolicy { subscription_id: SubscriptionId },
}

impl RetryableAction {
    /// The subscription an action belongs to.
    pub fn subscription_id(&self) -> SubscriptionId {
        match self {
            RetryableAction::ApplyBuild {
                subscription_id, ..
            }
            | RetryableAction::CheckMergePolicy { subscription_id } => *subscription_id,
        }
    }
}

/// One appended record: what ran, where, when, and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEntry {
    pub scope: ActionScope,
    pub action: RetryableAction,
    pub recorded_at: DateTime<Utc>,
    pub success: bool,

    /// Failure detail for unsuccessful entries.
    pub error_message: Option<String>,
}

/// Append-only, crash-safe action history.
pub struct ActionHistory {
    inner: Mutex<Inner>,
    path: PathBuf,
}

struct Inner {
    file: File,
    entries: Vec<ActionEntry>,
}

impl ActionHistory {
    /// Opens the history at `path`, replaying existing entries. A trailing
    /// partial line (crash mid-write) is skipped.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entries = replay(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(ActionHistory {
            inner: Mutex::new(Inner { file, entries }),
            path,
        })
    }

    /// Records an action outcome. The entry is durable when this returns.
    pub fn record(
        &self,
        scope: ActionScope,
        action: RetryableAction,
        success: bool,
        error_message: Option<String>,
    ) -> Result<ActionEntry> {
        let entry = ActionEntry {
            scope,
            action,
            recorded_at: Utc::now(),
            success,
            error_message,
        };

        let json = serde_json::to_string(&entry)?;
        let mut inner = self.lock();
        writeln!(inner.file, "{json}")?;
        fsync_file(&inner.file)?;
        inner.entries.push(entry.clone());
        Ok(entry)
    }

    /// Finds the entry for `scope` closest to `timestamp`, within a five
    /// minute tolerance. Callers retrying from the API pass the timestamp
    /// they observed in the history listing.
    pub fn find_entry(&self, scope: &ActionScope, timestamp: DateTime<Utc>) -> Result<ActionEntry> {
        const TOLERANCE_MINUTES: i64 = 5;

        let inner = self.lock();
        inner
            .entries
            .iter()
            .filter(|e| e.scope == *scope)
            .filter(|e| (e.recorded_at - timestamp).abs() <= Duration::minutes(TOLERANCE_MINUTES))
            .min_by_key(|e| (e.recorded_at - timestamp).abs())
            .cloned()
            .ok_or_else(|| HistoryError::EntryNotFound {
                scope: scope.clone(),
                requested: timestamp,
            })
    }

    /// All entries for a scope, oldest first.
    pub fn entries_for(&self, scope: &ActionScope) -> Vec<ActionEntry> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.scope == *scope)
            .cloned()
            .collect()
    }

    /// Validates that an entry may be retried. A succeeded action cannot be.
    pub fn retryable(&self, entry: &ActionEntry) -> Result<RetryableAction> {
        if entry.success {
            return Err(HistoryError::NotRetryable {
                scope: entry.scope.clone(),
                recorded_at: entry.recorded_at,
            });
        }
        Ok(entry.action.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for ActionHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionHistory")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Replays entries from disk, skipping a trailing partial line.
fn replay(path: &Path) -> Result<Vec<ActionEntry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ActionEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                // A torn final line from a crash mid-write; anything else
                // would have failed to parse on the previous run too.
                tracing::warn!(error = %e, "skipping unparseable action history line");
            }
        }
    }
    Ok(entries)
}
