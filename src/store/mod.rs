//! Durable state store for in-flight pull requests.
//!
//! The store owns two mappings: `PrUrl -> InFlightPullRequest` and the reverse
//! index `SubscriptionId -> PrUrl`. All mutations happen inside a
//! [`StateStore::transaction`], which stages changes on a copy of the state
//! and makes them durable with one atomic snapshot write. A transaction that
//! fails at any point, including the snapshot write, leaves both the in-memory
//! and on-disk state untouched.
//!
//! # Invariant
//!
//! At most one in-flight pull request exists per subscription at any time.
//! [`Transaction::insert_pull_request`] enforces this by refusing to insert a
//! second PR for a subscription that already has one tracked.
//!
//! Transactions hold an in-process lock for their whole duration, so they must
//! never span a network call; callers read the mapping, perform remote work,
//! then open a fresh transaction to record the result.

pub mod fsync;
pub mod snapshot;

use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

pub use fsync::{fsync_dir, fsync_file};
pub use snapshot::{
    load_snapshot, save_snapshot_atomic, try_load_snapshot, PersistedFlowState, SnapshotError,
    SCHEMA_VERSION,
};

use crate::types::{BuildId, InFlightPullRequest, PrUrl, SubscriptionId};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Persisting the snapshot failed; the transaction was rolled back.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// A second in-flight PR was inserted for a subscription that already
    /// has one tracked.
    #[error("subscription {subscription} already has an in-flight pull request at {url}")]
    AlreadyInFlight {
        subscription: SubscriptionId,
        url: PrUrl,
    },

    /// The PR URL is not tracked in the store.
    #[error("pull request {url} is not tracked")]
    NotTracked { url: PrUrl },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Transactional, crash-durable store for the in-flight PR mappings.
pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedFlowState>,
}

impl StateStore {
    /// Opens the store at `path`, loading the existing snapshot if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = try_load_snapshot(&path)?.unwrap_or_default();
        Ok(StateStore {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns the PR currently tracked for a subscription, if any.
    pub fn pull_request_for(&self, subscription: SubscriptionId) -> Option<PrUrl> {
        self.lock().by_subscription.get(&subscription).cloned()
    }

    /// Returns the tracked record for a PR URL, if any.
    pub fn get(&self, url: &PrUrl) -> Option<InFlightPullRequest> {
        self.lock().pull_requests.get(url).copied()
    }

    /// Returns every tracked PR. The iteration order is unspecified.
    pub fn tracked_pull_requests(&self) -> Vec<(PrUrl, InFlightPullRequest)> {
        self.lock()
            .pull_requests
            .iter()
            .map(|(url, pr)| (url.clone(), *pr))
            .collect()
    }

    /// Number of tracked in-flight PRs.
    pub fn len(&self) -> usize {
        self.lock().pull_requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pull_requests.is_empty()
    }

    /// Runs `f` against a staged copy of the state and commits atomically.
    ///
    /// If `f` returns an error, or the snapshot write fails, nothing becomes
    /// visible: the previous state remains in memory and on disk. On success
    /// the snapshot (both mappings, one document) is durable before the new
    /// state becomes visible to readers.
    pub fn transaction<T>(&self, f: impl FnOnce(&mut Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock();
        let mut staged = guard.clone();
        let mut tx = Transaction { state: &mut staged };

        let value = f(&mut tx)?;

        staged.saved_at = chrono::Utc::now();
        save_snapshot_atomic(&self.path, &staged)?;
        *guard = staged;
        Ok(value)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PersistedFlowState> {
        // A poisoned lock means a panic mid-read; the state itself is only
        // ever replaced wholesale after a durable commit, so it is safe to use.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("path", &self.path)
            .field("tracked", &self.len())
            .finish()
    }
}

/// A staged view of the store's state inside a transaction.
pub struct Transaction<'a> {
    state: &'a mut PersistedFlowState,
}

impl Transaction<'_> {
    /// Returns the PR tracked for a subscription in the staged state.
    pub fn pull_request_for(&self, subscription: SubscriptionId) -> Option<&PrUrl> {
        self.state.by_subscription.get(&subscription)
    }

    /// Inserts a newly opened PR into both mappings.
    ///
    /// Fails with [`StoreError::AlreadyInFlight`] if the subscription already
    /// has a tracked PR under a different URL.
    pub fn insert_pull_request(&mut self, url: PrUrl, record: InFlightPullRequest) -> Result<()> {
        if let Some(existing) = self.state.by_subscription.get(&record.subscription_id) {
            if *existing != url {
                return Err(StoreError::AlreadyInFlight {
                    subscription: record.subscription_id,
                    url: existing.clone(),
                });
            }
        }
        self.state
            .by_subscription
            .insert(record.subscription_id, url.clone());
        self.state.pull_requests.insert(url, record);
        Ok(())
    }

    /// Overwrites the build a tracked PR is carrying. The URL key and the
    /// subscription mapping are unchanged.
    pub fn set_build(&mut self, url: &PrUrl, build: BuildId) -> Result<()> {
        match self.state.pull_requests.get_mut(url) {
            Some(record) => {
                record.build_id = build;
                Ok(())
            }
            None => Err(StoreError::NotTracked { url: url.clone() }),
        }
    }

    /// Removes a PR from both mappings, returning its record.
    pub fn remove_pull_request(&mut self, url: &PrUrl) -> Result<InFlightPullRequest> {
        match self.state.pull_requests.remove(url) {
            Some(record) => {
                self.state.by_subscription.remove(&record.subscription_id);
                Ok(record)
            }
            None => Err(StoreError::NotTracked { url: url.clone() }),
        }
    }
}
