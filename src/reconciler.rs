//! Reconciling tracked pull requests against the source-control host.
//!
//! The host is the source of truth for PR state; the durable store only
//! remembers which PRs the engine is responsible for. Each reconcile pass
//! polls every tracked PR and converges:
//!
//! - **Merged**: the subscription's last applied build is recorded in the
//!   registry, then the entry is removed from the store. The registry write
//!   comes first so a crash between the two re-runs the idempotent write
//!   rather than losing it.
//! - **Closed**: the entry is removed. A human rejected the update; the next
//!   eligible build opens a fresh PR.
//! - **Open**: the merge policy is evaluated against the head commit's
//!   checks, and the PR is merged when the policy is satisfied. A PR whose
//!   subscription no longer exists is dropped from tracking.
//!
//! Entries are processed independently; one PR's failure leaves it tracked
//! for the next pass and never blocks the rest.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::history::{ActionScope, RetryableAction};
use crate::policy::should_merge;
use crate::registry::{BuildRegistry, RegistryError};
use crate::remote::{MergeOptions, RemoteOperations};
use crate::service::{DependencyFlow, Result};
use crate::types::{InFlightPullRequest, PrStatus, PrUrl, SubscriptionId};

/// What one reconcile pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Tracked PRs examined.
    pub examined: usize,

    /// PRs merged this pass, or observed merged since the last pass.
    pub merged: usize,

    /// Entries dropped for closed PRs or vanished subscriptions.
    pub removed: usize,

    /// PRs that stayed open.
    pub open: usize,

    /// Entries whose reconcile failed; retried next pass.
    pub failed: usize,
}

/// The outcome of reconciling one entry.
enum Outcome {
    Merged,
    Removed,
    StillOpen,
}

impl<R, B> DependencyFlow<R, B>
where
    R: RemoteOperations,
    B: BuildRegistry,
{
    /// Reconciles every tracked pull request once.
    ///
    /// Cancellation is observed between entries: the PR being reconciled
    /// finishes, the rest of the pass is abandoned.
    pub async fn reconcile_all(&self, cancel: &CancellationToken) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for (url, record) in self.store().tracked_pull_requests() {
            if cancel.is_cancelled() {
                tracing::info!("reconcile interrupted by shutdown");
                break;
            }
            summary.examined += 1;
            match self.reconcile_entry(&url, record).await {
                Ok(Outcome::Merged) => summary.merged += 1,
                Ok(Outcome::Removed) => summary.removed += 1,
                Ok(Outcome::StillOpen) => summary.open += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(pr = %url, error = %e, "reconcile failed; will retry next pass");
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            merged = summary.merged,
            removed = summary.removed,
            open = summary.open,
            failed = summary.failed,
            "reconcile pass complete"
        );
        summary
    }

    /// Reconciles the tracked PR for one subscription, if any. The dispatch
    /// target for retried merge-policy actions.
    pub async fn reconcile_subscription(&self, id: SubscriptionId) -> Result<()> {
        let Some(url) = self.store().pull_request_for(id) else {
            return Ok(());
        };
        let Some(record) = self.store().get(&url) else {
            return Ok(());
        };
        self.reconcile_entry(&url, record).await?;
        Ok(())
    }

    async fn reconcile_entry(&self, url: &PrUrl, record: InFlightPullRequest) -> Result<Outcome> {
        let lock = self.subscription_lock(record.subscription_id);
        let _guard = lock.lock().await;

        // The entry may have changed while waiting for the lock; the store
        // record is authoritative for which build the PR carries.
        let Some(record) = self.store().get(url) else {
            return Ok(Outcome::Removed);
        };

        let status = self.remote().get_pull_request_status(url).await?;
        match status {
            PrStatus::Merged => {
                self.finalize_merged(url, record).await?;
                Ok(Outcome::Merged)
            }
            PrStatus::Closed => {
                self.store().transaction(|tx| tx.remove_pull_request(url))?;
                tracing::info!(pr = %url, subscription = %record.subscription_id,
                    "pull request closed without merging; dropped from tracking");
                Ok(Outcome::Removed)
            }
            PrStatus::Open => self.reconcile_open(url, record).await,
        }
    }

    async fn reconcile_open(&self, url: &PrUrl, record: InFlightPullRequest) -> Result<Outcome> {
        let Some(subscription) = self.registry().subscription(record.subscription_id).await?
        else {
            // The subscription was deleted while its PR was in flight. Stop
            // tracking; the PR is left for humans to resolve.
            self.store().transaction(|tx| tx.remove_pull_request(url))?;
            tracing::info!(pr = %url, subscription = %record.subscription_id,
                "subscription no longer exists; dropped pull request from tracking");
            return Ok(Outcome::Removed);
        };

        let checks = self.remote().get_pull_request_checks(url).await?;
        if !should_merge(subscription.merge_policy, PrStatus::Open, &checks) {
            return Ok(Outcome::StillOpen);
        }

        let scope = ActionScope::Subscription {
            id: record.subscription_id,
        };
        let action = RetryableAction::CheckMergePolicy {
            subscription_id: record.subscription_id,
        };

        let merge = self
            .remote()
            .merge_pull_request(
                url,
                MergeOptions {
                    commit_message: None,
                    squash: true,
                    delete_source_branch: true,
                },
            )
            .await;

        match merge {
            Ok(()) => {
                self.history().record(scope, action, true, None)?;
                tracing::info!(pr = %url, subscription = %record.subscription_id,
                    build = %record.build_id, "merge policy satisfied; merged pull request");
                self.finalize_merged(url, record).await?;
                Ok(Outcome::Merged)
            }
            Err(e) => {
                self.history()
                    .record(scope, action, false, Some(e.to_string()))?;
                Err(e.into())
            }
        }
    }

    /// Records the merged build in the registry, then forgets the PR.
    async fn finalize_merged(&self, url: &PrUrl, record: InFlightPullRequest) -> Result<()> {
        match self
            .registry()
            .set_last_applied_build(record.subscription_id, record.build_id)
            .await
        {
            Ok(()) => {}
            // A merged PR for a deleted subscription still gets untracked.
            Err(RegistryError::SubscriptionNotFound(_)) => {
                tracing::warn!(pr = %url, subscription = %record.subscription_id,
                    "merged pull request for deleted subscription");
            }
            Err(e) => return Err(e.into()),
        }

        self.store().transaction(|tx| tx.remove_pull_request(url))?;
        tracing::info!(pr = %url, subscription = %record.subscription_id,
            build = %record.build_id, "recorded merged build and dropped tracking");
        Ok(())
    }
}

/// Runs the reconciler on a fixed interval until cancelled.
pub async fn run_reconciler<R, B>(
    flow: Arc<DependencyFlow<R, B>>,
    interval: Duration,
    cancel: CancellationToken,
) where
    R: RemoteOperations,
    B: BuildRegistry,
{
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("reconciler shutting down");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        flow.reconcile_all(&cancel).await;
    }
}
