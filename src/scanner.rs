//! Periodic subscription scanning for time-based update frequencies.
//!
//! The scanner walks every enabled subscription whose frequency is due at the
//! scan time, finds the newest build its channel offers from the subscription's
//! source repository, and applies it. Subscriptions already at the latest
//! build are skipped. One subscription's failure never blocks the others; it
//! is logged, recorded in the action history by the updater, and the scan
//! moves on.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::registry::BuildRegistry;
use crate::remote::RemoteOperations;
use crate::service::{DependencyFlow, Result};
use crate::types::Subscription;

/// What one scan pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    /// Subscriptions whose frequency was due at the scan time.
    pub due: usize,

    /// Subscriptions a build was applied to.
    pub applied: usize,

    /// Subscriptions skipped as already up to date, or with no build to offer.
    pub skipped: usize,

    /// Subscriptions whose update failed.
    pub failed: usize,
}

impl<R, B> DependencyFlow<R, B>
where
    R: RemoteOperations,
    B: BuildRegistry,
{
    /// Runs one scan pass at `now`.
    ///
    /// Cancellation is observed between subscriptions: a subscription mid
    /// update finishes, the rest of the pass is abandoned.
    pub async fn scan_subscriptions(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let subscriptions = self.registry().enabled_subscriptions().await?;
        let mut summary = ScanSummary::default();

        for subscription in subscriptions {
            if cancel.is_cancelled() {
                tracing::info!("scan interrupted by shutdown");
                break;
            }
            if !subscription.update_frequency.is_due(now) {
                continue;
            }
            summary.due += 1;

            match self.scan_one(&subscription).await {
                Ok(true) => summary.applied += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        subscription = %subscription.id,
                        error = %e,
                        "subscription update failed during scan"
                    );
                }
            }
        }

        tracing::info!(
            due = summary.due,
            applied = summary.applied,
            skipped = summary.skipped,
            failed = summary.failed,
            "subscription scan complete"
        );
        Ok(summary)
    }

    /// Returns `Ok(true)` if a build was applied, `Ok(false)` if the
    /// subscription was already up to date or its channel had nothing to offer.
    async fn scan_one(&self, subscription: &Subscription) -> Result<bool> {
        let Some(build) = self
            .registry()
            .latest_build_for_channel(subscription.channel_id, &subscription.source_repository)
            .await?
        else {
            tracing::debug!(subscription = %subscription.id, "no eligible build in channel");
            return Ok(false);
        };

        // Already merged this build; nothing to propagate.
        if subscription.last_applied_build == Some(build.id) {
            return Ok(false);
        }

        // The in-flight PR already carries this build; the apply would no-op.
        if let Some(url) = self.store().pull_request_for(subscription.id) {
            if self.store().get(&url).map(|r| r.build_id) == Some(build.id) {
                return Ok(false);
            }
        }

        self.apply_build(subscription.id, &build).await?;
        Ok(true)
    }
}

/// Runs the scanner on a fixed interval until cancelled.
///
/// The first scan happens one full interval after startup, giving the process
/// time to settle before doing remote work.
pub async fn run_scanner<R, B>(
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
                tracing::info!("scanner shutting down");
                return;
            }
            () = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = flow.scan_subscriptions(Utc::now(), &cancel).await {
            tracing::error!(error = %e, "subscription scan failed");
        }
    }
}
