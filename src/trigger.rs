//! The immediate update path: a build was attached to a channel.
//!
//! Unlike the scanner, this path is driven by the registry notifying the
//! engine at attachment time. Only subscriptions with the per-build frequency
//! react; time-based subscriptions wait for their scan. The staleness check
//! is skipped on purpose, since the notification names the exact build to
//! propagate.

use crate::registry::BuildRegistry;
use crate::remote::RemoteOperations;
use crate::service::{DependencyFlow, Result};
use crate::types::{BuildId, ChannelId, UpdateFrequency};

/// What one attachment notification did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TriggerSummary {
    /// Per-build subscriptions matched to the attachment.
    pub matched: usize,

    pub applied: usize,

    pub failed: usize,
}

impl<R, B> DependencyFlow<R, B>
where
    R: RemoteOperations,
    B: BuildRegistry,
{
    /// Reacts to a build being attached to a channel: applies it to every
    /// enabled per-build subscription listening on that channel for the
    /// build's repository.
    ///
    /// Failures are isolated per subscription and recorded in the action
    /// history by the updater.
    #[tracing::instrument(skip(self), fields(build = %build_id, channel = %channel))]
    pub async fn on_build_attached(
        &self,
        build_id: BuildId,
        channel: ChannelId,
    ) -> Result<TriggerSummary> {
        let build = self.registry().build(build_id).await?;
        let subscriptions = self
            .registry()
            .subscriptions_for_channel(channel, &build.repository)
            .await?;

        let mut summary = TriggerSummary::default();
        for subscription in subscriptions {
            if subscription.update_frequency != UpdateFrequency::PerBuild {
                continue;
            }
            summary.matched += 1;

            match self.apply_build(subscription.id, &build).await {
                Ok(()) => summary.applied += 1,
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        subscription = %subscription.id,
                        build = %build_id,
                        error = %e,
                        "per-build update failed"
                    );
                }
            }
        }

        tracing::info!(
            build = %build_id,
            channel = %channel,
            matched = summary.matched,
            applied = summary.applied,
            failed = summary.failed,
            "processed build attachment"
        );
        Ok(summary)
    }
}
