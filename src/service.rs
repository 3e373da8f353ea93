//! The dependency flow engine: wiring and cross-cutting machinery.
//!
//! [`DependencyFlow`] owns the durable state store, the action history, and
//! the two external seams (remote operations, build registry). The operations
//! themselves live in the modules named after them: [`crate::updater`],
//! [`crate::scanner`], [`crate::trigger`], and [`crate::reconciler`] each add
//! an impl block to this struct.
//!
//! All mutating work for a subscription runs under that subscription's lock,
//! so concurrent triggers for the same subscription serialize while distinct
//! subscriptions proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::history::{ActionHistory, ActionScope, HistoryError, RetryableAction};
use crate::registry::{BuildRegistry, RegistryError};
use crate::remote::{RemoteError, RemoteOperations};
use crate::store::{StateStore, StoreError};
use crate::types::SubscriptionId;

/// Errors surfaced by flow engine operations.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("remote operation failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("action history error: {0}")]
    History(#[from] HistoryError),

    /// The target repository has no authorized app installation. The update
    /// is recorded as failed and no pull request is opened.
    #[error("no app installation authorized for repository {repository}")]
    MissingInstallation { repository: String },

    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    /// A channel scan had no build to offer the subscription.
    #[error("channel {channel} has no build from {source_repository}")]
    NoBuildInChannel {
        channel: crate::types::ChannelId,
        source_repository: String,
    },
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// The dependency flow engine.
///
/// Generic over the remote host and registry seams so tests drive it with
/// in-process fakes.
pub struct DependencyFlow<R, B> {
    store: StateStore,
    history: ActionHistory,
    remote: R,
    registry: B,
    locks: Mutex<HashMap<SubscriptionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<R, B> DependencyFlow<R, B> {
    pub fn new(store: StateStore, history: ActionHistory, remote: R, registry: B) -> Self {
        DependencyFlow {
            store,
            history,
            remote,
            registry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn history(&self) -> &ActionHistory {
        &self.history
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn registry(&self) -> &B {
        &self.registry
    }

    /// The serialization lock for one subscription. Locks are created on
    /// first use and never dropped; the map stays small (one entry per
    /// subscription ever touched).
    pub(crate) fn subscription_lock(&self, id: SubscriptionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(id).or_default().clone()
    }
}

impl<R, B> DependencyFlow<R, B>
where
    R: RemoteOperations,
    B: BuildRegistry,
{
    /// Re-runs a previously failed action identified by its scope and the
    /// timestamp shown in the history listing.
    ///
    /// Succeeded actions are rejected with [`HistoryError::NotRetryable`];
    /// there is nothing to re-run and re-running would not be idempotent from
    /// the caller's point of view.
    #[tracing::instrument(skip(self, scope), fields(scope = %scope))]
    pub async fn retry_action(
        &self,
        scope: &ActionScope,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let entry = self.history.find_entry(scope, timestamp)?;
        let action = self.history.retryable(&entry)?;

        tracing::info!(scope = %entry.scope, "retrying recorded action");
        match action {
            RetryableAction::ApplyBuild {
                subscription_id,
                build_id,
            } => {
                let build = self.registry.build(build_id).await?;
                self.apply_build(subscription_id, &build).await
            }
            RetryableAction::CheckMergePolicy { subscription_id } => {
                self.reconcile_subscription(subscription_id).await
            }
        }
    }

    /// Applies the newest eligible build to one subscription, regardless of
    /// its update frequency. The manual kick behind the trigger API.
    pub async fn run_subscription_update(&self, id: SubscriptionId) -> Result<()> {
        let subscription = self
            .registry
            .subscription(id)
            .await?
            .ok_or(FlowError::SubscriptionNotFound(id))?;

        let build = self
            .registry
            .latest_build_for_channel(subscription.channel_id, &subscription.source_repository)
            .await?
            .ok_or_else(|| FlowError::NoBuildInChannel {
                channel: subscription.channel_id,
                source_repository: subscription.source_repository.clone(),
            })?;

        self.apply_build(id, &build).await
    }
}

impl<R, B> std::fmt::Debug for DependencyFlow<R, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyFlow")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
