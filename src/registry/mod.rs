//! The build asset registry seam.
//!
//! Build, channel, subscription, and installation records are owned by an
//! external relational store. The flow engine consumes them through the
//! [`BuildRegistry`] trait and writes back exactly one field:
//! `Subscription::last_applied_build`, via [`BuildRegistry::set_last_applied_build`].

pub mod memory;

use std::future::Future;

use thiserror::Error;

pub use memory::InMemoryRegistry;

use crate::types::{Build, BuildId, ChannelId, Subscription, SubscriptionId};

/// Errors from the relational store.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("build {0} not found")]
    BuildNotFound(BuildId),

    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    /// The store could not be reached; the enclosing cycle is retried at the
    /// next scheduled interval.
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Read access to registry records, plus the single write the engine needs.
pub trait BuildRegistry: Send + Sync {
    /// Loads a build with its assets.
    fn build(&self, id: BuildId) -> impl Future<Output = Result<Build, RegistryError>> + Send;

    /// Loads a subscription, or `None` if it no longer exists.
    fn subscription(
        &self,
        id: SubscriptionId,
    ) -> impl Future<Output = Result<Option<Subscription>, RegistryError>> + Send;

    /// All enabled subscriptions, regardless of frequency.
    fn enabled_subscriptions(
        &self,
    ) -> impl Future<Output = Result<Vec<Subscription>, RegistryError>> + Send;

    /// Enabled subscriptions listening on `channel` whose source repository
    /// matches `source_repository`.
    fn subscriptions_for_channel(
        &self,
        channel: ChannelId,
        source_repository: &str,
    ) -> impl Future<Output = Result<Vec<Subscription>, RegistryError>> + Send;

    /// The most recent build attached to `channel` that was produced from
    /// `source_repository`, or `None` if no such build exists.
    fn latest_build_for_channel(
        &self,
        channel: ChannelId,
        source_repository: &str,
    ) -> impl Future<Output = Result<Option<Build>, RegistryError>> + Send;

    /// The app installation authorized for a target repository, or `None`
    /// if the host requires one and it is missing.
    fn installation_for_repository(
        &self,
        repository: &str,
    ) -> impl Future<Output = Result<Option<u64>, RegistryError>> + Send;

    /// Records the build most recently merged into a subscription's target.
    /// The only write the flow engine performs against the registry.
    fn set_last_applied_build(
        &self,
        subscription: SubscriptionId,
        build: BuildId,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;
}
