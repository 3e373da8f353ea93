//! In-memory registry used by tests and as the development default.
//!
//! Holds builds, channel attachments, subscriptions, and repository
//! installations behind a mutex. Channel attachments are append-only, matching
//! the real registry's semantics.

use std::collections::HashMap;
use std::sync::Mutex;

use super::{BuildRegistry, RegistryError};
use crate::types::{Build, BuildId, ChannelId, Subscription, SubscriptionId};

#[derive(Debug, Default)]
struct Inner {
    builds: HashMap<BuildId, Build>,
    /// Append-only (build, channel) attachments.
    attachments: Vec<(BuildId, ChannelId)>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    /// Repositories with a valid app installation.
    installations: HashMap<String, u64>,
}

/// A mutex-guarded registry holding all records in memory.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    inner: Mutex<Inner>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_build(&self, build: Build) {
        self.lock().builds.insert(build.id, build);
    }

    /// Attaches a build to a channel. Append-only; attaching twice is a no-op
    /// at query time (the latest-build query deduplicates by build).
    pub fn attach_build_to_channel(&self, build: BuildId, channel: ChannelId) {
        self.lock().attachments.push((build, channel));
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.lock()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn remove_subscription(&self, id: SubscriptionId) {
        self.lock().subscriptions.remove(&id);
    }

    pub fn add_installation(&self, repository: impl Into<String>, installation: u64) {
        self.lock()
            .installations
            .insert(repository.into(), installation);
    }

    /// Test helper: reads back a subscription's last applied build.
    pub fn last_applied_build(&self, id: SubscriptionId) -> Option<BuildId> {
        self.lock()
            .subscriptions
            .get(&id)
            .and_then(|s| s.last_applied_build)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl BuildRegistry for InMemoryRegistry {
    async fn build(&self, id: BuildId) -> Result<Build, RegistryError> {
        self.lock()
            .builds
            .get(&id)
            .cloned()
            .ok_or(RegistryError::BuildNotFound(id))
    }

    async fn subscription(
        &self,
        id: SubscriptionId,
    ) -> Result<Option<Subscription>, RegistryError> {
        Ok(self.lock().subscriptions.get(&id).cloned())
    }

    async fn enabled_subscriptions(&self) -> Result<Vec<Subscription>, RegistryError> {
        let mut subs: Vec<_> = self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        Ok(subs)
    }

    async fn subscriptions_for_channel(
        &self,
        channel: ChannelId,
        source_repository: &str,
    ) -> Result<Vec<Subscription>, RegistryError> {
        let mut subs: Vec<_> = self
            .lock()
            .subscriptions
            .values()
            .filter(|s| {
                s.enabled && s.channel_id == channel && s.source_repository == source_repository
            })
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        Ok(subs)
    }

    async fn latest_build_for_channel(
        &self,
        channel: ChannelId,
        source_repository: &str,
    ) -> Result<Option<Build>, RegistryError> {
        let inner = self.lock();
        let latest = inner
            .attachments
            .iter()
            .filter(|(_, c)| *c == channel)
            .filter_map(|(b, _)| inner.builds.get(b))
            .filter(|b| b.repository == source_repository)
            .max_by_key(|b| b.date_produced)
            .cloned();
        Ok(latest)
    }

    async fn installation_for_repository(
        &self,
        repository: &str,
    ) -> Result<Option<u64>, RegistryError> {
        Ok(self.lock().installations.get(repository).copied())
    }

    async fn set_last_applied_build(
        &self,
        subscription: SubscriptionId,
        build: BuildId,
    ) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        match inner.subscriptions.get_mut(&subscription) {
            Some(sub) => {
                sub.last_applied_build = Some(build);
                Ok(())
            }
            None => Err(RegistryError::SubscriptionNotFound(subscription)),
        }
    }
}
