//! Shared test fixtures: an in-process remote host and record builders.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::history::ActionHistory;
use crate::registry::InMemoryRegistry;
use crate::remote::{
    CreatePullRequest, MergeOptions, RemoteError, RemoteOperations, UpdatePullRequest,
};
use crate::service::DependencyFlow;
use crate::store::StateStore;
use crate::types::{
    Asset, AssetLocation, Build, BuildId, ChannelId, LocationType, MergePolicy, PrCheck, PrStatus,
    PrUrl, Subscription, SubscriptionId, UpdateFrequency,
};

/// A scriptable remote host. Records every call; tests script statuses,
/// checks, and injected failures.
#[derive(Debug, Default)]
pub struct MockRemote {
    inner: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    next_number: u64,
    created: Vec<CreatePullRequest>,
    updated: Vec<(PrUrl, UpdatePullRequest)>,
    merged: Vec<PrUrl>,
    statuses: HashMap<PrUrl, PrStatus>,
    checks: HashMap<PrUrl, Vec<PrCheck>>,
    fail_next_create: Option<String>,
    fail_next_merge: Option<String>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<CreatePullRequest> {
        self.lock().created.clone()
    }

    pub fn updated(&self) -> Vec<(PrUrl, UpdatePullRequest)> {
        self.lock().updated.clone()
    }

    pub fn merged(&self) -> Vec<PrUrl> {
        self.lock().merged.clone()
    }

    pub fn set_status(&self, url: &PrUrl, status: PrStatus) {
        self.lock().statuses.insert(url.clone(), status);
    }

    pub fn set_checks(&self, url: &PrUrl, checks: Vec<PrCheck>) {
        self.lock().checks.insert(url.clone(), checks);
    }

    /// The next create call fails with a transient error.
    pub fn fail_next_create(&self, message: &str) {
        self.lock().fail_next_create = Some(message.to_string());
    }

    /// The next merge call fails with a transient error.
    pub fn fail_next_merge(&self, message: &str) {
        self.lock().fail_next_merge = Some(message.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RemoteOperations for MockRemote {
    async fn create_pull_request(
        &self,
        request: CreatePullRequest,
    ) -> Result<PrUrl, RemoteError> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_create.take() {
            return Err(RemoteError::transient(message));
        }
        state.next_number += 1;
        let url = PrUrl::new(format!(
            "{}/pull/{}",
            request.target_repository, state.next_number
        ));
        state.statuses.insert(url.clone(), PrStatus::Open);
        state.created.push(request);
        Ok(url)
    }

    async fn update_pull_request(
        &self,
        url: &PrUrl,
        request: UpdatePullRequest,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if !state.statuses.contains_key(url) {
            return Err(RemoteError::permanent(format!("unknown pull request {url}")));
        }
        state.updated.push((url.clone(), request));
        Ok(())
    }

    async fn get_pull_request_status(&self, url: &PrUrl) -> Result<PrStatus, RemoteError> {
        self.lock()
            .statuses
            .get(url)
            .copied()
            .ok_or_else(|| RemoteError::permanent(format!("unknown pull request {url}")))
    }

    async fn get_pull_request_checks(&self, url: &PrUrl) -> Result<Vec<PrCheck>, RemoteError> {
        Ok(self.lock().checks.get(url).cloned().unwrap_or_default())
    }

    async fn merge_pull_request(
        &self,
        url: &PrUrl,
        _options: MergeOptions,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock();
        if let Some(message) = state.fail_next_merge.take() {
            return Err(RemoteError::transient(message));
        }
        match state.statuses.get(url) {
            Some(PrStatus::Open) => {
                state.statuses.insert(url.clone(), PrStatus::Merged);
                state.merged.push(url.clone());
                Ok(())
            }
            Some(_) => Err(RemoteError::permanent(format!("{url} is not open"))),
            None => Err(RemoteError::permanent(format!("unknown pull request {url}"))),
        }
    }
}

/// A build with one package-feed asset per `(name, version)` pair.
pub fn build_with_assets(id: u64, repository: &str, assets: &[(&str, &str)]) -> Build {
    Build {
        id: BuildId(id),
        repository: repository.to_string(),
        branch: "main".to_string(),
        commit: format!("{id:040x}"),
        build_number: format!("2024.{id}"),
        date_produced: Utc::now(),
        assets: assets
            .iter()
            .map(|(name, version)| Asset {
                name: (*name).to_string(),
                version: (*version).to_string(),
                locations: vec![AssetLocation {
                    uri: "https://feed.example/index.json".to_string(),
                    location_type: LocationType::PackageFeed,
                }],
            })
            .collect(),
    }
}

/// An enabled subscription from `https://github.com/src/repo` into
/// `https://github.com/target/repo` on `main`, merging when checks are green.
pub fn subscription(id: u64, channel: ChannelId, frequency: UpdateFrequency) -> Subscription {
    Subscription {
        id: SubscriptionId(id),
        source_repository: "https://github.com/src/repo".to_string(),
        target_repository: "https://github.com/target/repo".to_string(),
        target_branch: "main".to_string(),
        channel_id: channel,
        enabled: true,
        update_frequency: frequency,
        merge_policy: MergePolicy::AllChecksSucceeded,
        last_applied_build: None,
    }
}

/// A flow engine over the mock remote and in-memory registry, persisting
/// into a fresh temp directory. Keep the returned `TempDir` alive for the
/// duration of the test.
pub fn test_flow() -> (
    tempfile::TempDir,
    DependencyFlow<MockRemote, InMemoryRegistry>,
) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path().join("state.json")).unwrap();
    let history = ActionHistory::open(dir.path().join("actions.log")).unwrap();
    let flow = DependencyFlow::new(store, history, MockRemote::new(), InMemoryRegistry::new());
    (dir, flow)
}
