//! Remote operations against the source-control host.
//!
//! The flow engine consumes pull request lifecycle operations through the
//! [`RemoteOperations`] trait so the core stays provider-agnostic and
//! testable with mock implementations. The octocrab-backed implementation
//! lives in [`github`].
//!
//! Remote calls are treated as slow and fallible: every operation returns a
//! [`RemoteError`] categorized as transient or permanent, and transient
//! failures are retried with exponential backoff inside the implementation.

pub mod error;
pub mod github;
pub mod retry;

use std::future::Future;

pub use error::{RemoteError, RemoteErrorKind};
pub use github::OctocrabRemote;
pub use retry::{retry_with_backoff, RetryConfig};

use crate::types::{AssetUpdate, PrCheck, PrStatus, PrUrl};

/// A request to open a dependency update pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePullRequest {
    /// The repository the PR is opened in.
    pub target_repository: String,

    /// The branch the PR targets.
    pub target_branch: String,

    /// The commit the propagated assets were built from.
    pub source_commit: String,

    /// The dependency updates the PR carries.
    pub assets: Vec<AssetUpdate>,

    /// Optional override for the branch the update branch is cut from.
    /// Defaults to `target_branch`.
    pub base_branch: Option<String>,

    pub title: Option<String>,

    pub description: Option<String>,
}

/// A request to re-point an existing pull request at a newer set of assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePullRequest {
    pub target_repository: String,
    pub target_branch: String,
    pub source_commit: String,
    pub assets: Vec<AssetUpdate>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Options for merging a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOptions {
    pub commit_message: Option<String>,
    pub squash: bool,
    pub delete_source_branch: bool,
}

/// Pull request lifecycle operations on the source-control host.
///
/// Implementations handle transport, authentication, and retry of transient
/// failures. All operations are keyed by PR URL after creation, matching the
/// durable store's key.
pub trait RemoteOperations: Send + Sync {
    /// Opens a PR carrying the given asset updates; returns its URL.
    fn create_pull_request(
        &self,
        request: CreatePullRequest,
    ) -> impl Future<Output = Result<PrUrl, RemoteError>> + Send;

    /// Replaces the content of an existing PR with a new asset list.
    fn update_pull_request(
        &self,
        url: &PrUrl,
        request: UpdatePullRequest,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Reports whether the PR is open, merged, or closed.
    fn get_pull_request_status(
        &self,
        url: &PrUrl,
    ) -> impl Future<Output = Result<PrStatus, RemoteError>> + Send;

    /// Returns the check results for the PR's head commit.
    fn get_pull_request_checks(
        &self,
        url: &PrUrl,
    ) -> impl Future<Output = Result<Vec<PrCheck>, RemoteError>> + Send;

    /// Merges an open PR.
    fn merge_pull_request(
        &self,
        url: &PrUrl,
        options: MergeOptions,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}
