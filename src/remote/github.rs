//! GitHub-backed implementation of [`RemoteOperations`] using octocrab.
//!
//! Dependency updates are materialized as a JSON manifest committed to a
//! dedicated update branch (`buildflow/<target-branch>`) via the contents
//! API, with one PR per subscription re-pointed at that branch. The generic
//! REST routes are used where octocrab's typed surface doesn't cover an
//! endpoint (git refs, contents, check runs, merge).
//!
//! Transient failures are retried with exponential backoff; permanent
//! failures are returned to the caller for action-history recording.

use base64::Engine;
use serde_json::{json, Value};

use super::error::{RemoteError, RemoteErrorKind};
use super::retry::{retry_with_backoff, RetryConfig};
use super::{CreatePullRequest, MergeOptions, RemoteOperations, UpdatePullRequest};
use crate::types::{AssetUpdate, CheckState, PrCheck, PrStatus, PrUrl};

/// Path of the dependency manifest maintained in target repositories.
const MANIFEST_PATH: &str = "eng/dependency-manifest.json";

/// A GitHub client implementing the remote operations the flow engine needs.
#[derive(Clone)]
pub struct OctocrabRemote {
    client: octocrab::Octocrab,
    retry: RetryConfig,
}

impl OctocrabRemote {
    pub fn new(client: octocrab::Octocrab) -> Self {
        Self {
            client,
            retry: RetryConfig::DEFAULT,
        }
    }

    /// Creates a client from a personal access or installation token.
    pub fn from_token(token: impl Into<String>) -> Result<Self, RemoteError> {
        let client = octocrab::Octocrab::builder()
            .personal_token(token.into())
            .build()
            .map_err(RemoteError::from_octocrab)?;
        Ok(Self::new(client))
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get_json(&self, route: &str) -> Result<Value, RemoteError> {
        self.client
            .get(route, None::<&()>)
            .await
            .map_err(RemoteError::from_octocrab)
    }

    /// GET that treats 404 as `None` rather than an error.
    async fn try_get_json(&self, route: &str) -> Result<Option<Value>, RemoteError> {
        match self.get_json(route).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.status_code == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Creates or force-updates the update branch to point at the head of
    /// `base_branch`, returning the branch name.
    async fn prepare_update_branch(
        &self,
        owner: &str,
        repo: &str,
        target_branch: &str,
        base_branch: &str,
    ) -> Result<String, RemoteError> {
        let base_ref = self
            .get_json(&format!(
                "/repos/{owner}/{repo}/git/ref/heads/{base_branch}"
            ))
            .await?;
        let base_sha = json_str(&base_ref, &["object", "sha"])?;

        let head = update_branch_name(target_branch);
        let create: Result<Value, _> = self
            .client
            .post(
                format!("/repos/{owner}/{repo}/git/refs"),
                Some(&json!({ "ref": format!("refs/heads/{head}"), "sha": base_sha })),
            )
            .await;

        if let Err(e) = create {
            let err = RemoteError::from_octocrab(e);
            // 422 means the ref already exists; reset it to the base head so
            // the manifest commit applies cleanly.
            if err.status_code != Some(422) {
                return Err(err);
            }
            let _: Value = self
                .client
                .patch(
                    format!("/repos/{owner}/{repo}/git/refs/heads/{head}"),
                    Some(&json!({ "sha": base_sha, "force": true })),
                )
                .await
                .map_err(RemoteError::from_octocrab)?;
        }

        Ok(head)
    }

    /// Commits the dependency manifest to `branch` via the contents API.
    async fn commit_manifest(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        assets: &[AssetUpdate],
        message: &str,
    ) -> Result<(), RemoteError> {
        let existing = self
            .try_get_json(&format!(
                "/repos/{owner}/{repo}/contents/{MANIFEST_PATH}?ref={branch}"
            ))
            .await?;
        let existing_sha = existing
            .as_ref()
            .and_then(|v| v.get("sha"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let manifest = serde_json::to_vec_pretty(assets)
            .map_err(|e| RemoteError::permanent(format!("manifest serialization: {e}")))?;
        let content = base64::engine::general_purpose::STANDARD.encode(manifest);

        let mut body = json!({
            "message": message,
            "content": content,
            "branch": branch,
        });
        if let Some(sha) = existing_sha {
            body["sha"] = Value::String(sha);
        }

        let _: Value = self
            .client
            .put(
                format!("/repos/{owner}/{repo}/contents/{MANIFEST_PATH}"),
                Some(&body),
            )
            .await
            .map_err(RemoteError::from_octocrab)?;
        Ok(())
    }

    async fn create_impl(&self, request: &CreatePullRequest) -> Result<PrUrl, RemoteError> {
        let (owner, repo) = parse_repository_url(&request.target_repository)?;
        let base = request
            .base_branch
            .as_deref()
            .unwrap_or(&request.target_branch);

        let head = self
            .prepare_update_branch(&owner, &repo, &request.target_branch, base)
            .await?;
        self.commit_manifest(
            &owner,
            &repo,
            &head,
            &request.assets,
            &commit_message(&request.source_commit),
        )
        .await?;

        let created: Value = self
            .client
            .post(
                format!("/repos/{owner}/{repo}/pulls"),
                Some(&json!({
                    "title": request.title.as_deref().unwrap_or("Update dependencies"),
                    "head": head,
                    "base": request.target_branch,
                    "body": request.description.as_deref().unwrap_or(""),
                })),
            )
            .await
            .map_err(RemoteError::from_octocrab)?;

        let url = json_str(&created, &["html_url"])?;
        Ok(PrUrl::new(url))
    }

    async fn update_impl(
        &self,
        url: &PrUrl,
        request: &UpdatePullRequest,
    ) -> Result<(), RemoteError> {
        let (owner, repo, number) = parse_pull_request_url(url)?;

        // The existing PR keeps its head branch; only its content moves.
        let pull = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{number}"))
            .await?;
        let head = json_str(&pull, &["head", "ref"])?;

        self.commit_manifest(
            &owner,
            &repo,
            &head,
            &request.assets,
            &commit_message(&request.source_commit),
        )
        .await?;

        let mut body = json!({});
        if let Some(title) = &request.title {
            body["title"] = Value::String(title.clone());
        }
        if let Some(description) = &request.description {
            body["body"] = Value::String(description.clone());
        }
        if body.as_object().is_some_and(|o| !o.is_empty()) {
            let _: Value = self
                .client
                .patch(
                    format!("/repos/{owner}/{repo}/pulls/{number}"),
                    Some(&body),
                )
                .await
                .map_err(RemoteError::from_octocrab)?;
        }
        Ok(())
    }

    async fn status_impl(&self, url: &PrUrl) -> Result<PrStatus, RemoteError> {
        let (owner, repo, number) = parse_pull_request_url(url)?;
        let pull = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{number}"))
            .await?;

        if pull.get("merged_at").is_some_and(|v| !v.is_null()) {
            return Ok(PrStatus::Merged);
        }
        match pull.get("state").and_then(Value::as_str) {
            Some("closed") => Ok(PrStatus::Closed),
            _ => Ok(PrStatus::Open),
        }
    }

    async fn checks_impl(&self, url: &PrUrl) -> Result<Vec<PrCheck>, RemoteError> {
        let (owner, repo, number) = parse_pull_request_url(url)?;
        let pull = self
            .get_json(&format!("/repos/{owner}/{repo}/pulls/{number}"))
            .await?;
        let head_sha = json_str(&pull, &["head", "sha"])?;

        let runs = self
            .get_json(&format!(
                "/repos/{owner}/{repo}/commits/{head_sha}/check-runs"
            ))
            .await?;

        let mut checks = Vec::new();
        if let Some(items) = runs.get("check_runs").and_then(Value::as_array) {
            for run in items {
                let name = run
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("unnamed")
                    .to_string();
                let status = check_state(
                    run.get("status").and_then(Value::as_str),
                    run.get("conclusion").and_then(Value::as_str),
                );
                checks.push(PrCheck {
                    name,
                    status,
                    details_url: run
                        .get("details_url")
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                });
            }
        }
        Ok(checks)
    }

    async fn merge_impl(&self, url: &PrUrl, options: &MergeOptions) -> Result<(), RemoteError> {
        let (owner, repo, number) = parse_pull_request_url(url)?;

        let mut body = json!({
            "merge_method": if options.squash { "squash" } else { "merge" },
        });
        if let Some(message) = &options.commit_message {
            body["commit_title"] = Value::String(message.clone());
        }

        let response: Value = self
            .client
            .put(
                format!("/repos/{owner}/{repo}/pulls/{number}/merge"),
                Some(&body),
            )
            .await
            .map_err(RemoteError::from_octocrab)?;

        if !response
            .get("merged")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let reason = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown reason");
            return Err(RemoteError::permanent(format!(
                "merge request returned merged=false: {reason}"
            )));
        }

        if options.delete_source_branch {
            let head = json_str(
                &self
                    .get_json(&format!("/repos/{owner}/{repo}/pulls/{number}"))
                    .await?,
                &["head", "ref"],
            )?;
            // Best effort: a failed branch delete never fails the merge.
            let result: Result<Value, _> = self
                .client
                .delete(
                    format!("/repos/{owner}/{repo}/git/refs/heads/{head}"),
                    None::<&()>,
                )
                .await;
            if let Err(e) = result {
                tracing::warn!(url = %url, error = %e, "failed to delete merged update branch");
            }
        }

        Ok(())
    }
}

impl RemoteOperations for OctocrabRemote {
    async fn create_pull_request(&self, request: CreatePullRequest) -> Result<PrUrl, RemoteError> {
        retry_with_backoff(self.retry, || self.create_impl(&request)).await
    }

    async fn update_pull_request(
        &self,
        url: &PrUrl,
        request: UpdatePullRequest,
    ) -> Result<(), RemoteError> {
        retry_with_backoff(self.retry, || self.update_impl(url, &request)).await
    }

    async fn get_pull_request_status(&self, url: &PrUrl) -> Result<PrStatus, RemoteError> {
        retry_with_backoff(self.retry, || self.status_impl(url)).await
    }

    async fn get_pull_request_checks(&self, url: &PrUrl) -> Result<Vec<PrCheck>, RemoteError> {
        retry_with_backoff(self.retry, || self.checks_impl(url)).await
    }

    async fn merge_pull_request(
        &self,
        url: &PrUrl,
        options: MergeOptions,
    ) -> Result<(), RemoteError> {
        retry_with_backoff(self.retry, || self.merge_impl(url, &options)).await
    }
}

impl std::fmt::Debug for OctocrabRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabRemote").finish_non_exhaustive()
    }
}

/// The branch updates for a given target branch are staged on.
fn update_branch_name(target_branch: &str) -> String {
    format!("buildflow/{target_branch}")
}

fn commit_message(source_commit: &str) -> String {
    format!("Update dependency manifest to {source_commit}")
}

fn check_state(status: Option<&str>, conclusion: Option<&str>) -> CheckState {
    match status {
        Some("completed") => match conclusion {
            Some("success") => CheckState::Succeeded,
            _ => CheckState::Failed,
        },
        _ => CheckState::Pending,
    }
}

/// Parses `owner` and `repo` out of a repository URL like
/// `https://github.com/dotnet/arcade`.
pub fn parse_repository_url(repository: &str) -> Result<(String, String), RemoteError> {
    let parsed = url::Url::parse(repository).map_err(|e| {
        RemoteError::permanent(format!("invalid repository url '{repository}': {e}"))
    })?;
    let mut segments = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()))
        .ok_or_else(|| RemoteError::permanent(format!("repository url has no path: {repository}")))?;

    match (segments.next(), segments.next()) {
        (Some(owner), Some(repo)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(RemoteError::permanent(format!(
            "repository url is not owner/repo shaped: {repository}"
        ))),
    }
}

/// Parses `owner`, `repo` and the PR number out of a pull request URL like
/// `https://github.com/dotnet/arcade/pull/123`.
pub fn parse_pull_request_url(url: &PrUrl) -> Result<(String, String, u64), RemoteError> {
    let parsed = url::Url::parse(url.as_str())
        .map_err(|e| RemoteError::permanent(format!("invalid pull request url '{url}': {e}")))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    match segments.as_slice() {
        [owner, repo, kind, number] if *kind == "pull" || *kind == "pulls" => {
            let number = number.parse().map_err(|_| {
                RemoteError::permanent(format!("pull request url has no numeric id: {url}"))
            })?;
            Ok((owner.to_string(), repo.to_string(), number))
        }
        _ => Err(RemoteError::permanent(format!(
            "unrecognized pull request url: {url}"
        ))),
    }
}

/// Follows `path` through a JSON value, expecting a string leaf.
fn json_str(value: &Value, path: &[&str]) -> Result<String, RemoteError> {
    let mut current = value;
    for key in path {
        current = current.get(key).ok_or_else(|| {
            RemoteError {
                kind: RemoteErrorKind::Permanent,
                status_code: None,
                message: format!("response missing field '{}'", path.join(".")),
                source: None,
            }
        })?;
    }
    current
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| RemoteError::permanent(format!("field '{}' is not a string", path.join("."))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repository_url() {
        let (owner, repo) = parse_repository_url("https://github.com/dotnet/arcade").unwrap();
        assert_eq!(owner, "dotnet");
        assert_eq!(repo, "arcade");
    }

    #[test]
    fn rejects_bare_repository_name() {
        assert!(parse_repository_url("not a url").is_err());
        assert!(parse_repository_url("https://github.com/only-owner").is_err());
    }

    #[test]
    fn parses_pull_request_url() {
        let url = PrUrl::new("https://github.com/dotnet/arcade/pull/123");
        let (owner, repo, number) = parse_pull_request_url(&url).unwrap();
        assert_eq!(owner, "dotnet");
        assert_eq!(repo, "arcade");
        assert_eq!(number, 123);
    }

    #[test]
    fn rejects_non_pr_url() {
        assert!(parse_pull_request_url(&PrUrl::new("https://github.com/dotnet/arcade")).is_err());
        assert!(
            parse_pull_request_url(&PrUrl::new("https://github.com/dotnet/arcade/issues/5"))
                .is_err()
        );
        assert!(
            parse_pull_request_url(&PrUrl::new("https://github.com/dotnet/arcade/pull/abc"))
                .is_err()
        );
    }

    #[test]
    fn check_state_mapping() {
        assert_eq!(
            check_state(Some("completed"), Some("success")),
            CheckState::Succeeded
        );
        assert_eq!(
            check_state(Some("completed"), Some("failure")),
            CheckState::Failed
        );
        assert_eq!(
            check_state(Some("completed"), Some("cancelled")),
            CheckState::Failed
        );
        assert_eq!(check_state(Some("in_progress"), None), CheckState::Pending);
        assert_eq!(check_state(Some("queued"), None), CheckState::Pending);
    }

    #[test]
    fn update_branch_is_per_target_branch() {
        assert_eq!(update_branch_name("main"), "buildflow/main");
        assert_eq!(update_branch_name("release/8.0"), "buildflow/release/8.0");
    }

    #[test]
    fn json_str_follows_nested_path() {
        let v = serde_json::json!({ "head": { "ref": "feature" } });
        assert_eq!(json_str(&v, &["head", "ref"]).unwrap(), "feature");
        assert!(json_str(&v, &["head", "sha"]).is_err());
    }
}
