//! Applying a build to a subscription: the create-or-update operation.
//!
//! Exactly one pull request per subscription is in flight at any time. If
//! none is tracked, a new PR is opened and inserted into the durable store.
//! If one is tracked, its content is replaced with the newer build's assets
//! and the tracked `build_id` is overwritten in place; the PR accumulates no
//! memory of the builds it previously carried.
//!
//! Every apply attempt is recorded in the action history, success or failure,
//! so a failed attempt can be retried through the API later.

use crate::history::{ActionScope, RetryableAction};
use crate::registry::BuildRegistry;
use crate::remote::{CreatePullRequest, RemoteOperations, UpdatePullRequest};
use crate::service::{DependencyFlow, FlowError, Result};
use crate::types::{AssetUpdate, Build, InFlightPullRequest, Subscription, SubscriptionId};

/// The PR title for an applied build.
pub fn pull_request_title(build: &Build) -> String {
    format!(
        "Update dependencies from build {} of {}",
        build.build_number, build.repository
    )
}

/// The PR description: one line per propagated asset.
pub fn pull_request_description(build: &Build, assets: &[AssetUpdate]) -> String {
    let mut body = format!(
        "This pull request updates the following dependencies from build {} of {} (commit {}):\n\n",
        build.build_number, build.repository, build.commit
    );
    for asset in assets {
        body.push_str(&format!("- {} - {}\n", asset.name, asset.version));
    }
    body
}

impl<R, B> DependencyFlow<R, B>
where
    R: RemoteOperations,
    B: BuildRegistry,
{
    /// Applies `build` to the subscription's target: opens a new dependency
    /// update PR, or re-points the tracked one at this build.
    ///
    /// Idempotent: if the tracked PR already carries this build, nothing is
    /// done. The outcome is recorded in the action history before returning,
    /// except for the no-op case.
    #[tracing::instrument(skip(self, build), fields(subscription = %id, build = %build.id))]
    pub async fn apply_build(&self, id: SubscriptionId, build: &Build) -> Result<()> {
        let lock = self.subscription_lock(id);
        let _guard = lock.lock().await;

        // Skip before recording anything: a repeated delivery of the same
        // build is routine, not an action.
        if let Some(url) = self.store().pull_request_for(id) {
            if let Some(record) = self.store().get(&url) {
                if record.build_id == build.id {
                    tracing::debug!(subscription = %id, build = %build.id, "build already applied");
                    return Ok(());
                }
            }
        }

        let scope = ActionScope::Subscription { id };
        let action = RetryableAction::ApplyBuild {
            subscription_id: id,
            build_id: build.id,
        };

        match self.apply_build_inner(id, build).await {
            Ok(()) => {
                self.history().record(scope, action, true, None)?;
                Ok(())
            }
            Err(e) => {
                self.history()
                    .record(scope, action, false, Some(e.to_string()))?;
                Err(e)
            }
        }
    }

    async fn apply_build_inner(&self, id: SubscriptionId, build: &Build) -> Result<()> {
        let subscription = self
            .registry()
            .subscription(id)
            .await?
            .ok_or(FlowError::SubscriptionNotFound(id))?;

        // No installation means no way to act on the target. Recorded as a
        // failed action; no PR is opened.
        if self
            .registry()
            .installation_for_repository(&subscription.target_repository)
            .await?
            .is_none()
        {
            return Err(FlowError::MissingInstallation {
                repository: subscription.target_repository,
            });
        }

        let assets = AssetUpdate::from_build(build);
        let title = pull_request_title(build);
        let description = pull_request_description(build, &assets);

        match self.store().pull_request_for(id) {
            Some(url) => {
                self.update_existing(&subscription, &url, build, assets, title, description)
                    .await
            }
            None => {
                self.open_new(&subscription, build, assets, title, description)
                    .await
            }
        }
    }

    async fn open_new(
        &self,
        subscription: &Subscription,
        build: &Build,
        assets: Vec<AssetUpdate>,
        title: String,
        description: String,
    ) -> Result<()> {
        let url = self
            .remote()
            .create_pull_request(CreatePullRequest {
                target_repository: subscription.target_repository.clone(),
                target_branch: subscription.target_branch.clone(),
                source_commit: build.commit.clone(),
                assets,
                base_branch: None,
                title: Some(title),
                description: Some(description),
            })
            .await?;

        tracing::info!(
            subscription = %subscription.id,
            build = %build.id,
            pr = %url,
            "opened dependency update pull request"
        );

        self.store().transaction(|tx| {
            tx.insert_pull_request(
                url,
                InFlightPullRequest {
                    build_id: build.id,
                    subscription_id: subscription.id,
                },
            )
        })?;
        Ok(())
    }

    async fn update_existing(
        &self,
        subscription: &Subscription,
        url: &crate::types::PrUrl,
        build: &Build,
        assets: Vec<AssetUpdate>,
        title: String,
        description: String,
    ) -> Result<()> {
        self.remote()
            .update_pull_request(
                url,
                UpdatePullRequest {
                    target_repository: subscription.target_repository.clone(),
                    target_branch: subscription.target_branch.clone(),
                    source_commit: build.commit.clone(),
                    assets,
                    title: Some(title),
                    description: Some(description),
                },
            )
            .await?;

        tracing::info!(
            subscription = %subscription.id,
            build = %build.id,
            pr = %url,
            "updated in-flight pull request to newer build"
        );

        self.store().transaction(|tx| tx.set_build(url, build.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_with_assets, subscription, test_flow};
    use crate::types::{BuildId, ChannelId, UpdateFrequency};

    #[test]
    fn title_names_build_and_source() {
        let build = build_with_assets(7, "https://github.com/src/repo", &[]);
        assert_eq!(
            pull_request_title(&build),
            format!(
                "Update dependencies from build {} of https://github.com/src/repo",
                build.build_number
            )
        );
    }

    #[test]
    fn description_lists_each_asset() {
        let build = build_with_assets(
            7,
            "https://github.com/src/repo",
            &[("Foo.Bar", "1.2.3"), ("Baz", "2.0.0")],
        );
        let assets = AssetUpdate::from_build(&build);
        let body = pull_request_description(&build, &assets);
        assert!(body.contains("- Foo.Bar - 1.2.3"));
        assert!(body.contains("- Baz - 2.0.0"));
        assert!(body.contains(&build.commit));
    }

    #[tokio::test]
    async fn first_apply_opens_a_pull_request() {
        let (_dir, flow) = test_flow();
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let build = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        flow.registry().add_subscription(sub);
        flow.registry().add_installation("https://github.com/target/repo", 42);

        flow.apply_build(SubscriptionId(1), &build).await.unwrap();

        assert_eq!(flow.remote().created().len(), 1);
        let url = flow.store().pull_request_for(SubscriptionId(1)).unwrap();
        assert_eq!(flow.store().get(&url).unwrap().build_id, BuildId(10));

        let entries = flow
            .history()
            .entries_for(&ActionScope::Subscription {
                id: SubscriptionId(1),
            });
        assert_eq!(entries.len(), 1);
        assert!(entries[0].success);
    }

    #[tokio::test]
    async fn newer_build_updates_in_place() {
        let (_dir, flow) = test_flow();
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let old = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        let new = build_with_assets(11, &sub.source_repository, &[("Foo", "2.0")]);
        flow.registry().add_subscription(sub);
        flow.registry().add_installation("https://github.com/target/repo", 42);

        flow.apply_build(SubscriptionId(1), &old).await.unwrap();
        let url = flow.store().pull_request_for(SubscriptionId(1)).unwrap();

        flow.apply_build(SubscriptionId(1), &new).await.unwrap();

        // Same PR, overwritten build.
        assert_eq!(flow.remote().created().len(), 1);
        assert_eq!(flow.remote().updated().len(), 1);
        assert_eq!(flow.store().pull_request_for(SubscriptionId(1)), Some(url.clone()));
        assert_eq!(flow.store().get(&url).unwrap().build_id, BuildId(11));
        assert_eq!(flow.store().len(), 1);
    }

    #[tokio::test]
    async fn reapplying_same_build_is_a_no_op() {
        let (_dir, flow) = test_flow();
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let build = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        flow.registry().add_subscription(sub);
        flow.registry().add_installation("https://github.com/target/repo", 42);

        flow.apply_build(SubscriptionId(1), &build).await.unwrap();
        flow.apply_build(SubscriptionId(1), &build).await.unwrap();

        assert_eq!(flow.remote().created().len(), 1);
        assert_eq!(flow.remote().updated().len(), 0);
        assert_eq!(flow.store().len(), 1);
    }

    #[tokio::test]
    async fn missing_installation_records_failure_without_a_pr() {
        let (_dir, flow) = test_flow();
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let build = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        flow.registry().add_subscription(sub);
        // No installation registered for the target.

        let err = flow.apply_build(SubscriptionId(1), &build).await.unwrap_err();
        assert!(matches!(err, FlowError::MissingInstallation { .. }));

        assert!(flow.remote().created().is_empty());
        assert!(flow.store().is_empty());

        let entries = flow
            .history()
            .entries_for(&ActionScope::Subscription {
                id: SubscriptionId(1),
            });
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert!(entries[0].error_message.as_deref().unwrap().contains("installation"));
    }

    #[tokio::test]
    async fn remote_failure_is_recorded_and_retryable() {
        let (_dir, flow) = test_flow();
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let build = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        flow.registry().add_subscription(sub);
        flow.registry().add_installation("https://github.com/target/repo", 42);
        flow.registry().add_build(build.clone());
        flow.remote().fail_next_create("host is down");

        let err = flow.apply_build(SubscriptionId(1), &build).await.unwrap_err();
        assert!(matches!(err, FlowError::Remote(_)));
        assert!(flow.store().is_empty());

        let scope = ActionScope::Subscription {
            id: SubscriptionId(1),
        };
        let entries = flow.history().entries_for(&scope);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);

        // Retry through the history entry succeeds once the host recovers.
        flow.retry_action(&scope, entries[0].recorded_at)
            .await
            .unwrap();
        assert_eq!(flow.store().len(), 1);

        let entries = flow.history().entries_for(&scope);
        assert_eq!(entries.len(), 2);
        assert!(entries[1].success);
    }

    #[tokio::test]
    async fn retry_of_succeeded_action_is_rejected() {
        let (_dir, flow) = test_flow();
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let build = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        flow.registry().add_subscription(sub);
        flow.registry().add_installation("https://github.com/target/repo", 42);
        flow.registry().add_build(build.clone());

        flow.apply_build(SubscriptionId(1), &build).await.unwrap();

        let scope = ActionScope::Subscription {
            id: SubscriptionId(1),
        };
        let recorded_at = flow.history().entries_for(&scope)[0].recorded_at;
        let err = flow.retry_action(&scope, recorded_at).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::History(crate::history::HistoryError::NotRetryable { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_applies_serialize_to_one_pull_request() {
        use std::sync::Arc;

        let (_dir, flow) = test_flow();
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let build = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        flow.registry().add_subscription(sub);
        flow.registry().add_installation("https://github.com/target/repo", 42);

        let flow = Arc::new(flow);
        let first = tokio::spawn({
            let flow = Arc::clone(&flow);
            let build = build.clone();
            async move { flow.apply_build(SubscriptionId(1), &build).await }
        });
        let second = tokio::spawn({
            let flow = Arc::clone(&flow);
            let build = build.clone();
            async move { flow.apply_build(SubscriptionId(1), &build).await }
        });
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        // The second apply waits on the subscription lock and then observes
        // the same build already tracked, so exactly one PR exists.
        assert_eq!(flow.remote().created().len(), 1);
        assert_eq!(flow.remote().updated().len(), 0);
        assert_eq!(flow.store().len(), 1);
        assert!(flow.store().pull_request_for(SubscriptionId(1)).is_some());
    }

    #[tokio::test]
    async fn missing_subscription_fails() {
        let (_dir, flow) = test_flow();
        let build = build_with_assets(10, "https://github.com/src/repo", &[]);

        let err = flow.apply_build(SubscriptionId(9), &build).await.unwrap_err();
        assert!(matches!(err, FlowError::SubscriptionNotFound(_)));
    }
}
