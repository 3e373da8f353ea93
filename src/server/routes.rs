//! API handlers for triggers, history inspection, and retries.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::history::{ActionScope, HistoryError};
use crate::registry::{BuildRegistry, RegistryError};
use crate::remote::RemoteOperations;
use crate::service::FlowError;
use crate::types::{BuildId, ChannelId, SubscriptionId};

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn error_response(e: &FlowError) -> ApiResponse {
    let status = match e {
        FlowError::SubscriptionNotFound(_) | FlowError::NoBuildInChannel { .. } => {
            StatusCode::NOT_FOUND
        }
        FlowError::Registry(
            RegistryError::BuildNotFound(_) | RegistryError::SubscriptionNotFound(_),
        ) => StatusCode::NOT_FOUND,
        FlowError::History(HistoryError::EntryNotFound { .. }) => StatusCode::NOT_FOUND,
        FlowError::History(HistoryError::NotRetryable { .. }) => StatusCode::CONFLICT,
        FlowError::MissingInstallation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::Remote(_) | FlowError::Registry(RegistryError::Unavailable(_)) => {
            StatusCode::BAD_GATEWAY
        }
        FlowError::Store(_) | FlowError::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

/// `POST /api/v1/channels/{channel}/builds/{build}`
///
/// The registry's notification that a build was attached to a channel.
pub async fn attach_build_handler<R, B>(
    State(state): State<AppState<R, B>>,
    Path((channel, build)): Path<(u64, u64)>,
) -> ApiResponse
where
    R: RemoteOperations + 'static,
    B: BuildRegistry + 'static,
{
    match state
        .flow()
        .on_build_attached(BuildId(build), ChannelId(channel))
        .await
    {
        Ok(summary) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "matched": summary.matched,
                "applied": summary.applied,
                "failed": summary.failed,
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/v1/subscriptions/{id}/trigger`
///
/// Applies the newest eligible build to the subscription, regardless of its
/// update frequency.
pub async fn trigger_subscription_handler<R, B>(
    State(state): State<AppState<R, B>>,
    Path(id): Path<u64>,
) -> ApiResponse
where
    R: RemoteOperations + 'static,
    B: BuildRegistry + 'static,
{
    match state.flow().run_subscription_update(SubscriptionId(id)).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "triggered": true }))),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/v1/subscriptions/{id}/history`
pub async fn history_handler<R, B>(
    State(state): State<AppState<R, B>>,
    Path(id): Path<u64>,
) -> ApiResponse
where
    R: RemoteOperations + 'static,
    B: BuildRegistry + 'static,
{
    let scope = ActionScope::Subscription {
        id: SubscriptionId(id),
    };
    let entries = state.flow().history().entries_for(&scope);
    (StatusCode::OK, Json(json!({ "entries": entries })))
}

/// Body of a retry request: the timestamp shown in the history listing.
#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub recorded_at: DateTime<Utc>,
}

/// `POST /api/v1/subscriptions/{id}/retry`
///
/// Re-runs a previously failed action. Succeeded actions are rejected with
/// 409 Conflict.
pub async fn retry_handler<R, B>(
    State(state): State<AppState<R, B>>,
    Path(id): Path<u64>,
    Json(request): Json<RetryRequest>,
) -> ApiResponse
where
    R: RemoteOperations + 'static,
    B: BuildRegistry + 'static,
{
    let scope = ActionScope::Subscription {
        id: SubscriptionId(id),
    };
    match state.flow().retry_action(&scope, request.recorded_at).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "retried": true }))),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Serialize)]
struct TrackedPr {
    url: String,
    build_id: BuildId,
    subscription_id: SubscriptionId,
}

/// `GET /api/v1/pull-requests`
pub async fn pull_requests_handler<R, B>(State(state): State<AppState<R, B>>) -> ApiResponse
where
    R: RemoteOperations + 'static,
    B: BuildRegistry + 'static,
{
    let mut tracked: Vec<TrackedPr> = state
        .flow()
        .store()
        .tracked_pull_requests()
        .into_iter()
        .map(|(url, record)| TrackedPr {
            url: url.0,
            build_id: record.build_id,
            subscription_id: record.subscription_id,
        })
        .collect();
    tracked.sort_by(|a, b| a.url.cmp(&b.url));
    (
        StatusCode::OK,
        Json(json!({ "pull_requests": tracked })),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::registry::InMemoryRegistry;
    use crate::server::{build_router, AppState};
    use crate::service::DependencyFlow;
    use crate::test_utils::{build_with_assets, subscription, test_flow, MockRemote};
    use crate::types::{BuildId, ChannelId, SubscriptionId, UpdateFrequency};

    fn test_router() -> (
        tempfile::TempDir,
        Arc<DependencyFlow<MockRemote, InMemoryRegistry>>,
        axum::Router,
    ) {
        let (dir, flow) = test_flow();
        let flow = Arc::new(flow);
        let router = build_router(AppState::new(Arc::clone(&flow)));
        (dir, flow, router)
    }

    fn seed_subscription(flow: &DependencyFlow<MockRemote, InMemoryRegistry>) {
        let sub = subscription(1, ChannelId(1), UpdateFrequency::PerBuild);
        let build = build_with_assets(10, &sub.source_repository, &[("Foo", "1.0")]);
        flow.registry().add_subscription(sub);
        flow.registry()
            .add_installation("https://github.com/target/repo", 42);
        flow.registry().add_build(build);
        flow.registry()
            .attach_build_to_channel(BuildId(10), ChannelId(1));
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let (_dir, _flow, router) = test_router();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn attach_endpoint_drives_the_trigger() {
        let (_dir, flow, router) = test_router();
        seed_subscription(&flow);

        let response = router
            .oneshot(
                Request::post("/api/v1/channels/1/builds/10")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["applied"], 1);
        assert!(flow.store().pull_request_for(SubscriptionId(1)).is_some());
    }

    #[tokio::test]
    async fn attach_endpoint_rejects_unknown_build() {
        let (_dir, _flow, router) = test_router();
        let response = router
            .oneshot(
                Request::post("/api/v1/channels/1/builds/99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trigger_endpoint_applies_latest_build() {
        let (_dir, flow, router) = test_router();
        seed_subscription(&flow);

        let response = router
            .oneshot(
                Request::post("/api/v1/subscriptions/1/trigger")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(flow.remote().created().len(), 1);
    }

    #[tokio::test]
    async fn trigger_endpoint_404s_for_unknown_subscription() {
        let (_dir, _flow, router) = test_router();
        let response = router
            .oneshot(
                Request::post("/api/v1/subscriptions/9/trigger")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn history_and_retry_round_trip() {
        let (_dir, flow, router) = test_router();
        seed_subscription(&flow);
        flow.remote().fail_next_create("host is down");

        // First attempt fails and lands in the history.
        flow.on_build_attached(BuildId(10), ChannelId(1))
            .await
            .unwrap();

        let response = router
            .clone()
            .oneshot(
                Request::get("/api/v1/subscriptions/1/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let entries = body["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["success"], false);
        let recorded_at = entries[0]["recorded_at"].clone();

        let response = router
            .oneshot(
                Request::post("/api/v1/subscriptions/1/retry")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({ "recorded_at": recorded_at }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(flow.store().pull_request_for(SubscriptionId(1)).is_some());
    }

    #[tokio::test]
    async fn retry_of_succeeded_action_conflicts() {
        let (_dir, flow, router) = test_router();
        seed_subscription(&flow);
        flow.on_build_attached(BuildId(10), ChannelId(1))
            .await
            .unwrap();

        let scope = crate::history::ActionScope::Subscription {
            id: SubscriptionId(1),
        };
        let recorded_at = flow.history().entries_for(&scope)[0].recorded_at;

        let response = router
            .oneshot(
                Request::post("/api/v1/subscriptions/1/retry")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({ "recorded_at": recorded_at }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn pull_requests_listing_reflects_the_store() {
        let (_dir, flow, router) = test_router();
        seed_subscription(&flow);
        flow.on_build_attached(BuildId(10), ChannelId(1))
            .await
            .unwrap();

        let response = router
            .oneshot(
                Request::get("/api/v1/pull-requests")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let prs = body["pull_requests"].as_array().unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0]["build_id"], 10);
        assert_eq!(prs[0]["subscription_id"], 1);
    }
}
