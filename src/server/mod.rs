//! HTTP API for the flow engine.
//!
//! The registry notifies the engine of build attachments over this API, and
//! operators use it to inspect tracked pull requests, read a subscription's
//! action history, and retry failed actions.
//!
//! # Endpoints
//!
//! - `POST /api/v1/channels/{channel}/builds/{build}` - a build was attached
//!   to a channel (returns 202 Accepted with a summary)
//! - `POST /api/v1/subscriptions/{id}/trigger` - apply the newest eligible
//!   build to one subscription now
//! - `GET /api/v1/subscriptions/{id}/history` - the subscription's recorded
//!   actions
//! - `POST /api/v1/subscriptions/{id}/retry` - re-run a failed action
//! - `GET /api/v1/pull-requests` - every tracked in-flight pull request
//! - `GET /health` - returns 200 if the server is running

use std::sync::Arc;

pub mod health;
pub mod routes;

pub use health::health_handler;

use crate::registry::BuildRegistry;
use crate::remote::RemoteOperations;
use crate::service::DependencyFlow;

/// Shared application state, passed to handlers via axum's `State` extractor.
pub struct AppState<R, B> {
    flow: Arc<DependencyFlow<R, B>>,
}

impl<R, B> AppState<R, B> {
    pub fn new(flow: Arc<DependencyFlow<R, B>>) -> Self {
        AppState { flow }
    }

    pub fn flow(&self) -> &DependencyFlow<R, B> {
        &self.flow
    }
}

// Derived Clone would bound R and B.
impl<R, B> Clone for AppState<R, B> {
    fn clone(&self) -> Self {
        AppState {
            flow: Arc::clone(&self.flow),
        }
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<R, B>(app_state: AppState<R, B>) -> axum::Router
where
    R: RemoteOperations + 'static,
    B: BuildRegistry + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route(
            "/api/v1/channels/{channel}/builds/{build}",
            post(routes::attach_build_handler),
        )
        .route(
            "/api/v1/subscriptions/{id}/trigger",
            post(routes::trigger_subscription_handler),
        )
        .route(
            "/api/v1/subscriptions/{id}/history",
            get(routes::history_handler),
        )
        .route(
            "/api/v1/subscriptions/{id}/retry",
            post(routes::retry_handler),
        )
        .route("/api/v1/pull-requests", get(routes::pull_requests_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
