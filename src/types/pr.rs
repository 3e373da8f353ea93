//! Pull request status types and the durable in-flight record.

use serde::{Deserialize, Serialize};

use super::ids::{BuildId, SubscriptionId};

/// The state of a pull request as reported by the source-control host.
///
/// Only `Open` PRs are ever inserted into the durable store; `Merged` and
/// `Closed` are terminal and cause the tracked entry to be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrStatus {
    Open,
    Merged,
    Closed,
}

impl PrStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, PrStatus::Open)
    }

    /// Returns true if the PR has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PrStatus::Merged | PrStatus::Closed)
    }
}

/// The outcome of one check run on a PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Succeeded,
    Failed,
    Pending,
}

/// A single check reported for a PR's head commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCheck {
    pub name: String,
    pub status: CheckState,
    pub details_url: Option<String>,
}

impl PrCheck {
    pub fn new(name: impl Into<String>, status: CheckState) -> Self {
        PrCheck {
            name: name.into(),
            status,
            details_url: None,
        }
    }
}

/// The durable record of a pull request the engine is responsible for.
///
/// Keyed by `PrUrl` in the state store. The `build_id` is overwritten in
/// place when the same PR is re-targeted at a newer build; the record is
/// removed when the PR reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightPullRequest {
    /// The build whose assets the PR currently carries.
    pub build_id: BuildId,

    /// The subscription the PR was opened for. At most one in-flight PR
    /// exists per subscription at any time.
    pub subscription_id: SubscriptionId,
}
