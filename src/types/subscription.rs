//! Subscription records: standing rules that a channel's builds flow into a
//! target repository/branch.
//!
//! `last_applied_build` is the only field the flow engine ever mutates, and it
//! is written exactly once per successful merge, by the reconciler.

use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};

use super::ids::{BuildId, ChannelId, SubscriptionId};

/// How often a subscription picks up new builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    /// Update immediately whenever a build is attached to the channel.
    PerBuild,

    /// Update at most once per daily scan.
    Daily,

    /// Update at most once per weekly scan.
    Weekly,

    /// Never update automatically.
    Never,
}

impl UpdateFrequency {
    /// Returns true if this frequency is handled by the periodic scanner
    /// (as opposed to the immediate per-build trigger).
    pub fn is_time_based(&self) -> bool {
        matches!(self, UpdateFrequency::Daily | UpdateFrequency::Weekly)
    }

    /// Returns true if a scan at `now` should consider this subscription.
    ///
    /// Daily subscriptions are due on every scan. Weekly subscriptions are due
    /// only on the Monday scan; since a stale subscription stays stale, a
    /// missed Monday is picked up the following week.
    pub fn is_due(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self {
            UpdateFrequency::Daily => true,
            UpdateFrequency::Weekly => now.weekday() == Weekday::Mon,
            UpdateFrequency::PerBuild | UpdateFrequency::Never => false,
        }
    }
}

/// The rule deciding whether an in-flight PR is merged automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Never merge automatically; a human resolves the PR.
    Never,

    /// Merge once the PR's checks all report success.
    BuildSucceeded,

    /// Merge once every known check has succeeded.
    ///
    /// Evaluates identically to `BuildSucceeded`; the variants differ in
    /// intent and labeling only.
    AllChecksSucceeded,
}

/// A standing rule that builds on a channel flow into a target repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,

    /// Builds from this repository are eligible.
    pub source_repository: String,

    /// The repository receiving dependency update PRs.
    pub target_repository: String,

    /// The branch in the target repository that PRs are opened against.
    pub target_branch: String,

    /// The channel this subscription listens on.
    pub channel_id: ChannelId,

    pub enabled: bool,

    pub update_frequency: UpdateFrequency,

    pub merge_policy: MergePolicy,

    /// The last build successfully merged into the target, if any.
    pub last_applied_build: Option<BuildId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn monday() -> chrono::DateTime<chrono::Utc> {
        // 2024-09-02 was a Monday.
        chrono::Utc.with_ymd_and_hms(2024, 9, 2, 5, 0, 0).unwrap()
    }

    fn tuesday() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc.with_ymd_and_hms(2024, 9, 3, 5, 0, 0).unwrap()
    }

    #[test]
    fn daily_is_always_due() {
        assert!(UpdateFrequency::Daily.is_due(monday()));
        assert!(UpdateFrequency::Daily.is_due(tuesday()));
    }

    #[test]
    fn weekly_is_due_on_monday_only() {
        assert!(UpdateFrequency::Weekly.is_due(monday()));
        assert!(!UpdateFrequency::Weekly.is_due(tuesday()));
    }

    #[test]
    fn per_build_and_never_are_not_scanner_work() {
        assert!(!UpdateFrequency::PerBuild.is_due(monday()));
        assert!(!UpdateFrequency::Never.is_due(monday()));
        assert!(!UpdateFrequency::PerBuild.is_time_based());
        assert!(!UpdateFrequency::Never.is_time_based());
        assert!(UpdateFrequency::Daily.is_time_based());
        assert!(UpdateFrequency::Weekly.is_time_based());
    }

    #[test]
    fn serde_uses_snake_case_tags() {
        assert_eq!(
            serde_json::to_string(&UpdateFrequency::PerBuild).unwrap(),
            "\"per_build\""
        );
        assert_eq!(
            serde_json::to_string(&MergePolicy::AllChecksSucceeded).unwrap(),
            "\"all_checks_succeeded\""
        );
    }
}
