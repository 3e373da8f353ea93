//! Merge policy evaluation.
//!
//! A pure decision function: given a subscription's configured policy and the
//! observed PR state, decide whether the reconciler should request a merge.
//! Terminal PR states are handled directly by the reconciler and never reach
//! this function in practice, but the evaluator still answers `false` for
//! them rather than panicking.

use crate::types::{CheckState, MergePolicy, PrCheck, PrStatus};

/// Decides whether an in-flight PR should be merged automatically.
///
/// An empty check list means the checks have not been determined yet; nothing
/// with no checks is ever auto-merged. At least one check must exist and all
/// must have succeeded.
pub fn should_merge(policy: MergePolicy, status: PrStatus, checks: &[PrCheck]) -> bool {
    if status != PrStatus::Open {
        return false;
    }
    match policy {
        MergePolicy::Never => false,
        MergePolicy::BuildSucceeded | MergePolicy::AllChecksSucceeded => {
            !checks.is_empty() && checks.iter().all(|c| c.status == CheckState::Succeeded)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn check(status: CheckState) -> PrCheck {
        PrCheck::new("ci", status)
    }

    #[test]
    fn never_policy_never_merges() {
        assert!(!should_merge(MergePolicy::Never, PrStatus::Open, &[]));
        assert!(!should_merge(
            MergePolicy::Never,
            PrStatus::Open,
            &[check(CheckState::Succeeded)]
        ));
    }

    #[test]
    fn empty_checks_are_not_yet_determined() {
        assert!(!should_merge(MergePolicy::BuildSucceeded, PrStatus::Open, &[]));
        assert!(!should_merge(
            MergePolicy::AllChecksSucceeded,
            PrStatus::Open,
            &[]
        ));
    }

    #[test]
    fn all_succeeded_merges() {
        let checks = [check(CheckState::Succeeded), check(CheckState::Succeeded)];
        assert!(should_merge(MergePolicy::BuildSucceeded, PrStatus::Open, &checks));
        assert!(should_merge(
            MergePolicy::AllChecksSucceeded,
            PrStatus::Open,
            &checks
        ));
    }

    #[test]
    fn any_failure_blocks_merge() {
        let checks = [check(CheckState::Succeeded), check(CheckState::Failed)];
        assert!(!should_merge(MergePolicy::BuildSucceeded, PrStatus::Open, &checks));
    }

    #[test]
    fn pending_checks_block_merge() {
        let checks = [check(CheckState::Succeeded), check(CheckState::Pending)];
        assert!(!should_merge(MergePolicy::BuildSucceeded, PrStatus::Open, &checks));
    }

    #[test]
    fn non_open_status_never_merges() {
        let checks = [check(CheckState::Succeeded)];
        assert!(!should_merge(MergePolicy::BuildSucceeded, PrStatus::Merged, &checks));
        assert!(!should_merge(MergePolicy::BuildSucceeded, PrStatus::Closed, &checks));
    }

    fn arb_check() -> impl Strategy<Value = PrCheck> {
        (
            "[a-z]{1,12}",
            prop_oneof![
                Just(CheckState::Succeeded),
                Just(CheckState::Failed),
                Just(CheckState::Pending),
            ],
        )
            .prop_map(|(name, status)| PrCheck::new(name, status))
    }

    proptest! {
        /// The two success-gated policies are behaviorally identical.
        #[test]
        fn build_succeeded_equals_all_checks_succeeded(
            checks in prop::collection::vec(arb_check(), 0..6)
        ) {
            prop_assert_eq!(
                should_merge(MergePolicy::BuildSucceeded, PrStatus::Open, &checks),
                should_merge(MergePolicy::AllChecksSucceeded, PrStatus::Open, &checks)
            );
        }

        /// A merge decision implies a non-empty, fully green check list.
        #[test]
        fn merge_implies_all_green(checks in prop::collection::vec(arb_check(), 0..6)) {
            if should_merge(MergePolicy::BuildSucceeded, PrStatus::Open, &checks) {
                prop_assert!(!checks.is_empty());
                prop_assert!(checks.iter().all(|c| c.status == CheckState::Succeeded));
            }
        }
    }
}
