//! Limit-change reconciliation.
//!
//! Only `remaining` is persisted; usage is derived as `limit - remaining`
//! against the limit that `remaining` was last computed for. A limit edit
//! keeps that usage fixed and re-derives `remaining` from the new limit.

/// Seconds already used today under `basis_limit`.
pub fn elapsed_seconds(basis_limit: i64, remaining: i64) -> i64 {
    (basis_limit - remaining).max(0)
}

/// Remaining seconds after the limit moves from `basis_limit` to `new_limit`.
///
/// The result is always within `[0, new_limit]` for a non-negative new limit.
pub fn reconcile_remaining(basis_limit: i64, remaining: i64, new_limit: i64) -> i64 {
    let elapsed = elapsed_seconds(basis_limit, remaining);
    (new_limit - elapsed).clamp(0, new_limit.max(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowering_below_usage_exhausts_the_budget() {
        assert_eq!(reconcile_remaining(3600, 1000, 2000), 0);
    }

    #[test]
    fn raising_keeps_usage_and_extends_remaining() {
        assert_eq!(reconcile_remaining(3600, 1000, 4000), 1400);
    }

    #[test]
    fn lowering_above_usage_keeps_usage() {
        assert_eq!(reconcile_remaining(3600, 3000, 1800), 1200);
    }

    #[test]
    fn unchanged_limit_is_a_no_op() {
        assert_eq!(reconcile_remaining(5400, 321, 5400), 321);
    }

    #[test]
    fn remaining_above_basis_never_credits_extra_time() {
        assert_eq!(elapsed_seconds(600, 900), 0);
        assert_eq!(reconcile_remaining(600, 900, 300), 300);
    }

    #[test]
    fn negative_remaining_counts_as_overspend() {
        assert_eq!(elapsed_seconds(600, -5), 605);
        assert_eq!(reconcile_remaining(600, -5, 1200), 595);
    }

    #[test]
    fn successive_edits_derive_usage_from_the_persisted_remaining() {
        let after_first = reconcile_remaining(3600, 1000, 2000);
        let after_second = reconcile_remaining(2000, after_first, 4000);
        assert_eq!(after_second, 2000);
    }
}
