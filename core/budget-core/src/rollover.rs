//! Day-boundary detection.
//!
//! The check is cheap and idempotent: once the reset for today has been
//! persisted, every further check the same day reports [`Rollover::Current`].

use crate::clock::DayId;
use crate::store::BudgetPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollover {
    Current,
    Reset { from: DayId, to: DayId },
}

/// Compares the day the budget belongs to with today.
///
/// Any difference resets, including a clock that moved backwards across
/// midnight; the budget is only ever valid for the day the clock reports.
pub fn check_rollover(budget_day: DayId, today: DayId) -> Rollover {
    if budget_day == today {
        Rollover::Current
    } else {
        Rollover::Reset {
            from: budget_day,
            to: today,
        }
    }
}

/// Write that starts `today` with a full budget.
pub fn reset_patch(daily_limit_seconds: i64, today: DayId) -> BudgetPatch {
    BudgetPatch::remaining(daily_limit_seconds).with_current_day(today)
}
