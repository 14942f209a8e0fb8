//! Validation for limits entered by configuration surfaces.
//!
//! Rejection happens before anything touches the store, so an invalid edit
//! leaves both the store and the tracker unchanged.

use crate::error::{BudgetError, Result};
use crate::store::{BudgetPatch, BudgetStore};

/// Accepts `1..=max_seconds`.
pub fn validate_daily_limit(seconds: i64, max_seconds: i64) -> Result<i64> {
    if seconds <= 0 {
        return Err(BudgetError::InvalidLimit(seconds));
    }
    if seconds > max_seconds {
        return Err(BudgetError::LimitTooLarge {
            requested: seconds,
            max: max_seconds,
        });
    }
    Ok(seconds)
}

/// Parses a whole number of minutes as typed into a limit field.
pub fn parse_minutes(input: &str) -> Result<i64> {
    let minutes = input
        .trim()
        .parse::<i64>()
        .map_err(|_| BudgetError::MalformedLimit(input.to_string()))?;
    minutes
        .checked_mul(60)
        .ok_or_else(|| BudgetError::MalformedLimit(input.to_string()))
}

/// Writes a new daily limit.
///
/// This only writes the limit key. The tracker sees the edit through the
/// store's change notification and reconciles `remaining` itself.
pub fn set_daily_limit<S: BudgetStore + ?Sized>(
    store: &S,
    seconds: i64,
    max_seconds: i64,
) -> Result<i64> {
    let seconds = validate_daily_limit(seconds, max_seconds)?;
    store.apply(&BudgetPatch::daily_limit(seconds))?;
    tracing::info!(daily_limit_seconds = seconds, "Daily limit written");
    Ok(seconds)
}
