//! Budget commands for display and configuration surfaces.

use budget_core::{parse_minutes, validate_daily_limit, BudgetError};
use serde_json::Value;

use crate::daemon_client;

pub fn status() -> Result<Value, String> {
    daemon_client::get_budget().map_err(|err| err.to_string())
}

/// Validates locally against the configured maximum, then lets the daemon
/// write and reconcile.
pub fn set_limit(minutes: Option<String>, seconds: Option<i64>) -> Result<Value, String> {
    let max = match budget_core::load_config(None) {
        Ok(config) => config.budget.max_daily_limit_seconds,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to load config; using default maximum");
            budget_core::MAX_DAILY_LIMIT_SECONDS
        }
    };
    let seconds = resolve_limit_seconds(minutes.as_deref(), seconds, max)
        .map_err(|err| err.to_string())?;
    tracing::info!(daily_limit_seconds = seconds, "Setting daily limit");
    daemon_client::set_daily_limit(seconds).map_err(|err| err.to_string())
}

pub fn reset() -> Result<Value, String> {
    tracing::info!("Resetting today's budget");
    daemon_client::reset_budget().map_err(|err| err.to_string())
}

pub fn redirects() -> Result<Value, String> {
    let redirects = daemon_client::take_redirects().map_err(|err| err.to_string())?;
    serde_json::to_value(redirects).map_err(|err| format!("Failed to encode redirects: {}", err))
}

pub fn health() -> Value {
    let enabled = daemon_client::daemon_enabled();
    let healthy = if enabled {
        daemon_client::daemon_health().unwrap_or(false)
    } else {
        false
    };
    serde_json::json!({ "enabled": enabled, "healthy": healthy })
}

fn resolve_limit_seconds(
    minutes: Option<&str>,
    seconds: Option<i64>,
    max_seconds: i64,
) -> Result<i64, BudgetError> {
    let seconds = match (minutes, seconds) {
        (Some(minutes), _) => parse_minutes(minutes)?,
        (None, Some(seconds)) => seconds,
        (None, None) => return Err(BudgetError::MalformedLimit(String::new())),
    };
    validate_daily_limit(seconds, max_seconds)
}
