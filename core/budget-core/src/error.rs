//! Error types for budget-core operations.

use std::path::PathBuf;

/// All errors that can occur in budget-core operations.
///
/// None of these are fatal to the tracker: handlers log them and fall back to
/// the last-known budget.
#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    // ─────────────────────────────────────────────────────────────────────
    // Limit Validation Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Daily limit must be greater than zero, got {0}")]
    InvalidLimit(i64),

    #[error("Daily limit {requested}s exceeds the maximum of {max}s")]
    LimitTooLarge { requested: i64, max: i64 },

    #[error("Daily limit is not a number: {0:?}")]
    MalformedLimit(String),

    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Budget store error: {context}: {details}")]
    Store { context: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl BudgetError {
    pub fn store(context: impl Into<String>, details: impl Into<String>) -> Self {
        BudgetError::Store {
            context: context.into(),
            details: details.into(),
        }
    }

    /// Stable code used by IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            BudgetError::InvalidLimit(_)
            | BudgetError::LimitTooLarge { .. }
            | BudgetError::MalformedLimit(_) => "invalid_limit",
            BudgetError::Store { .. } => "store_error",
            BudgetError::ConfigMalformed { .. } => "config_error",
            BudgetError::HomeDirNotFound | BudgetError::Io { .. } => "io_error",
        }
    }
}

/// Convenience type alias for Results using BudgetError.
pub type Result<T> = std::result::Result<T, BudgetError>;

impl From<BudgetError> for String {
    fn from(err: BudgetError) -> String {
        err.to_string()
    }
}
