//! Configuration loading and well-known paths.
//!
//! Everything lives under `~/.budget-tracker/`:
//! - `config.toml` (optional; missing means defaults)
//! - `daemon.sock`
//! - `daemon/budget.db`
//! - `logs/`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::classifier::DomainClassifier;
use crate::error::{BudgetError, Result};

pub const DEFAULT_DAILY_LIMIT_SECONDS: i64 = 90 * 60;
pub const MAX_DAILY_LIMIT_SECONDS: i64 = 90 * 60;
pub const DEFAULT_BLOCKING_TARGET: &str = "blocked.html";
pub const DEFAULT_ROLLOVER_CHECK_INTERVAL_SECS: u64 = 60;

const BUDGET_DIR_NAME: &str = ".budget-tracker";
const CONFIG_FILE_NAME: &str = "config.toml";
const SOCKET_NAME: &str = "daemon.sock";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub budget: LimitConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub default_daily_limit_seconds: i64,
    pub max_daily_limit_seconds: i64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        LimitConfig {
            default_daily_limit_seconds: DEFAULT_DAILY_LIMIT_SECONDS,
            max_daily_limit_seconds: MAX_DAILY_LIMIT_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub domains: Vec<String>,
    pub blocking_target: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            domains: [
                "youtube.com",
                "instagram.com",
                "netflix.com",
                "tiktok.com",
                "facebook.com",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blocking_target: DEFAULT_BLOCKING_TARGET.to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn classifier(&self) -> DomainClassifier {
        DomainClassifier::new(&self.domains)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub rollover_check_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            rollover_check_interval_secs: DEFAULT_ROLLOVER_CHECK_INTERVAL_SECS,
        }
    }
}

impl BudgetConfig {
    /// Repairs values that would make the budget unusable.
    pub fn normalized(mut self) -> Self {
        let limits = &mut self.budget;
        if limits.max_daily_limit_seconds <= 0 {
            tracing::warn!(
                max = limits.max_daily_limit_seconds,
                "Non-positive max daily limit; using default"
            );
            limits.max_daily_limit_seconds = MAX_DAILY_LIMIT_SECONDS;
        }
        if limits.default_daily_limit_seconds <= 0
            || limits.default_daily_limit_seconds > limits.max_daily_limit_seconds
        {
            let repaired = DEFAULT_DAILY_LIMIT_SECONDS.min(limits.max_daily_limit_seconds);
            tracing::warn!(
                configured = limits.default_daily_limit_seconds,
                repaired,
                "Default daily limit out of range"
            );
            limits.default_daily_limit_seconds = repaired;
        }
        if self.schedule.rollover_check_interval_secs == 0 {
            self.schedule.rollover_check_interval_secs = DEFAULT_ROLLOVER_CHECK_INTERVAL_SECS;
        }
        self
    }
}

/// Returns `~/.budget-tracker`.
pub fn budget_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(BUDGET_DIR_NAME))
        .ok_or(BudgetError::HomeDirNotFound)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(budget_dir()?.join(CONFIG_FILE_NAME))
}

pub fn daemon_socket_path() -> Result<PathBuf> {
    Ok(budget_dir()?.join(SOCKET_NAME))
}

pub fn daemon_db_path() -> Result<PathBuf> {
    Ok(budget_dir()?.join("daemon").join("budget.db"))
}

pub fn log_dir() -> Result<PathBuf> {
    Ok(budget_dir()?.join("logs"))
}

/// Loads the config file, returning defaults if it does not exist.
pub fn load_config(path: Option<PathBuf>) -> Result<BudgetConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(BudgetConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| BudgetError::Io {
        context: format!("reading {}", config_path.display()),
        source,
    })?;
    parse_config(&config_path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<BudgetConfig> {
    toml::from_str::<BudgetConfig>(content)
        .map(BudgetConfig::normalized)
        .map_err(|err| BudgetError::ConfigMalformed {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
}
