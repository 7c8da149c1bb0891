//! Loop configuration loaded from defaults or environment variables.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const GA4Q_RETRY_BUDGET_ENV: &str = "GA4Q_RETRY_BUDGET";
pub const GA4Q_METADATA_TIMEOUT_SECS_ENV: &str = "GA4Q_METADATA_TIMEOUT_SECS";
pub const GA4Q_REPAIR_TIMEOUT_SECS_ENV: &str = "GA4Q_REPAIR_TIMEOUT_SECS";
pub const GA4Q_ADS_GATING_ENV: &str = "GA4Q_ADS_GATING";

pub const DEFAULT_RETRY_BUDGET: u32 = 1;
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_REPAIR_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No LLM provider configured. Set OPENAI_API_KEY or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },
}

/// Knobs for `QueryValidator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Repair attempts allowed when a request does not carry its own budget.
    pub retry_budget: u32,
    /// `None` waits forever.
    pub metadata_timeout: Option<Duration>,
    /// `None` waits forever.
    pub repair_timeout: Option<Duration>,
    /// Reject ads-scoped metrics on properties without an ads link.
    pub ads_gating: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            retry_budget: DEFAULT_RETRY_BUDGET,
            metadata_timeout: Some(Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS)),
            repair_timeout: Some(Duration::from_secs(DEFAULT_REPAIR_TIMEOUT_SECS)),
            ads_gating: false,
        }
    }
}

impl GuardConfig {
    /// Load from process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| match std::env::var(name) {
            Ok(v) => Ok(Some(v)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(ConfigError::Invalid(format!("failed to read {name}: {e}"))),
        })
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let defaults = Self::default();

        let retry_budget = match non_empty(lookup(GA4Q_RETRY_BUDGET_ENV)?) {
            Some(v) => v.parse::<u32>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "invalid {GA4Q_RETRY_BUDGET_ENV}={v:?} (expected non-negative integer)"
                ))
            })?,
            None => defaults.retry_budget,
        };

        let metadata_timeout = timeout_from(
            GA4Q_METADATA_TIMEOUT_SECS_ENV,
            lookup(GA4Q_METADATA_TIMEOUT_SECS_ENV)?,
            DEFAULT_METADATA_TIMEOUT_SECS,
        )?;
        let repair_timeout = timeout_from(
            GA4Q_REPAIR_TIMEOUT_SECS_ENV,
            lookup(GA4Q_REPAIR_TIMEOUT_SECS_ENV)?,
            DEFAULT_REPAIR_TIMEOUT_SECS,
        )?;

        let ads_gating = match non_empty(lookup(GA4Q_ADS_GATING_ENV)?) {
            Some(v) => parse_flag(GA4Q_ADS_GATING_ENV, &v)?,
            None => defaults.ads_gating,
        };

        Ok(Self {
            retry_budget,
            metadata_timeout,
            repair_timeout,
            ads_gating,
        })
    }

    pub fn with_retry_budget(mut self, budget: u32) -> Self {
        self.retry_budget = budget;
        self
    }

    pub fn with_ads_gating(mut self, enabled: bool) -> Self {
        self.ads_gating = enabled;
        self
    }

    pub fn with_timeouts(mut self, metadata: Option<Duration>, repair: Option<Duration>) -> Self {
        self.metadata_timeout = metadata;
        self.repair_timeout = repair;
        self
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// `0` disables the timeout.
fn timeout_from(
    name: &str,
    raw: Option<String>,
    default_secs: u64,
) -> Result<Option<Duration>, ConfigError> {
    let secs = match non_empty(raw) {
        Some(v) => v.parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid {name}={v:?} (expected integer seconds; 0 disables)"
            ))
        })?,
        None => default_secs,
    };
    Ok(if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    })
}

fn parse_flag(name: &str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "invalid {name}={v:?} (expected true/false)"
        ))),
    }
}
