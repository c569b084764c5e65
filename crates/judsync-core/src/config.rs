//! Configuration values for the DataJud client and the batch runner.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api-publica.datajud.cnj.jus.br";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid timezone '{0}': expected UTC, Z or an offset like -03:00")]
    InvalidTimezone(String),

    #[error("invalid alias override '{0}': expected TR=alias")]
    InvalidAlias(String),
}

/// Connection settings for the DataJud public API.
#[derive(Debug, Clone)]
pub struct DataJudConfig {
    /// Scheme and host, no trailing slash. The alias and `/_search` are appended.
    pub base_url: String,
    /// Secret API key. Missing or empty blocks every query.
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub app_name: String,
    pub app_version: String,
}

impl Default for DataJudConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            app_name: "judsync".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl DataJudConfig {
    /// The API key, if configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// `User-Agent` header value, `<app>/<version>`.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.app_name, self.app_version)
    }

    /// Search endpoint for a tribunal alias.
    pub fn search_url(&self, alias: &str) -> String {
        format!("{}/{}/_search", self.base_url.trim_end_matches('/'), alias)
    }
}

/// Settings for the unattended reconciliation batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// When false a run logs and returns immediately.
    pub enabled: bool,
    /// Trigger cadence for the external scheduler. Not acted on by the runner.
    pub interval_hours: u32,
    pub interval_minutes: u32,
    /// Minimum age of `last_checked_at` before a case is eligible again.
    pub staleness_days: u32,
    pub max_cases_per_run: usize,
    /// Fixed pause between two consecutive cases.
    pub delay_seconds: u64,
    /// Offset used when rendering run timestamps.
    pub timezone: FixedOffset,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 12,
            interval_minutes: 0,
            staleness_days: 1,
            max_cases_per_run: 10,
            delay_seconds: 5,
            timezone: sao_paulo(),
        }
    }
}

impl BatchConfig {
    /// Interval at which an external trigger should fire runs.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(
            u64::from(self.interval_hours) * 3600 + u64::from(self.interval_minutes) * 60,
        )
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.staleness_days))
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

// America/Sao_Paulo has had no DST since 2019.
fn sao_paulo() -> FixedOffset {
    FixedOffset::west_opt(3 * 3600).unwrap_or_else(utc)
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse `UTC`, `Z`, or a `±HH:MM` offset.
pub fn parse_timezone(s: &str) -> Result<FixedOffset, ConfigError> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("utc") || s == "Z" {
        return Ok(utc());
    }
    s.parse::<FixedOffset>()
        .map_err(|_| ConfigError::InvalidTimezone(s.to_string()))
}
