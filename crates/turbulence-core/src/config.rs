use std::time::Duration;

use serde::Deserialize;

use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::OrchestrationResult;

pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const DISPATCH_TIMEOUT_ENV: &str = "TURBULENCE_DISPATCH_TIMEOUT_SECS";
pub const RESULT_TIMEOUT_ENV: &str = "TURBULENCE_RESULT_TIMEOUT_SECS";
pub const POLL_INTERVAL_ENV: &str = "TURBULENCE_POLL_INTERVAL_MS";

/// Timing knobs shared by the hub, the issuer and the agent pollers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HubConfig {
    /// How long a dispatch waits for the agent to pick its tasks up.
    pub dispatch_timeout: Duration,
    /// Upper bound on waiting for a task result. `None` waits forever.
    pub result_timeout: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            result_timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct HubConfigFile {
    dispatch_timeout_secs: Option<u64>,
    result_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

impl HubConfig {
    pub fn from_json(raw: &str) -> OrchestrationResult<Self> {
        let file: HubConfigFile = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("invalid hub configuration: {error}"),
            )
        })?;

        let defaults = Self::default();
        let config = Self {
            dispatch_timeout: file
                .dispatch_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.dispatch_timeout),
            result_timeout: file.result_timeout_secs.map(Duration::from_secs),
            poll_interval: file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> OrchestrationResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OrchestrationResult<Self> {
        let mut config = Self::default();

        if let Some(secs) = parse_u64(&lookup, DISPATCH_TIMEOUT_ENV)? {
            config.dispatch_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, RESULT_TIMEOUT_ENV)? {
            config.result_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(millis) = parse_u64(&lookup, POLL_INTERVAL_ENV)? {
            config.poll_interval = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OrchestrationResult<()> {
        if self.dispatch_timeout.is_zero() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "dispatch timeout must be greater than zero",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "poll interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> OrchestrationResult<Option<u64>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<u64>().map(Some).map_err(|_| {
        CoreError::new(
            CoreErrorKind::InvalidInput,
            format!("{key} must be a non-negative integer, got '{raw}'"),
        )
    })
}
