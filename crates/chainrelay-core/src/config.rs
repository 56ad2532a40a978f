//! Client configuration, as consumed from a JSON file or built in code.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::fallback::FallbackConfig;
use crate::policy::RetryConfig;

/// Retry knobs exposed to configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl RetrySettings {
    pub fn to_config(self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            ..RetryConfig::default()
        }
    }
}

fn default_read_retry() -> RetrySettings {
    RetrySettings {
        max_retries: 3,
        base_delay_ms: 1000,
    }
}

fn default_submit_retry() -> RetrySettings {
    RetrySettings {
        max_retries: 1,
        base_delay_ms: 250,
    }
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_extra_passes() -> u32 {
    1
}

fn default_nonce_staleness_ms() -> u64 {
    10_000
}

fn default_cost_headers() -> Vec<String> {
    vec!["x-ratelimit-".into(), "x-compute-units".into()]
}

/// Everything the core needs to be built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Endpoint URLs in priority order.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Additional passes over the endpoint list.
    #[serde(default = "default_extra_passes")]
    pub extra_passes: u32,
    /// Per-method cost overrides.
    #[serde(default)]
    pub method_costs: HashMap<String, u32>,
    /// Global cost budget; `None` disables the limiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_per_second: Option<f64>,
    #[serde(default = "default_nonce_staleness_ms")]
    pub nonce_staleness_ms: u64,
    #[serde(default = "default_read_retry")]
    pub read_retry: RetrySettings,
    #[serde(default = "default_submit_retry")]
    pub submit_retry: RetrySettings,
    /// Response header name prefixes passed through to the usage meter.
    #[serde(default = "default_cost_headers")]
    pub cost_headers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            extra_passes: default_extra_passes(),
            method_costs: HashMap::new(),
            budget_per_second: None,
            nonce_staleness_ms: default_nonce_staleness_ms(),
            read_retry: default_read_retry(),
            submit_retry: default_submit_retry(),
            cost_headers: default_cost_headers(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(budget) = self.budget_per_second {
            if !(budget.is_finite() && budget > 0.0) {
                return Err(ConfigError::InvalidBudget(budget));
            }
        }
        if let Some((method, _)) = self.method_costs.iter().find(|(_, c)| **c == 0) {
            return Err(ConfigError::ZeroCost {
                method: method.clone(),
            });
        }
        Ok(())
    }

    pub fn fallback(&self) -> FallbackConfig {
        FallbackConfig {
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            extra_passes: self.extra_passes,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn nonce_staleness(&self) -> Duration {
        Duration::from_millis(self.nonce_staleness_ms)
    }
}
