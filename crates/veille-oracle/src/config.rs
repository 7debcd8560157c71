//! Oracle configuration: provider, model, API keys, and call limits.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::retry::RetryPolicy;
use crate::types::Provider;

/// Stored oracle configuration (oracle.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default)]
    pub provider: Provider,
    /// Model name; the provider default when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// Keys used round-robin, one per request.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Override of the provider API root (proxies, local gateways).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum simultaneous in-flight requests, across all items.
    #[serde(default = "default_permits")]
    pub permits: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base of the exponential rate-limit backoff, and the fixed delay for
    /// other retryable failures.
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
}

fn default_temperature() -> f64 {
    0.2
}
fn default_max_tokens() -> usize {
    2048
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_permits() -> usize {
    3
}
fn default_max_attempts() -> u32 {
    6
}
fn default_base_delay_secs() -> u64 {
    10
}
fn default_max_delay_secs() -> u64 {
    300
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            api_keys: Vec::new(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            permits: default_permits(),
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
        }
    }
}

impl OracleConfig {
    /// Load config from file, falling back to env vars and defaults.
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut config: OracleConfig = match config_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(config) => {
                        info!("Loaded oracle config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        warn!("Ignoring invalid oracle config {}: {}", path.display(), e);
                        OracleConfig::default()
                    }
                },
                Err(_) => OracleConfig::default(),
            },
            None => OracleConfig::default(),
        };
        config.apply_env();
        config
    }

    /// `VEILLE_ORACLE_PROVIDER` / `VEILLE_ORACLE_MODEL` overrides, then the
    /// provider's key variables when no key is configured. A key variable may
    /// hold a comma-separated list.
    pub fn apply_env(&mut self) {
        if let Ok(raw) = std::env::var("VEILLE_ORACLE_PROVIDER") {
            match raw.parse() {
                Ok(provider) => self.provider = provider,
                Err(e) => warn!("Ignoring VEILLE_ORACLE_PROVIDER: {}", e),
            }
        }
        if let Ok(model) = std::env::var("VEILLE_ORACLE_MODEL") {
            self.model = Some(model);
        }
        if self.api_keys.is_empty() {
            for var in self.provider.key_env_vars() {
                if let Ok(raw) = std::env::var(var) {
                    self.api_keys = split_keys(&raw);
                    if !self.api_keys.is_empty() {
                        break;
                    }
                }
            }
        }
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_secs(self.base_delay_secs),
            fixed_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OracleConfig::default();
        assert_eq!(config.provider, Provider::Gemini);
        assert_eq!(config.model(), "gemini-2.0-flash");
        assert_eq!(config.permits, 3);
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.base_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.json");
        std::fs::write(
            &path,
            r#"{"provider": "anthropic", "api_keys": ["k1", "k2"], "permits": 5}"#,
        )
        .unwrap();
        let config = OracleConfig::load(Some(&path));
        assert_eq!(config.provider, Provider::Anthropic);
        assert_eq!(config.model(), "claude-3-5-haiku-20241022");
        assert_eq!(config.api_keys, vec!["k1", "k2"]);
        assert_eq!(config.permits, 5);
        assert_eq!(config.max_attempts, 6);
    }

    #[test]
    fn test_split_keys() {
        assert_eq!(split_keys(" a, b ,,c"), vec!["a", "b", "c"]);
        assert!(split_keys("  ").is_empty());
    }
}
