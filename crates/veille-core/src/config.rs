//! Engine configuration: JSON file with serde defaults, then `VEILLE_*` env overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Which taxonomy nodes are offered to the oracle for an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateScope {
    /// Only subcategories of the categories already assigned to the item.
    #[default]
    Assigned,
    /// The full taxonomy; the oracle may also add or drop categories.
    All,
}

impl FromStr for CandidateScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "assigned" => Ok(Self::Assigned),
            "all" => Ok(Self::All),
            other => Err(Error::Config(format!("unknown candidate scope '{}'", other))),
        }
    }
}

/// Reconciliation engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Maximum items claimed per selector call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum items processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Idle wait between claims when nothing is pending.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A `processing` claim older than this is returned to `pending`.
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    /// Delay between starting oracle call #1 and call #2 for one item.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,
    /// Item content longer than this is truncated before prompting.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    /// Maximum subcategories kept per category in an oracle answer.
    #[serde(default = "default_max_subcategories")]
    pub max_subcategories: usize,
    #[serde(default)]
    pub candidate_scope: CandidateScope,
    /// Catch-all subcategory for categories left without a specific one.
    #[serde(default = "default_fallback_subcategory")]
    pub fallback_subcategory: Option<String>,
    /// Directory holding prompt template overrides.
    #[serde(default)]
    pub prompt_dir: Option<PathBuf>,
    /// Directory receiving per-call diagnostic JSON files.
    #[serde(default)]
    pub diagnostics_dir: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/veille.db")
}
fn default_batch_size() -> usize {
    10
}
fn default_workers() -> usize {
    2
}
fn default_poll_interval_ms() -> u64 {
    1000
}
/// Shortest lease accepted from configuration. In-flight items renew their
/// lease every third of it.
pub const MIN_LEASE_TIMEOUT_SECS: u64 = 10;

fn default_lease_timeout_secs() -> u64 {
    1800
}
fn default_stagger_ms() -> u64 {
    1000
}
fn default_max_content_chars() -> usize {
    1_500_000
}
fn default_max_subcategories() -> usize {
    3
}
fn default_fallback_subcategory() -> Option<String> {
    Some("Autres".into())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_timeout_secs: default_lease_timeout_secs(),
            stagger_ms: default_stagger_ms(),
            max_content_chars: default_max_content_chars(),
            max_subcategories: default_max_subcategories(),
            candidate_scope: CandidateScope::default(),
            fallback_subcategory: default_fallback_subcategory(),
            prompt_dir: None,
            diagnostics_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load from an optional JSON file, then apply env overrides.
    ///
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                let config: EngineConfig = serde_json::from_str(&raw)?;
                info!("Loaded engine config from {}", path.display());
                config
            }
            Some(path) => {
                warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `VEILLE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("VEILLE_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(v) = env_parse("VEILLE_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parse("VEILLE_WORKERS") {
            self.workers = v;
        }
        if let Some(v) = env_parse("VEILLE_LEASE_TIMEOUT_SECS") {
            self.lease_timeout_secs = v;
        }
        if let Some(v) = env_parse("VEILLE_CANDIDATE_SCOPE") {
            self.candidate_scope = v;
        }
        if let Ok(dir) = std::env::var("VEILLE_PROMPT_DIR") {
            self.prompt_dir = Some(PathBuf::from(dir));
        }
        if let Ok(dir) = std::env::var("VEILLE_DIAGNOSTICS_DIR") {
            self.diagnostics_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.max_subcategories == 0 {
            return Err(Error::Config("max_subcategories must be at least 1".into()));
        }
        if self.lease_timeout_secs < MIN_LEASE_TIMEOUT_SECS {
            return Err(Error::Config(format!(
                "lease_timeout_secs must be at least {}",
                MIN_LEASE_TIMEOUT_SECS
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparsable {}={}", key, raw);
            None
        }
    }
}
