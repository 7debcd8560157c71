//! Provider identifiers and the oracle error taxonomy.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// LLM provider identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    OpenAI,
    Anthropic,
    Groq,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Groq => "groq",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-2.0-flash",
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-haiku-20241022",
            Provider::Groq => "llama-3.3-70b-versatile",
        }
    }

    /// Environment variables consulted, in order, when no key is configured.
    pub fn key_env_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            Provider::OpenAI => &["OPENAI_API_KEY"],
            Provider::Anthropic => &["ANTHROPIC_API_KEY"],
            Provider::Groq => &["GROQ_API_KEY"],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            "groq" => Ok(Provider::Groq),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Failure of one oracle call, or of a whole retried call sequence.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    /// Provider quota hit; `retry_after` is the provider's own hint, if any.
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Empty response")]
    Empty,

    /// The answer could not be decoded into the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The provider's content policy refused the prompt. Not retried.
    #[error("Blocked by content policy: {0}")]
    Blocked(String),

    /// Authentication, quota-less 4xx or bad request. Not retried.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<OracleError>,
    },
}

impl OracleError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::RateLimited { .. }
                | OracleError::Transient(_)
                | OracleError::Empty
                | OracleError::Malformed(_)
        )
    }

    pub fn is_blocked(&self) -> bool {
        match self {
            OracleError::Blocked(_) => true,
            OracleError::Exhausted { last, .. } => last.is_blocked(),
            _ => false,
        }
    }
}
