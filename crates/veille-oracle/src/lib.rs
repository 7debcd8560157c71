//! Classification oracle client.
//!
//! One non-deterministic `prompt -> text` call, wrapped with a fair permit
//! pool, a retry policy per error class, and a strict response decoder.
//! Provider calls go to external LLM APIs (Gemini, OpenAI, Anthropic, Groq).

pub mod client;
pub mod config;
pub mod decode;
pub mod oracle;
pub mod providers;
pub mod retry;
pub mod scripted;
pub mod types;

pub use client::OracleClient;
pub use config::OracleConfig;
pub use decode::{decode_classification, strip_code_fence, DecodeError};
pub use oracle::Oracle;
pub use providers::HttpOracle;
pub use retry::{Attempt, RetryPolicy};
pub use scripted::ScriptedOracle;
pub use types::{OracleError, Provider};
