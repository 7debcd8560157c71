//! External LLM provider implementations.
//!
//! One non-streaming request per call. OpenAI and Groq share the chat
//! completions format; Gemini and Anthropic each have their own. Provider
//! answers are mapped onto [`OracleError`] classes so the client can decide
//! whether to retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use veille_core::{Error, Result};

use crate::config::OracleConfig;
use crate::oracle::Oracle;
use crate::types::{OracleError, Provider};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE: &str = "https://api.openai.com/v1";
const GROQ_BASE: &str = "https://api.groq.com/openai/v1";
const ANTHROPIC_BASE: &str = "https://api.anthropic.com/v1";

/// Gemini finish reasons that mean the answer was withheld by policy.
const GEMINI_BLOCK_REASONS: &[&str] = &["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII", "RECITATION"];

/// Longest provider error body kept in an error message.
const ERROR_BODY_LIMIT: usize = 500;

/// HTTP oracle backed by one provider, rotating over its API keys.
pub struct HttpOracle {
    client: Client,
    provider: Provider,
    model: String,
    api_keys: Vec<String>,
    next_key: AtomicUsize,
    base_url: String,
    temperature: f64,
    max_tokens: usize,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig) -> Result<Self> {
        if config.api_keys.is_empty() {
            return Err(Error::Config(format!(
                "no API key for provider {} (set one of {})",
                config.provider,
                config.provider.key_env_vars().join(", ")
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base(config.provider).to_string());

        Ok(Self {
            client,
            provider: config.provider,
            model: config.model().to_string(),
            api_keys: config.api_keys.clone(),
            next_key: AtomicUsize::new(0),
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn next_api_key(&self) -> &str {
        let index = self.next_key.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        &self.api_keys[index]
    }

    async fn complete_gemini(&self, prompt: &str) -> std::result::Result<String, OracleError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
                "responseMimeType": "application/json",
            },
        });
        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.next_api_key())
            .json(&body);
        let parsed = send(request, &url).await?;
        extract_gemini_text(&parsed)
    }

    async fn complete_openai_compat(
        &self,
        prompt: &str,
    ) -> std::result::Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        });
        let request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.next_api_key()))
            .json(&body);
        let parsed = send(request, &url).await?;
        extract_openai_text(&parsed)
    }

    async fn complete_anthropic(&self, prompt: &str) -> std::result::Result<String, OracleError> {
        let url = format!("{}/messages", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.next_api_key())
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        let parsed = send(request, &url).await?;
        extract_anthropic_text(&parsed)
    }
}

impl Oracle for HttpOracle {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, OracleError> {
        debug!(
            "Calling {} model {} ({} prompt chars)",
            self.provider,
            self.model,
            prompt.len()
        );
        match self.provider {
            Provider::Gemini => self.complete_gemini(prompt).await,
            Provider::OpenAI | Provider::Groq => self.complete_openai_compat(prompt).await,
            Provider::Anthropic => self.complete_anthropic(prompt).await,
        }
    }
}

fn default_base(provider: Provider) -> &'static str {
    match provider {
        Provider::Gemini => GEMINI_BASE,
        Provider::OpenAI => OPENAI_BASE,
        Provider::Groq => GROQ_BASE,
        Provider::Anthropic => ANTHROPIC_BASE,
    }
}

/// Send a request and return the parsed JSON body of a successful answer.
async fn send(
    request: reqwest::RequestBuilder,
    url: &str,
) -> std::result::Result<Value, OracleError> {
    let response = request
        .send()
        .await
        .map_err(|e| OracleError::Transient(format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let error = classify_failure(status, retry_after, &body);
        warn!("Provider answered {}: {}", status, error);
        return Err(error);
    }

    let text = response
        .text()
        .await
        .map_err(|e| OracleError::Transient(format!("reading response body: {}", e)))?;
    serde_json::from_str(&text)
        .map_err(|e| OracleError::Malformed(format!("provider body is not JSON: {}", e)))
}

/// Map a non-success HTTP answer onto an error class.
pub fn classify_failure(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> OracleError {
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let hint = retry_after.or_else(|| {
            serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| gemini_retry_delay(&v))
        });
        return OracleError::RateLimited { retry_after: hint };
    }
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return OracleError::Transient(format!("API error {}: {}", status, snippet));
    }
    OracleError::Rejected(format!("API error {}: {}", status, snippet))
}

/// `Retry-After` as delta-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?;
    hint_from_secs(raw.trim().parse().ok()?)
}

/// Gemini puts its hint in `error.details[].retryDelay`, e.g. `"17s"`.
pub fn gemini_retry_delay(body: &Value) -> Option<Duration> {
    body["error"]["details"]
        .as_array()?
        .iter()
        .filter_map(|detail| detail["retryDelay"].as_str())
        .find_map(|raw| hint_from_secs(raw.trim().trim_end_matches('s').parse().ok()?))
}

/// Negative, NaN and out-of-range values are no hint at all.
fn hint_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

pub fn extract_gemini_text(body: &Value) -> std::result::Result<String, OracleError> {
    if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
        return Err(OracleError::Blocked(format!("prompt blocked: {}", reason)));
    }
    let candidate = match body["candidates"].as_array().and_then(|c| c.first()) {
        Some(candidate) => candidate,
        None => return Err(OracleError::Empty),
    };
    if let Some(reason) = candidate["finishReason"].as_str() {
        if GEMINI_BLOCK_REASONS.contains(&reason) {
            return Err(OracleError::Blocked(format!("finish reason {}", reason)));
        }
    }
    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();
    non_empty(text)
}

pub fn extract_openai_text(body: &Value) -> std::result::Result<String, OracleError> {
    let choice = &body["choices"][0];
    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(OracleError::Blocked("content_filter".into()));
    }
    if let Some(refusal) = choice["message"]["refusal"].as_str() {
        return Err(OracleError::Blocked(format!("refusal: {}", refusal)));
    }
    non_empty(choice["message"]["content"].as_str().unwrap_or_default().to_string())
}

pub fn extract_anthropic_text(body: &Value) -> std::result::Result<String, OracleError> {
    if body["stop_reason"].as_str() == Some("refusal") {
        return Err(OracleError::Blocked("refusal".into()));
    }
    let text: String = body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect()
        })
        .unwrap_or_default();
    non_empty(text)
}

fn non_empty(text: String) -> std::result::Result<String, OracleError> {
    if text.trim().is_empty() {
        Err(OracleError::Empty)
    } else {
        Ok(text)
    }
}
