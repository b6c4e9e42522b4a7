//! Language model client used by intent enrichment
//!
//! The pipeline only needs single-prompt completions, so the trait is one
//! method wide. Retries live outside the client in [`retry_with_backoff`]
//! so tests can drive them with a fake clock.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BackoffConfig, Config};
use crate::error::{Error, Result};

pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// One prompt in, the model's text answer out.
    ///
    /// Transport failures and 5xx answers are `LlmUnavailable`; HTTP 429 is
    /// `LlmRateLimited`.
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Anthropic Messages API over a blocking reqwest client.
pub struct HttpLanguageModel {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl HttpLanguageModel {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::LlmUnavailable(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Client configured from `llm.*`, or `None` when `LLM_API_KEY` is unset.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        let Some(api_key) = config.env.llm_api_key.as_deref() else {
            return Ok(None);
        };
        Self::new(
            &config.llm.endpoint,
            &config.llm.model,
            api_key,
            Duration::from_secs(config.llm.request_timeout_secs),
        )
        .map(Some)
    }
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

impl LanguageModel for HttpLanguageModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&serde_json::json!({
                "model": &self.model,
                "max_tokens": 512,
                "messages": [{"role": "user", "content": prompt}]
            }))
            .send()
            .map_err(|e| Error::LlmUnavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::LlmRateLimited(format!("{} from {}", status, self.endpoint)));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::LlmUnavailable(format!("{}: {}", status, body)));
        }

        let api_response: ApiResponse = response
            .json()
            .map_err(|e| Error::LlmUnavailable(format!("unreadable response: {}", e)))?;
        api_response
            .content
            .into_iter()
            .find_map(|c| c.text)
            .ok_or_else(|| Error::LlmUnavailable("empty response".to_string()))
    }
}

/// Exponential backoff: `initial * multiplier^attempt`, capped.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub multiplier: u32,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from(&BackoffConfig::default())
    }
}

impl From<&BackoffConfig> for Backoff {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            initial: Duration::from_secs(config.initial_secs),
            multiplier: config.multiplier.max(1),
            cap: Duration::from_secs(config.cap_secs),
            max_retries: config.max_retries,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

fn is_retryable(error: &Error) -> bool {
    matches!(error, Error::LlmRateLimited(_) | Error::LlmUnavailable(_))
}

/// Run `op`, sleeping through `sleep` between retryable failures.
///
/// Gives up after `policy.max_retries` retries and returns the last error.
pub fn retry_with_backoff<T, S, F>(policy: &Backoff, mut sleep: S, mut op: F) -> Result<T>
where
    S: FnMut(Duration),
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if is_retryable(&e) && attempt < policy.max_retries => {
                let delay = policy.delay(attempt);
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "retrying language model call");
                sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                debug!(attempts = attempt + 1, "giving up on language model call");
                return Err(e);
            }
        }
    }
}
