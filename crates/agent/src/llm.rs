use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use bookworm_core::config::{LlmConfig, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const MAX_BACKOFF_MS: u64 = 5_000;

/// Text-completion delegate. Its output is untrusted text; callers parse and validate it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelegateError {
    #[error("completion delegate unavailable: {0}")]
    Unavailable(String),
    #[error("completion delegate timed out after {0:?}")]
    Timeout(Duration),
    #[error("completion delegate returned malformed output")]
    Malformed,
    #[error("completion delegate failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Bounded retry around a delegate call: `1 + max_retries` attempts, exponential backoff
/// between them, each attempt under its own timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250, per_attempt_timeout: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            per_attempt_timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(MAX_BACKOFF_MS);
        Duration::from_millis(delay_ms)
    }

    /// Runs `operation` until it yields a value or the attempts run out. `None` from the
    /// operation means the output was unusable and counts as a failed attempt.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, DelegateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let attempts = self.attempts();
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt - 1)).await;
            }

            let failure = match tokio::time::timeout(self.per_attempt_timeout, operation()).await
            {
                Ok(Ok(Some(value))) => return Ok(value),
                Ok(Ok(None)) => DelegateError::Malformed,
                Ok(Err(error)) => DelegateError::Unavailable(error.to_string()),
                Err(_) => DelegateError::Timeout(self.per_attempt_timeout),
            };
            warn!(
                event_name = "delegate.attempt.failed",
                attempt = attempt + 1,
                max_attempts = attempts,
                error = %failure,
                "completion attempt failed"
            );
        }

        Err(DelegateError::Exhausted { attempts })
    }
}

/// Sends `prompt` to the delegate under `policy`, retrying until `parse` accepts the reply.
pub async fn complete_with_retry<T, P>(
    client: &dyn LlmClient,
    prompt: &str,
    policy: &RetryPolicy,
    parse: P,
) -> Result<T, DelegateError>
where
    P: Fn(&str) -> Option<T>,
{
    let parse = &parse;
    policy
        .run(move || async move {
            let raw = client.complete(prompt).await?;
            debug!(event_name = "delegate.reply", reply_len = raw.len(), "completion received");
            Ok::<_, anyhow::Error>(parse(&raw))
        })
        .await
}

/// Pulls the outermost JSON object out of a reply that may be wrapped in prose or a
/// markdown code fence.
pub fn extract_json_object(raw: &str) -> Option<serde_json::Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&raw[start..=end]).ok()?;
    value.is_object().then_some(value)
}

/// Chat-completions client for OpenAI and OpenAI-compatible servers such as Ollama.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let base_url = match (&config.base_url, config.provider) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, LlmProvider::OpenAi) => OPENAI_BASE_URL.to_string(),
            (None, LlmProvider::Ollama) => {
                return Err(anyhow!("llm.base_url is required for the ollama provider"))
            }
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{base_url}/chat/completions"),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: 0.2,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("completion endpoint returned {}", response.status()));
        }

        let reply: ChatResponse = response.json().await?;
        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion endpoint returned no choices"))
    }
}
