//! LLM providers used by the summarizer

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use tandem_core::config::{AiConfig, AiProviderKind};
use tandem_core::error::{ProviderError, Service};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// A single-turn text completion
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g. "anthropic", "openai")
    fn provider_name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// Build the configured provider, or `None` when no API key is set
pub fn from_config(config: &AiConfig, timeout: Duration) -> Option<Box<dyn LlmProvider>> {
    let api_key = config.api_key.clone()?;
    let provider: Box<dyn LlmProvider> = match config.provider {
        AiProviderKind::Anthropic => Box::new(AnthropicProvider::new(
            api_key,
            &config.model,
            config.base_url.as_deref().unwrap_or(ANTHROPIC_BASE_URL),
            config.max_tokens,
            timeout,
        )),
        AiProviderKind::Openai => Box::new(OpenAiProvider::new(
            api_key,
            &config.model,
            config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL),
            config.max_tokens,
            timeout,
        )),
    };
    Some(provider)
}

fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("failed to build HTTP client")
}

async fn read_success(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::classify(Service::Ai, Some(status.as_u16()), &body))
}

// ── Anthropic ───────────────────────────────────────────────────

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

/// Anthropic Messages API
pub struct AnthropicProvider {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            http: http_client(timeout),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        debug!("Anthropic completion with {} ({} chars)", self.model, prompt.len());

        let resp = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "system": system,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(Service::Ai, e))?;

        let parsed: AnthropicResponse = read_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transport(Service::Ai, e))?;

        let text = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");
        Ok(text)
    }
}

// ── OpenAI ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

/// OpenAI Chat Completions API
pub struct OpenAiProvider {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            http: http_client(timeout),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        debug!("OpenAI completion with {} ({} chars)", self.model, prompt.len());

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "max_tokens": self.max_tokens,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": prompt},
                ],
            }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(Service::Ai, e))?;

        let parsed: OpenAiResponse = read_success(resp)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transport(Service::Ai, e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::classify(Service::Ai, None, "response contained no choices"))
    }
}
