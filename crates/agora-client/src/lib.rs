//! OpenAI-compatible turn executor.
//!
//! Sends each [`TurnPrompt`] as a chat-completions request and returns the
//! visible content plus the provider's reasoning trace when one is exposed.
//! Works against Ollama, vLLM, DeepSeek and other compatible endpoints.

pub mod wire;

use std::time::{Duration, Instant};

use agora_engine::{EndpointConfig, ExecutorError, TurnExecutor, TurnPrompt, TurnResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use thiserror::Error;
use tracing::{debug, warn};

use crate::wire::{ChatRequest, ChatResponse};

/// API key used when the configured environment variable is unset.
pub const FALLBACK_API_KEY: &str = "ollama";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while building a client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint URL is unusable.
    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// The configured base URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The API key cannot be sent as a header.
    #[error("API key from ${env} is not a valid header value")]
    InvalidApiKey {
        /// Environment variable the key came from.
        env: String,
    },

    /// The HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Returns the chat-completions URL for a base URL.
///
/// # Examples
///
/// ```
/// use agora_client::completions_url;
///
/// assert_eq!(
///     completions_url("http://localhost:11434/v1/"),
///     "http://localhost:11434/v1/chat/completions"
/// );
/// assert_eq!(
///     completions_url("https://api.deepseek.com/chat/completions"),
///     "https://api.deepseek.com/chat/completions"
/// );
/// ```
#[must_use]
pub fn completions_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

/// Executes turns against an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleExecutor {
    http: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl OpenAiCompatibleExecutor {
    /// Builds an executor from endpoint settings.
    ///
    /// The API key is read from `endpoint.api_key_env`; when that variable is
    /// unset the local-server placeholder key is used.
    pub fn from_config(endpoint: &EndpointConfig) -> Result<Self, ClientError> {
        let api_key = std::env::var(&endpoint.api_key_env).unwrap_or_else(|_| {
            debug!(env = %endpoint.api_key_env, "API key variable unset, using placeholder");
            FALLBACK_API_KEY.to_string()
        });
        let mut executor = Self::new(&endpoint.base_url, &endpoint.model, &api_key).map_err(
            |e| match e {
                ClientError::InvalidApiKey { .. } => ClientError::InvalidApiKey {
                    env: endpoint.api_key_env.clone(),
                },
                other => other,
            },
        )?;
        executor.temperature = endpoint.temperature;
        executor.max_tokens = endpoint.max_tokens;
        Ok(executor)
    }

    /// Builds an executor with default sampling settings.
    pub fn new(base_url: &str, model: &str, api_key: &str) -> Result<Self, ClientError> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidEndpoint {
                url: base_url.to_string(),
                reason: "must start with http:// or https://".to_string(),
            });
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
            ClientError::InvalidApiKey {
                env: "<argument>".to_string(),
            }
        })?;
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            url: completions_url(base_url),
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: None,
        })
    }

    /// Returns the request URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn request<'a>(&'a self, prompt: &TurnPrompt) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: prompt.to_messages(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait]
impl TurnExecutor for OpenAiCompatibleExecutor {
    async fn execute(&self, prompt: &TurnPrompt) -> Result<TurnResponse, ExecutorError> {
        let started = Instant::now();
        let body = self.request(prompt);
        debug!(url = %self.url, model = %self.model, messages = body.messages.len(), "POST chat completion");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Chat completion request failed");
                if e.is_timeout() {
                    ExecutorError::timeout(started.elapsed())
                } else {
                    ExecutorError::transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ExecutorError::transport(format!(
                "HTTP {status}: {}",
                detail.trim()
            )));
        }

        let parsed = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ExecutorError::malformed(format!("invalid completion body: {e}")))?;

        let mut turn = parsed.into_turn_response()?;
        turn.latency = started.elapsed();
        Ok(turn)
    }
}
