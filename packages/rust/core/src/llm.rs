//! Language model backends.
//!
//! [`OpenRouterModel`] talks to an OpenAI-compatible chat completions API.
//! [`DemoModel`] answers offline and is only used when `demo_mode` is set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use docmuse_shared::{DocMuseError, OpenRouterConfig, Result};

use crate::contracts::LanguageModel;

/// User-Agent string for model requests.
const USER_AGENT: &str = concat!("DocMuse/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// OpenRouterModel
// ---------------------------------------------------------------------------

/// Chat-completions client for OpenRouter or any compatible endpoint.
pub struct OpenRouterModel {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenRouterModel {
    /// Build a client with an explicit API key.
    pub fn new(config: &OpenRouterConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocMuseError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.default_model.clone(),
            temperature: config.temperature,
        })
    }

    /// Build a client reading the API key from the configured env var.
    pub fn from_env(config: &OpenRouterConfig) -> Result<Self> {
        let var_name = &config.api_key_env;
        let key = std::env::var(var_name)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                DocMuseError::config(format!(
                    "OpenRouter API key not found. Set the {var_name} environment variable."
                ))
            })?;
        Self::new(config, key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn invoke(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| DocMuseError::Network(format!("model request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DocMuseError::parse(format!("invalid model response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DocMuseError::Model("model response had no content".into()))?;

        debug!(chars = content.len(), "model call completed");
        Ok(content)
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
///
/// Rate limits, timeouts and server errors are transient. Other client
/// errors (bad key, unknown model) will not improve on retry.
fn classify_status(status: StatusCode, body: &str) -> DocMuseError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        DocMuseError::Model(format!("HTTP {status}: {snippet}"))
    } else {
        DocMuseError::config(format!("model backend rejected request (HTTP {status}): {snippet}"))
    }
}

// ---------------------------------------------------------------------------
// DemoModel
// ---------------------------------------------------------------------------

/// Offline model that echoes an excerpt of its input.
///
/// Output is deterministic and clearly marked so it is never mistaken for a
/// real answer.
pub struct DemoModel;

/// Words of input echoed back by the demo model.
const DEMO_EXCERPT_WORDS: usize = 60;

#[async_trait]
impl LanguageModel for DemoModel {
    async fn invoke(&self, _system: &str, user: &str) -> Result<String> {
        let excerpt: Vec<&str> = user.split_whitespace().take(DEMO_EXCERPT_WORDS).collect();
        Ok(format!("[demo] {}", excerpt.join(" ")))
    }

    fn is_demo(&self) -> bool {
        true
    }
}

/// Select the model backend from config.
///
/// Demo mode must be requested explicitly; a missing API key otherwise is a
/// configuration error.
pub fn build_model(config: &OpenRouterConfig) -> Result<Arc<dyn LanguageModel>> {
    if config.demo_mode {
        info!("using offline demo model");
        return Ok(Arc::new(DemoModel));
    }
    let model = OpenRouterModel::from_env(config)?;
    info!(model = %model.model(), "using OpenRouter model");
    Ok(Arc::new(model))
}
