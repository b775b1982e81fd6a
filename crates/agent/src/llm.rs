use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use chatpyme_core::config::{LlmConfig, LlmProvider};

use crate::prompts::CONTEXT_HEADER;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion service is not configured")]
    NotConfigured,
    #[error("completion transport failed: {0}")]
    Transport(String),
    #[error("completion service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode completion response: {0}")]
    Decode(String),
    #[error("completion service returned an empty response")]
    Empty,
    #[error("completion call timed out after {0:?}")]
    Timeout(Duration),
}

/// One call to the completion service.
///
/// Each `system` block is sent as its own system message, followed by the optional context
/// block and then the user text.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: Vec<String>,
    pub context: Option<String>,
    pub user_text: String,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user_text: impl Into<String>, temperature: f32) -> Self {
        Self { system: vec![system.into()], context: None, user_text: user_text.into(), temperature }
    }

    pub fn with_system(mut self, block: impl Into<String>) -> Self {
        self.system.push(block.into());
        self
    }

    /// Blank context is dropped rather than sent as an empty block.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.context = (!context.trim().is_empty()).then_some(context);
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = self
            .system
            .iter()
            .map(|block| ChatMessage { role: "system", content: block.clone() })
            .collect::<Vec<_>>();
        if let Some(context) = &self.context {
            messages.push(ChatMessage {
                role: "system",
                content: format!("{CONTEXT_HEADER}\n{context}"),
            });
        }
        messages.push(ChatMessage { role: "user", content: self.user_text.clone() });
        messages
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint (OpenAI itself, Ollama).
pub struct OpenAiChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.effective_base_url().to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = ChatCompletionBody {
            model: &self.model,
            messages: request.messages(),
            temperature: request.temperature,
        };

        let mut builder = self.http.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.timeout)
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|error| LlmError::Decode(error.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::Empty)
    }
}

/// Builds the configured client, or `None` when the provider lacks what it needs to be called.
pub fn build_llm_client(config: &LlmConfig) -> Option<Arc<dyn LlmClient>> {
    if !config.has_credentials() {
        warn!(
            event_name = "agent.llm.unavailable",
            provider = config.provider.as_str(),
            "completion service has no credential; local fallbacks will be used"
        );
        return None;
    }

    match config.provider {
        LlmProvider::OpenAi | LlmProvider::Ollama => match OpenAiChatClient::new(config) {
            Ok(client) => Some(Arc::new(client)),
            Err(error) => {
                warn!(
                    event_name = "agent.llm.client_init_failed",
                    provider = config.provider.as_str(),
                    error = %error,
                    "completion client could not be built"
                );
                None
            }
        },
    }
}
