//! Chat completion client for fields the analyzer cannot read off the page.
//!
//! Requests carry a JSON schema as `response_format`, so the model answers
//! with a document of exactly that shape. The parsed document comes back in
//! [`ChatOutput::content`] next to the raw response.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use contentflow_shared::{ChatConfig, ContentFlowError, Result, read_secret_env};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::{USER_AGENT, ensure_success};

const CHAT_KEY_HEADER: &str = "api-key";

/// One part of a multi-part user message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Inline image as a `data:` URL.
    pub fn image(mime_type: &str, data: &[u8]) -> Self {
        Self::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{mime_type};base64,{}", BASE64_STANDARD.encode(data)),
            },
        }
    }
}

/// A single structured-output completion.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: Vec<ContentPart>,
    /// Name reported with the response schema.
    pub schema_name: String,
    pub response_schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutput {
    /// The model's answer, parsed as JSON.
    pub content: Value,
    /// Full response body, usage included.
    pub response: Value,
}

/// Chat model the mapping step asks for inferred fields.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatOutput>;
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// Azure OpenAI chat completions over REST.
pub struct AzureOpenAiClient {
    client: Client,
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
}

impl AzureOpenAiClient {
    /// Build a client from the `[chat]` config section.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        url::Url::parse(&config.endpoint)
            .map_err(|e| ContentFlowError::config(format!("invalid chat endpoint: {e}")))?;
        if config.deployment.trim().is_empty() {
            return Err(ContentFlowError::config("chat deployment is empty"));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ContentFlowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            deployment: config.deployment.clone(),
            api_version: config.api_version.clone(),
            api_key: read_secret_env(&config.api_key_env),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
        })
    }

    /// Use an explicit API key (overrides the env var).
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl ChatCompletion for AzureOpenAiClient {
    #[instrument(skip_all, fields(deployment = %self.deployment, schema = %request.schema_name))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatOutput> {
        let body = json!({
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "strict": true,
                    "schema": request.response_schema,
                },
            },
        });

        let mut call = self.client.post(self.completions_url()).json(&body);
        if let Some(key) = &self.api_key {
            call = call.header(CHAT_KEY_HEADER, key);
        }
        let response = call
            .send()
            .await
            .map_err(|e| ContentFlowError::Network(format!("chat completion: {e}")))?;
        let response = ensure_success(response, "chat completion")
            .await
            .map_err(ContentFlowError::analysis)?;
        let response: Value = response
            .json()
            .await
            .map_err(|e| ContentFlowError::Serialization(format!("chat completion body: {e}")))?;

        let parsed: CompletionBody = serde_json::from_value(response.clone())?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ContentFlowError::analysis("chat completion returned no choices"))?;
        if let Some(refusal) = choice.message.refusal {
            return Err(ContentFlowError::analysis(format!("chat model refused: {refusal}")));
        }
        if choice.finish_reason.as_deref() == Some("length") {
            return Err(ContentFlowError::analysis(format!(
                "chat completion hit the {} token limit",
                self.max_tokens
            )));
        }
        let text = choice
            .message
            .content
            .ok_or_else(|| ContentFlowError::analysis("chat completion has no content"))?;
        let content: Value = serde_json::from_str(&text).map_err(|e| {
            ContentFlowError::analysis(format!("chat completion content is not JSON: {e}"))
        })?;
        debug!(usage = %response.get("usage").unwrap_or(&serde_json::Value::Null), "chat usage");
        info!("chat completion parsed");

        Ok(ChatOutput { content, response })
    }
}
