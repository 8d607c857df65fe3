//! Language-model clients.
//!
//! The query pipeline talks to the model through [`LanguageModel`]: one
//! call with a system instruction, the user prompt and the prior turns of
//! the conversation, returning the raw reply text plus [`TokenUsage`].
//!
//! Backends: OpenAI-compatible chat completions, Ollama `/api/chat`, and
//! [`DisabledModel`] for deployments without a model. Calls are never
//! retried here; a failed call surfaces as [`ModelError`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::LlmConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    /// Earlier turns of the same session, oldest first.
    pub history: &'a [ChatTurn],
}

impl CompletionRequest<'_> {
    /// Full message list: system, history, then the new user prompt.
    pub fn messages(&self) -> Vec<Value> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(json!({ "role": Role::System, "content": self.system }));
        for turn in self.history {
            messages.push(json!({ "role": turn.role, "content": turn.content }));
        }
        messages.push(json!({ "role": Role::User, "content": self.prompt }));
        messages
    }
}

/// Token counts reported for one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub generation: u64,
    pub total: u64,
}

impl TokenUsage {
    /// Build usage counters; a missing total is `prompt + generation`.
    pub fn new(prompt: u64, generation: u64, total: Option<u64>) -> Self {
        Self {
            prompt,
            generation,
            total: total.unwrap_or(prompt.saturating_add(generation)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out")]
    Timeout,
    #[error("model rate limited: {0}")]
    RateLimited(String),
    #[error("model upstream error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("model transport error: {0}")]
    Transport(String),
    #[error("model returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("no language model is configured")]
    Disabled,
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout
        } else if err.is_decode() {
            ModelError::InvalidResponse(err.to_string())
        } else {
            ModelError::Transport(err.to_string())
        }
    }
}

/// Language model collaborator.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier for logging.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, ModelError>;
}

/// Build the model selected by `llm.provider`.
pub fn create_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn required_model(config: &LlmConfig) -> anyhow::Result<String> {
    config.model.clone().ok_or_else(|| {
        anyhow::anyhow!("llm.model required for {} provider", config.provider)
    })
}

/// Send a JSON request and classify the failure modes.
async fn send_json(request: reqwest::RequestBuilder) -> Result<Value, ModelError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 {
        return Err(ModelError::RateLimited(body));
    }
    Err(ModelError::Upstream {
        status: status.as_u16(),
        body,
    })
}

fn count(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(|v| v.as_u64())
}

/// Always fails with [`ModelError::Disabled`].
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest<'_>) -> Result<Completion, ModelError> {
        Err(ModelError::Disabled)
    }
}

// ============ OpenAI ============

/// OpenAI-compatible `/v1/chat/completions` client.
///
/// Sends `OPENAI_API_KEY` as a bearer token when set. `llm.url` points the
/// client at any compatible server.
pub struct OpenAiChat {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        if api_key.is_none() && config.url.is_none() {
            anyhow::bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model: required_model(config)?,
            base_url,
            api_key,
            temperature: config.temperature,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, ModelError> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": request.messages(),
        });
        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        parse_openai_completion(&send_json(builder).await?)
    }
}

fn parse_openai_completion(json: &Value) -> Result<Completion, ModelError> {
    let text = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| ModelError::InvalidResponse("missing choices[0].message.content".into()))?;
    let usage = json.get("usage").cloned().unwrap_or(Value::Null);
    Ok(Completion {
        text: text.to_string(),
        usage: TokenUsage::new(
            count(&usage, "prompt_tokens").unwrap_or(0),
            count(&usage, "completion_tokens").unwrap_or(0),
            count(&usage, "total_tokens"),
        ),
    })
}

// ============ Ollama ============

/// Ollama `/api/chat` client (non-streaming).
pub struct OllamaChat {
    model: String,
    url: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        Ok(Self {
            model: required_model(config)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            temperature: config.temperature,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<Completion, ModelError> {
        let body = json!({
            "model": self.model,
            "messages": request.messages(),
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        let builder = self
            .client
            .post(format!("{}/api/chat", self.url.trim_end_matches('/')))
            .json(&body);
        parse_ollama_completion(&send_json(builder).await?)
    }
}

fn parse_ollama_completion(json: &Value) -> Result<Completion, ModelError> {
    let text = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| ModelError::InvalidResponse("missing message.content".into()))?;
    Ok(Completion {
        text: text.to_string(),
        usage: TokenUsage::new(
            count(json, "prompt_eval_count").unwrap_or(0),
            count(json, "eval_count").unwrap_or(0),
            None,
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_total_defaults_to_sum() {
        assert_eq!(TokenUsage::new(10, 5, None).total, 15);
        assert_eq!(TokenUsage::new(10, 5, Some(16)).total, 16);
    }

    #[test]
    fn test_usage_total_saturates() {
        let usage = TokenUsage::new(u64::MAX, 7, None);
        assert_eq!(usage.total, u64::MAX);
        assert_eq!(usage.generation, 7);
    }

    #[test]
    fn test_messages_order() {
        let history = vec![ChatTurn::user("hi"), ChatTurn::assistant("hello")];
        let request = CompletionRequest {
            system: "be brief",
            prompt: "and now?",
            history: &history,
        };
        let messages = request.messages();
        let roles: Vec<&str> = messages
            .iter()
            .map(|m| m["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3]["content"], "and now?");
    }

    #[test]
    fn test_parse_openai_completion() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{}" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        });
        let completion = parse_openai_completion(&json).unwrap();
        assert_eq!(completion.text, "{}");
        assert_eq!(completion.usage, TokenUsage::new(12, 3, Some(15)));
    }

    #[test]
    fn test_parse_openai_completion_without_usage() {
        let json = json!({ "choices": [{ "message": { "content": "x" } }] });
        assert_eq!(parse_openai_completion(&json).unwrap().usage, TokenUsage::default());
    }

    #[test]
    fn test_parse_openai_missing_content() {
        let err = parse_openai_completion(&json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_ollama_completion() {
        let json = json!({
            "message": { "role": "assistant", "content": "answer" },
            "prompt_eval_count": 40,
            "eval_count": 8,
            "done": true
        });
        let completion = parse_ollama_completion(&json).unwrap();
        assert_eq!(completion.text, "answer");
        assert_eq!(completion.usage.total, 48);
    }

    #[tokio::test]
    async fn test_disabled_model() {
        let request = CompletionRequest {
            system: "",
            prompt: "hello",
            history: &[],
        };
        let err = DisabledModel.complete(&request).await.unwrap_err();
        assert!(matches!(err, ModelError::Disabled));
    }

    #[test]
    fn test_create_model_requires_model_name() {
        let config = LlmConfig {
            provider: "ollama".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_model(&config).is_err());
        assert_eq!(create_model(&LlmConfig::default()).unwrap().name(), "disabled");
    }
}
