//! Chat completion and embedding capability.
//!
//! [`OpenAiCompatibleClient`] speaks the `/chat/completions` and `/embeddings`
//! endpoints shared by OpenAI and Ollama. Call sites treat every error as
//! "provider unavailable" and fall back to their own default.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use leadwise_core::config::LlmConfig;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSON_TEMPERATURE: f32 = 0.0;
pub const JSON_MAX_OUTPUT_TOKENS: u32 = 220;
pub const ANSWER_TEMPERATURE: f32 = 0.2;
pub const ANSWER_MAX_OUTPUT_TOKENS: u32 = 550;

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub instructions: String,
    pub input: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    /// Deterministic request for a small JSON object.
    pub fn json(instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
            temperature: JSON_TEMPERATURE,
            max_output_tokens: JSON_MAX_OUTPUT_TOKENS,
        }
    }

    pub fn answer(instructions: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            input: input.into(),
            temperature: ANSWER_TEMPERATURE,
            max_output_tokens: ANSWER_MAX_OUTPUT_TOKENS,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct OpenAiCompatibleClient {
    http: Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    embedding_model: String,
}

impl OpenAiCompatibleClient {
    /// `None` when the provider is disabled.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>> {
        if !config.provider.is_enabled() {
            return Ok(None);
        }
        let base_url = config
            .effective_base_url()
            .ok_or_else(|| anyhow!("llm provider {:?} has no base url", config.provider))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build llm http client")?;

        Ok(Some(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
        }))
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &request.instructions },
                ChatMessage { role: "user", content: &request.input },
            ],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        };

        let response = self
            .authorized(self.http.post(format!("{}/chat/completions", self.base_url)))
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("chat completion returned {status}: {error_body}");
        }

        let parsed: ChatResponse =
            response.json().await.context("failed to parse chat completion response")?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(content.trim().to_string())
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest { model: &self.embedding_model, input: texts };

        let response = self
            .authorized(self.http.post(format!("{}/embeddings", self.base_url)))
            .json(&body)
            .send()
            .await
            .context("embedding request failed")?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            bail!("embeddings returned {status}: {error_body}");
        }

        let mut parsed: EmbeddingResponse =
            response.json().await.context("failed to parse embedding response")?;
        parsed.data.sort_by_key(|item| item.index);
        if parsed.data.len() != texts.len() {
            bail!("embeddings returned {} vectors for {} inputs", parsed.data.len(), texts.len());
        }
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

/// Pulls the first JSON object out of model output, tolerating prose around it.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
        return Some(object);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}
