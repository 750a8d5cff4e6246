use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::prompts::{format_prompt, system_prompt};
use super::{AiError, AiRequest, AiResponse, ModelConfig, Provider};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    fn system(content: String) -> Self {
        Self {
            role: "system".to_string(),
            content,
        }
    }

    fn user(content: String) -> Self {
        Self {
            role: "user".to_string(),
            content,
        }
    }
}

/// Shared connection to an OpenAI-compatible chat completions API.
/// Timeouts are left at the HTTP client's defaults.
#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            dotenv::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let api_key = dotenv::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(base_url, api_key)
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    /// One non-streaming chat completion. Returns the raw response JSON.
    async fn complete(&self, body: &Value) -> Result<Value, AiError> {
        let mut req = self.client.post(self.endpoint()).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AiError::Request(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AiError::Request(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            let snippet: String = text.chars().take(300).collect();
            return Err(AiError::Request(format!("backend returned {}: {}", status, snippet)));
        }

        serde_json::from_str(&text)
            .map_err(|e| AiError::InvalidResponseFormat(format!("response is not JSON: {}", e)))
    }
}

pub struct OpenAiProvider {
    backend: OpenAiBackend,
    config: ModelConfig,
}

impl OpenAiProvider {
    pub fn new(backend: OpenAiBackend, model: &str) -> Self {
        Self {
            backend,
            config: ModelConfig::for_model(model),
        }
    }

    fn structured_body(&self, request: &AiRequest) -> Value {
        let messages = vec![
            Message::system(system_prompt(request.action)),
            Message::user(format_prompt(request)),
        ];
        json!({
            "model": self.config.model_name,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "replacement",
                    "strict": true,
                    "schema": {
                        "type": "object",
                        "properties": { "replacementText": { "type": "string" } },
                        "required": ["replacementText"],
                        "additionalProperties": false
                    }
                }
            }
        })
    }

    /// Models without system prompt support get the task folded into the
    /// user message.
    fn basic_body(&self, request: &AiRequest) -> Value {
        let content = if self.config.supports_system_prompt {
            format_prompt(request)
        } else {
            format!("{}\n\n{}", system_prompt(request.action), format_prompt(request))
        };
        let mut messages = Vec::new();
        if self.config.supports_system_prompt {
            messages.push(Message::system(system_prompt(request.action)));
        }
        messages.push(Message::user(content));
        json!({
            "model": self.config.model_name,
            "messages": messages,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    async fn generate_content(&self, request: &AiRequest) -> Result<AiResponse, AiError> {
        if self.config.supports_structured_output {
            let json = self.backend.complete(&self.structured_body(request)).await?;
            parse_structured(&json)
        } else {
            let json = self.backend.complete(&self.basic_body(request)).await?;
            parse_freeform(&json)
        }
    }
}

fn first_message(json: &Value) -> Option<&Value> {
    json["choices"].get(0).map(|c| &c["message"])
}

/// Structured responses must carry a JSON `{"replacementText": "..."}`
/// message. Anything else is rejected rather than guessed at.
fn parse_structured(json: &Value) -> Result<AiResponse, AiError> {
    #[derive(Deserialize)]
    struct Replacement {
        #[serde(rename = "replacementText")]
        replacement_text: Option<String>,
    }

    let message = first_message(json)
        .ok_or_else(|| AiError::InvalidResponseFormat("response has no choices".to_string()))?;
    if let Some(refusal) = message["refusal"].as_str() {
        return Err(AiError::InvalidResponseFormat(format!("model refused: {}", refusal)));
    }
    let content = message["content"].as_str().ok_or_else(|| {
        AiError::InvalidResponseFormat("response has no message content".to_string())
    })?;
    let parsed: Replacement = serde_json::from_str(content).map_err(|e| {
        AiError::InvalidResponseFormat(format!("content does not match schema: {}", e))
    })?;

    match parsed.replacement_text {
        Some(text) if !text.trim().is_empty() => Ok(AiResponse {
            replacement_text: text,
        }),
        _ => Err(AiError::InvalidResponseFormat(
            "replacementText is missing or empty".to_string(),
        )),
    }
}

/// Free-form responses are used as-is.
fn parse_freeform(json: &Value) -> Result<AiResponse, AiError> {
    let content = first_message(json)
        .and_then(|m| m["content"].as_str())
        .unwrap_or("");
    if content.trim().is_empty() {
        return Err(AiError::InvalidResponseFormat(
            "response has no message content".to_string(),
        ));
    }
    Ok(AiResponse {
        replacement_text: content.to_string(),
    })
}
