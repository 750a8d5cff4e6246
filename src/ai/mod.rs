pub mod openai;
pub mod prompts;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use openai::{OpenAiBackend, OpenAiProvider};

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "o1-mini";

/// Open string-keyed bag sent with every request (title, tags, instructions...).
/// Ordered so prompts are deterministic.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiAction {
    Regenerate,
    Expound,
    Condense,
    Generate,
}

impl AiAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AiAction::Regenerate => "regenerate",
            AiAction::Expound => "expound",
            AiAction::Condense => "condense",
            AiAction::Generate => "generate",
        }
    }

    /// Span-scoped actions rewrite a selection and need selected text.
    pub fn is_span_scoped(self) -> bool {
        !matches!(self, AiAction::Generate)
    }
}

impl fmt::Display for AiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiRequest {
    pub action: AiAction,
    pub selected_text: String,
    pub full_article: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AiRequest {
    pub fn validate(&self) -> Result<(), AiError> {
        if self.action.is_span_scoped() && self.selected_text.trim().is_empty() {
            return Err(AiError::EmptySelection(self.action));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub replacement_text: String,
}

/// What a concrete backend model can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub model_name: String,
    pub supports_structured_output: bool,
    pub supports_system_prompt: bool,
}

impl ModelConfig {
    pub fn for_model(model: &str) -> Self {
        let gpt4 = model.contains("gpt-4");
        Self {
            model_name: model.to_string(),
            supports_structured_output: gpt4,
            supports_system_prompt: gpt4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiError {
    /// No provider serves this model identifier. Raised before any I/O.
    UnsupportedModel(String),
    /// A span-scoped action was requested with nothing selected.
    EmptySelection(AiAction),
    /// Transport failure or non-2xx status from the backend.
    Request(String),
    /// The backend answered, but not with usable replacement text.
    InvalidResponseFormat(String),
}

impl fmt::Display for AiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AiError::UnsupportedModel(model) => write!(f, "Unsupported model: {}", model),
            AiError::EmptySelection(action) => {
                write!(f, "Select some text before asking to {}", action)
            }
            AiError::Request(msg) => write!(f, "AI request failed: {}", msg),
            AiError::InvalidResponseFormat(msg) => write!(f, "Invalid AI response format: {}", msg),
        }
    }
}

impl std::error::Error for AiError {}

/// A generative text backend. Each call makes exactly one outbound request
/// and never retries.
#[async_trait]
pub trait Provider: Send + Sync {
    fn config(&self) -> &ModelConfig;

    async fn generate_content(&self, request: &AiRequest) -> Result<AiResponse, AiError>;
}

/// Maps a model identifier to a provider.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, model: &str) -> Result<Box<dyn Provider>, AiError>;
}

pub fn is_supported_model(model: &str) -> bool {
    model == DEFAULT_MODEL || model.contains("gpt-4")
}

/// Pick the provider for `model`. Unknown identifiers fail here, before
/// anything touches the network.
pub fn select_provider(model: &str, backend: &OpenAiBackend) -> Result<Box<dyn Provider>, AiError> {
    if is_supported_model(model) {
        debug!(model, "selected OpenAI provider");
        return Ok(Box::new(OpenAiProvider::new(backend.clone(), model)));
    }
    warn!(model, "unsupported model requested");
    Err(AiError::UnsupportedModel(model.to_string()))
}

impl ProviderFactory for OpenAiBackend {
    fn create(&self, model: &str) -> Result<Box<dyn Provider>, AiError> {
        select_provider(model, self)
    }
}

/// Entry point for every AI request: validate, select, call once.
pub struct AiGateway {
    factory: Arc<dyn ProviderFactory>,
}

impl AiGateway {
    pub fn new(factory: Arc<dyn ProviderFactory>) -> Self {
        Self { factory }
    }

    pub async fn generate(&self, model: &str, request: &AiRequest) -> Result<AiResponse, AiError> {
        request.validate()?;
        let provider = self.factory.create(model)?;

        debug!(
            model,
            action = %request.action,
            selected_len = request.selected_text.len(),
            article_len = request.full_article.len(),
            structured = provider.config().supports_structured_output,
            "Sending AI request"
        );

        match provider.generate_content(request).await {
            Ok(response) => {
                info!(
                    model,
                    action = %request.action,
                    replacement_len = response.replacement_text.len(),
                    "AI request complete"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(model, action = %request.action, error = %e, "AI request failed");
                Err(e)
            }
        }
    }
}
