use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::ai::prompts::INSTRUCTIONS_KEY;
use crate::ai::{AiAction, AiError, AiGateway, AiRequest, Metadata};

/// The field holding the article body. Regenerating it overwrites the
/// whole article and needs explicit confirmation.
pub const CONTENT_FIELD: &str = "content";

#[derive(Debug, Clone, Default)]
pub struct FieldRequest {
    pub field: String,
    pub current_value: String,
    pub full_article: String,
    /// Other fields of the item (title, slug, tags...).
    pub context: Metadata,
    pub instructions: Option<String>,
    pub confirmed: bool,
}

impl FieldRequest {
    fn is_content(&self) -> bool {
        self.field == CONTENT_FIELD
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    ConfirmationRequired(String),
    AlreadyGenerating(String),
    Ai(AiError),
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::ConfirmationRequired(field) => write!(
                f,
                "Generating `{}` replaces all existing content. Run again with confirm to proceed.",
                field
            ),
            FieldError::AlreadyGenerating(field) => {
                write!(f, "`{}` is already being generated", field)
            }
            FieldError::Ai(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FieldError {}

/// Whole-field generation with at most one request in flight per field.
#[derive(Debug, Default)]
pub struct FieldGenerator {
    in_flight: Mutex<HashSet<String>>,
}

struct InFlight<'a> {
    owner: &'a FieldGenerator,
    field: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.owner.slots().remove(&self.field);
    }
}

impl FieldGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_generating(&self, field: &str) -> bool {
        self.slots().contains(field)
    }

    fn begin(&self, field: &str) -> Result<InFlight<'_>, FieldError> {
        if !self.slots().insert(field.to_string()) {
            return Err(FieldError::AlreadyGenerating(field.to_string()));
        }
        Ok(InFlight {
            owner: self,
            field: field.to_string(),
        })
    }

    /// Produce a new value for the whole field. On error nothing is applied;
    /// the caller keeps its current value.
    pub async fn generate(
        &self,
        gateway: &AiGateway,
        model: &str,
        request: &FieldRequest,
    ) -> Result<String, FieldError> {
        if request.is_content() && !request.confirmed {
            return Err(FieldError::ConfirmationRequired(request.field.clone()));
        }
        let _slot = self.begin(&request.field)?;

        let ai_request = build_request(request);
        debug!(field = %request.field, "Generating field");
        let response = gateway
            .generate(model, &ai_request)
            .await
            .map_err(FieldError::Ai)?;

        let value = if request.is_content() {
            response.replacement_text
        } else {
            response.replacement_text.replace("\\n", "\n").trim().to_string()
        };
        info!(field = %request.field, len = value.len(), "Field generated");
        Ok(value)
    }
}

fn build_request(request: &FieldRequest) -> AiRequest {
    let mut metadata = request.context.clone();
    metadata.insert("fieldToGenerate".to_string(), request.field.clone());
    metadata.insert(
        "format".to_string(),
        if request.is_content() { "html" } else { "text" }.to_string(),
    );
    let instructions = request
        .instructions
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "Generate a compelling {} based on the article content and other metadata.",
                request.field
            )
        });
    metadata.insert(INSTRUCTIONS_KEY.to_string(), instructions);

    AiRequest {
        action: AiAction::Generate,
        selected_text: request.current_value.clone(),
        full_article: request.full_article.clone(),
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedFactory;

    fn request(field: &str) -> FieldRequest {
        let mut context = Metadata::new();
        context.insert("title".to_string(), "Old title".to_string());
        FieldRequest {
            field: field.to_string(),
            current_value: "current".to_string(),
            full_article: "The article".to_string(),
            context,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_content_requires_confirmation() {
        let factory = ScriptedFactory::replying([Ok("<p>new</p>".to_string())]);
        let generator = FieldGenerator::new();
        let err = generator
            .generate(&factory.gateway(), "gpt-4o", &request(CONTENT_FIELD))
            .await
            .unwrap_err();
        assert_eq!(err, FieldError::ConfirmationRequired(CONTENT_FIELD.to_string()));
        assert_eq!(factory.calls(), 0);

        let mut confirmed = request(CONTENT_FIELD);
        confirmed.confirmed = true;
        let value = generator
            .generate(&factory.gateway(), "gpt-4o", &confirmed)
            .await
            .unwrap();
        assert_eq!(value, "<p>new</p>");
        assert_eq!(factory.seen()[0].metadata["format"], "html");
    }

    #[tokio::test]
    async fn test_metadata_and_cleanup() {
        let factory = ScriptedFactory::replying([Ok("  Line one\\nLine two \n".to_string())]);
        let value = FieldGenerator::new()
            .generate(&factory.gateway(), "o1-mini", &request("subtitle"))
            .await
            .unwrap();
        assert_eq!(value, "Line one\nLine two");

        let sent = &factory.seen()[0];
        assert_eq!(sent.action, AiAction::Generate);
        assert_eq!(sent.selected_text, "current");
        assert_eq!(sent.metadata["fieldToGenerate"], "subtitle");
        assert_eq!(sent.metadata["format"], "text");
        assert_eq!(sent.metadata["title"], "Old title");
        assert_eq!(
            sent.metadata[INSTRUCTIONS_KEY],
            "Generate a compelling subtitle based on the article content and other metadata."
        );
    }

    #[tokio::test]
    async fn test_failure_releases_field() {
        let factory = ScriptedFactory::replying([
            Err(AiError::Request("boom".to_string())),
            Ok("Second try".to_string()),
        ]);
        let generator = FieldGenerator::new();
        let err = generator
            .generate(&factory.gateway(), "gpt-4o", &request("title"))
            .await
            .unwrap_err();
        assert_eq!(err, FieldError::Ai(AiError::Request("boom".to_string())));
        assert!(!generator.is_generating("title"));

        let value = generator
            .generate(&factory.gateway(), "gpt-4o", &request("title"))
            .await
            .unwrap();
        assert_eq!(value, "Second try");
    }

    #[test]
    fn test_one_generation_per_field() {
        let generator = FieldGenerator::new();
        let slot = generator.begin("title").unwrap();
        assert!(generator.is_generating("title"));
        assert!(matches!(
            generator.begin("title"),
            Err(FieldError::AlreadyGenerating(_))
        ));
        assert!(generator.begin("subtitle").is_ok());
        drop(slot);
        assert!(!generator.is_generating("title"));
    }

    #[test]
    fn test_custom_instructions_override_default() {
        let mut req = request("slug");
        req.instructions = Some("Use kebab case".to_string());
        assert_eq!(build_request(&req).metadata[INSTRUCTIONS_KEY], "Use kebab case");
    }
}
