use super::{AiAction, AiRequest};

/// Metadata key carrying user instructions. It is rendered in the
/// instruction section, never among the metadata lines.
pub const INSTRUCTIONS_KEY: &str = "instructions";

pub const DEFAULT_INSTRUCTIONS: &str = "Be very mindful of SEO best practices.";

pub const CLOSING_DIRECTIVE: &str = "Please provide ONLY the new text without any formatting, labels, or markdown. \
Do not include field names like \"Subtitle:\" or \"Title:\". \
Just return the plain text that should replace the selected text.";

/// The editor's task for an action, phrased to follow "Your task is to".
pub fn task_for_action(action: AiAction) -> &'static str {
    match action {
        AiAction::Regenerate => {
            "Regenerate this text while maintaining consistency with the surrounding content."
        }
        AiAction::Expound => {
            "Expand this text with more specific details while maintaining consistency with the surrounding content."
        }
        AiAction::Condense => {
            "Condense this text to be more concise while maintaining key information and consistency with the surrounding content."
        }
        AiAction::Generate => {
            "Write new text for the requested field that is consistent with the article and its metadata."
        }
    }
}

pub fn system_prompt(action: AiAction) -> String {
    format!(
        "You are an expert content editor. Your task is to {}",
        task_for_action(action)
    )
}

/// Build the user prompt. Sections always appear in this order:
/// instructions, metadata, full article, selected text, closing directive.
pub fn format_prompt(request: &AiRequest) -> String {
    let action = request.action.as_str();
    let instructions = request
        .metadata
        .get(INSTRUCTIONS_KEY)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS);

    let metadata = request
        .metadata
        .iter()
        .filter(|(key, _)| key.as_str() != INSTRUCTIONS_KEY)
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "I need you to {action} this portion of the article. Specifically, be very mindful of SEO best practices \
and be sure to follow these instructions very carefully:\n\
{instructions}\n\n\
ARTICLE METADATA:\n\
{metadata}\n\n\
FULL ARTICLE:\n\
{article}\n\n\
SELECTED TEXT TO {upper}:\n\
{selected}\n\n\
{closing}",
        action = action,
        instructions = instructions,
        metadata = metadata,
        article = request.full_article,
        upper = action.to_uppercase(),
        selected = request.selected_text,
        closing = CLOSING_DIRECTIVE,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Metadata;

    fn request(metadata: &[(&str, &str)]) -> AiRequest {
        AiRequest {
            action: AiAction::Condense,
            selected_text: "The selected words".to_string(),
            full_article: "Whole article body".to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Metadata>(),
        }
    }

    #[test]
    fn test_sections_in_fixed_order() {
        let prompt = format_prompt(&request(&[("title", "Rust"), ("instructions", "Keep it short")]));
        let positions: Vec<usize> = [
            "Keep it short",
            "ARTICLE METADATA:",
            "title: Rust",
            "FULL ARTICLE:",
            "Whole article body",
            "SELECTED TEXT TO CONDENSE:",
            "The selected words",
            "Please provide ONLY the new text",
        ]
        .iter()
        .map(|needle| prompt.find(needle).unwrap())
        .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
        assert!(prompt.ends_with(CLOSING_DIRECTIVE));
    }

    #[test]
    fn test_instructions_excluded_from_metadata_lines() {
        let prompt = format_prompt(&request(&[("instructions", "Use British spelling")]));
        assert!(!prompt.contains("instructions: Use British spelling"));
        assert!(prompt.contains("\nUse British spelling\n"));
    }

    #[test]
    fn test_default_instructions_when_missing_or_blank() {
        assert!(format_prompt(&request(&[])).contains(DEFAULT_INSTRUCTIONS));
        assert!(format_prompt(&request(&[("instructions", "  ")])).contains(DEFAULT_INSTRUCTIONS));
    }

    #[test]
    fn test_metadata_lines_are_sorted() {
        let prompt = format_prompt(&request(&[("tags", "a,b"), ("slug", "s"), ("category", "c")]));
        let meta = prompt
            .split("ARTICLE METADATA:\n")
            .nth(1)
            .and_then(|rest| rest.split("\n\nFULL ARTICLE:").next())
            .unwrap();
        assert_eq!(meta, "category: c\nslug: s\ntags: a,b");
    }

    #[test]
    fn test_system_prompt_names_task() {
        assert!(system_prompt(AiAction::Expound).contains("Expand this text"));
    }
}
