use tracing::warn;

use crate::chat::messages::CoreMessage;
use crate::config::ModelSpec;
use crate::llm::models::{ChatOptions, Message};
use crate::llm::LlmProvider;

const MAX_TITLE_CHARS: usize = 80;

const TITLE_PROMPT: &str = "\
- you will generate a short title based on the first message a user begins a conversation with
- ensure it is not more than 80 characters long
- the title should be a summary of the user's message
- do not use quotes or colons";

/// One-shot title for a new chat. Falls back to the start of the message
/// itself when the model call fails or returns nothing usable.
pub async fn generate_title(llm: &dyn LlmProvider, model: &ModelSpec, message: &CoreMessage) -> String {
    let text = message.content.text();
    let options = ChatOptions {
        model: Some(model.api_identifier.clone()),
        system_prompt: Some(TITLE_PROMPT.to_string()),
        ..Default::default()
    };

    match llm.chat(&[Message::text("user", text.as_str())], options).await {
        Ok(response) => {
            let title = clean_title(&response.content);
            if title.is_empty() {
                fallback_title(&text)
            } else {
                title
            }
        }
        Err(e) => {
            warn!("Title generation failed, using message text: {}", e);
            fallback_title(&text)
        }
    }
}

fn clean_title(raw: &str) -> String {
    let stripped: String = raw.trim().chars().filter(|c| !matches!(c, '"' | ':')).collect();
    truncate(stripped.trim())
}

pub fn fallback_title(text: &str) -> String {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first_line.is_empty() {
        "New Chat".to_string()
    } else {
        truncate(first_line)
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_TITLE_CHARS).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Notes: a plan\"\n"), "Notes a plan");
        assert_eq!(clean_title(&"x".repeat(200)).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_fallback_title() {
        assert_eq!(fallback_title("\n\nCreate a doc titled Notes\nmore"), "Create a doc titled Notes");
        assert_eq!(fallback_title("   "), "New Chat");
    }
}
