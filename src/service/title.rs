use tracing::warn;

use crate::models::{Message, MessageRole};
use crate::provider::ChatProvider;

const TITLE_SYSTEM_PROMPT: &str = "\
- you will generate a short title based on the first message a user begins a conversation with
- ensure it is not more than 80 characters long
- the title should be a summary of the user's message
- do not use quotes or colons";

const MAX_TITLE_CHARS: usize = 80;

/// Synthesizes a chat title from the first user message. One non-streaming
/// provider call; a failing or empty completion falls back to truncating the
/// message itself so chat creation never fails on the title step.
pub async fn generate_title(provider: &ChatProvider, first_message: &str) -> String {
    let prompt = Message::new(String::new(), MessageRole::User, first_message.to_string());
    match provider.complete(TITLE_SYSTEM_PROMPT, std::slice::from_ref(&prompt)).await {
        Ok(title) if !title.trim().is_empty() => clamp(title.trim()),
        Ok(_) => fallback(first_message),
        Err(e) => {
            warn!("Title generation failed, falling back to truncation: {e}");
            fallback(first_message)
        }
    }
}

fn clamp(title: &str) -> String {
    truncate_chars(title, MAX_TITLE_CHARS)
}

/// Truncated first message, used when the provider cannot produce a title.
fn fallback(message: &str) -> String {
    truncate_chars(message.trim(), MAX_TITLE_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}…", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}
