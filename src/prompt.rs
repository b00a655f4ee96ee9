//! System prompt composition
//!
//! A prompt is `<role> + <retrieved context> + <formatting>`. The context
//! block is dropped entirely when retrieval found nothing.

const ROLE: &str = "You are a professional financial advisor.";

const TEXT_CONTEXT_HEADER: &str = "Use the following past context if relevant:";
const TEXT_FORMATTING: &str = "Provide structured, detailed answers with headings and examples.";

const VOICE_CONTEXT_HEADER: &str = "Use the following context if relevant:";
const VOICE_FORMATTING: &str = "Provide clear, natural responses suitable for speaking. \
     Use conversational language and proper sentence structure.";

/// Which interface the reply is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// Written answer, markdown welcome
    Text,
    /// Answer that will be spoken aloud
    Voice,
}

/// Build the system prompt for one turn
#[must_use]
pub fn build_system_prompt(style: PromptStyle, context: &str) -> String {
    let (header, formatting) = match style {
        PromptStyle::Text => (TEXT_CONTEXT_HEADER, TEXT_FORMATTING),
        PromptStyle::Voice => (VOICE_CONTEXT_HEADER, VOICE_FORMATTING),
    };

    let context = context.trim();
    if context.is_empty() {
        format!("{ROLE} {formatting}")
    } else {
        format!("{ROLE} {header}\n\n{context}\n\n{formatting}")
    }
}
