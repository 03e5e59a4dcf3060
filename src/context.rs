use crate::constants::{PROMPT_PREVIEW_CHARS, SECTION_SEPARATOR, SESSION_HEADING, SUMMARY_HEADING};
use crate::history::{sanitize_history_with_report, SanitizeReport};
use crate::protocol::{ContentPart, ImageUrl, Message, ToolCall};
use serde::Serialize;

/// Assembles the request transcript: system prompt, repaired history, new user turn.
pub struct ContextBuilder {
    system_prompt: String,
}

/// Size of the system prompt as sent, for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PromptStats {
    pub total_chars: usize,
    pub total_lines: usize,
    pub section_count: usize,
    pub preview: String,
}

impl ContextBuilder {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    /// The system prompt with the session block appended when both IDs are set.
    pub fn system_prompt(&self, channel: &str, chat_id: &str) -> String {
        let mut prompt = self.system_prompt.clone();
        if !channel.is_empty() && !chat_id.is_empty() {
            prompt.push_str(&format!(
                "\n\n{SESSION_HEADING}\nChannel: {channel}\nChat ID: {chat_id}"
            ));
        }
        prompt
    }

    pub fn build_messages(
        &self,
        history: &[Message],
        summary: &str,
        current_message: &str,
        media: &[String],
        channel: &str,
        chat_id: &str,
    ) -> Vec<Message> {
        self.build_messages_with_report(history, summary, current_message, media, channel, chat_id)
            .0
    }

    pub fn build_messages_with_report(
        &self,
        history: &[Message],
        summary: &str,
        current_message: &str,
        media: &[String],
        channel: &str,
        chat_id: &str,
    ) -> (Vec<Message>, SanitizeReport) {
        let mut system_prompt = self.system_prompt(channel, chat_id);
        if !summary.is_empty() {
            system_prompt.push_str(&format!("\n\n{SUMMARY_HEADING}\n\n{summary}"));
        }

        let (history, report) = sanitize_history_with_report(history);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history);
        messages.push(user_turn(current_message, media));
        (messages, report)
    }
}

fn user_turn(text: &str, media: &[String]) -> Message {
    let mut msg = Message::user(text);
    if !media.is_empty() {
        msg.content_parts.push(ContentPart::Text {
            text: text.to_string(),
        });
        msg.content_parts
            .extend(media.iter().map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            }));
    }
    msg
}

pub fn add_tool_result(
    mut messages: Vec<Message>,
    tool_call_id: &str,
    content: &str,
) -> Vec<Message> {
    messages.push(Message::tool_result(tool_call_id, content));
    messages
}

pub fn add_assistant_message(
    mut messages: Vec<Message>,
    content: &str,
    tool_calls: Vec<ToolCall>,
) -> Vec<Message> {
    let mut msg = Message::assistant(content);
    msg.tool_calls = tool_calls;
    messages.push(msg);
    messages
}

pub fn prompt_stats(prompt: &str) -> PromptStats {
    let (preview, _) = truncate(prompt, PROMPT_PREVIEW_CHARS);
    PromptStats {
        total_chars: prompt.chars().count(),
        total_lines: prompt.matches('\n').count() + 1,
        section_count: prompt.matches(SECTION_SEPARATOR).count() + 1,
        preview,
    }
}

pub(crate) fn truncate(value: &str, limit: usize) -> (String, bool) {
    let mut out: String = value.chars().take(limit).collect();
    if value.chars().count() > limit {
        out.push_str("... (truncated)");
        (out, true)
    } else {
        (out, false)
    }
}
