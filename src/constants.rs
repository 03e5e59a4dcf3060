pub(crate) const SECTION_SEPARATOR: &str = "\n\n---\n\n";
pub(crate) const SESSION_HEADING: &str = "## Current Session";
pub(crate) const SUMMARY_HEADING: &str = "## Summary of Previous Conversation";
pub(crate) const PROMPT_PREVIEW_CHARS: usize = 500;
pub(crate) const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";
