use crate::cli::Args;
use crate::constants::DEFAULT_SYSTEM_PROMPT;
use crate::protocol::Message;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

pub(crate) fn load_history(path: Option<&Path>) -> Result<Vec<Message>> {
    let mut buf = String::new();
    match path {
        Some(path) if path != Path::new("-") => {
            File::open(path)
                .with_context(|| format!("failed to open history file {}", path.display()))?
                .read_to_string(&mut buf)
                .with_context(|| format!("failed to read history file {}", path.display()))?;
        }
        _ => {
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read history from stdin")?;
        }
    }
    parse_history(&buf)
}

/// Accepts a JSON array of messages or one message per non-blank line.
pub(crate) fn parse_history(text: &str) -> Result<Vec<Message>> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).context("history is not a JSON array of messages");
    }

    let mut messages = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let msg: Message = serde_json::from_str(line)
            .with_context(|| format!("invalid message on history line {}", idx + 1))?;
        messages.push(msg);
    }
    Ok(messages)
}

pub(crate) fn load_system_prompt(args: &Args) -> Result<String> {
    if let Some(path) = &args.system_prompt_file {
        return fs::read_to_string(path)
            .with_context(|| format!("failed to read system prompt file {}", path.display()));
    }
    Ok(args
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()))
}
