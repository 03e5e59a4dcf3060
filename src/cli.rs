use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sanitize-history",
    version,
    about = "Repair a chat transcript so every tool-call turn is fully answered.",
    long_about = "Reads a chat history (JSON array or JSONL), removes orphaned tool results and \
incomplete tool-call groups, merges consecutive user turns, and writes the result as JSON. \
With --message, wraps the repaired history into a full request transcript."
)]
pub(crate) struct Args {
    #[arg(
        value_name = "FILE",
        help = "History file (JSON array or JSONL). Reads stdin when omitted or `-`."
    )]
    pub(crate) history: Option<PathBuf>,

    #[arg(
        long,
        short = 'o',
        value_name = "FILE",
        help = "Write the result here instead of stdout."
    )]
    pub(crate) output: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Pretty-print the JSON result.")]
    pub(crate) pretty: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Print the drop report as JSON to stderr."
    )]
    pub(crate) report: bool,

    #[arg(
        long,
        env = "SANITIZE_LOG_DIR",
        help = "Directory to write the JSONL event log."
    )]
    pub(crate) log_dir: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Path to write the JSONL event log (overrides --log-dir)."
    )]
    pub(crate) log_path: Option<PathBuf>,

    #[arg(
        long,
        default_value_t = false,
        help = "Stream JSONL events to stderr as they occur."
    )]
    pub(crate) stream_log: bool,

    #[arg(
        long,
        value_name = "TEXT",
        help = "New user message; switches output to the full request transcript."
    )]
    pub(crate) message: Option<String>,

    #[arg(
        long,
        value_name = "TEXT",
        conflicts_with = "system_prompt_file",
        help = "System prompt text for the request transcript."
    )]
    pub(crate) system_prompt: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Read the system prompt from a file."
    )]
    pub(crate) system_prompt_file: Option<PathBuf>,

    #[arg(long, help = "Running summary of earlier conversation.")]
    pub(crate) summary: Option<String>,

    #[arg(
        long,
        value_name = "URL",
        action = ArgAction::Append,
        help = "Image reference to attach to the new user message (repeatable)."
    )]
    pub(crate) media: Vec<String>,

    #[arg(long, help = "Channel the conversation belongs to.")]
    pub(crate) channel: Option<String>,

    #[arg(long, help = "Chat ID within the channel.")]
    pub(crate) chat_id: Option<String>,
}

impl Args {
    pub(crate) fn assembling(&self) -> bool {
        self.message.is_some()
    }
}
