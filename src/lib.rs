use anyhow::{anyhow, Result};
use clap::CommandFactory;
use clap::Parser;
use std::env;
use std::io::IsTerminal;

mod cli;
mod constants;
pub mod context;
pub mod history;
mod input;
mod logger;
pub mod protocol;
mod run;

pub use context::ContextBuilder;
pub use history::{sanitize_history, sanitize_history_with_report, DropEvent, SanitizeReport};
pub use protocol::{ContentPart, ImageUrl, Message, Role, ToolCall, ToolFunction};

pub fn run_cli() -> Result<()> {
    let raw_args: Vec<String> = env::args().collect();
    let bare_on_terminal = raw_args.len() == 1 && std::io::stdin().is_terminal();
    if bare_on_terminal || (raw_args.len() == 2 && raw_args[1] == "help") {
        let mut cmd = crate::cli::Args::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    }

    let args = crate::cli::Args::parse();
    let rendered = crate::run::run_sanitize(&args)
        .map_err(|e| anyhow!("failed to sanitize history: {:#}", e))?;
    if args.output.is_some() {
        return Ok(());
    }
    println!("{rendered}");
    Ok(())
}
