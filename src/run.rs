use crate::cli::Args;
use crate::context::{prompt_stats, ContextBuilder};
use crate::history::{sanitize_history_with_report, SanitizeReport};
use crate::input::{load_history, load_system_prompt};
use crate::logger::Logger;
use crate::protocol::Message;
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

/// Runs one sanitize (or assemble) pass and returns the rendered JSON.
pub(crate) fn run_sanitize(args: &Args) -> Result<String> {
    let run_id = Uuid::new_v4().to_string();
    let log_path = resolve_log_path(args, &run_id);
    let mut logger = Logger::new(run_id, log_path, args.stream_log)?;

    let mode = if args.assembling() {
        "assemble"
    } else {
        "sanitize"
    };
    logger.log_event(&json!({
        "type": "run.started",
        "mode": mode,
        "source": source_name(args),
    }))?;

    match sanitize_input(args, &mut logger) {
        Ok((rendered, report)) => {
            logger.log_event(&json!({
                "type": "run.completed",
                "input_messages": report.input_len,
                "output_messages": report.output_len,
                "dropped": report.dropped(),
            }))?;
            Ok(rendered)
        }
        Err(err) => {
            // Best-effort: the original error matters more than a failed log write.
            let _ = logger.log_event(&json!({
                "type": "run.failed",
                "error": { "message": format!("{err:#}") },
            }));
            Err(err)
        }
    }
}

fn sanitize_input(args: &Args, logger: &mut Logger) -> Result<(String, SanitizeReport)> {
    let history = load_history(args.history.as_deref())?;
    logger.log_event(&json!({
        "type": "history.loaded",
        "messages": history.len(),
    }))?;

    let (messages, report) = match &args.message {
        Some(message) => assemble(args, &history, message, logger)?,
        None => sanitize_history_with_report(&history),
    };

    for (seq, event) in report.events.iter().enumerate() {
        logger.log_event(&json!({
            "type": "history.message_dropped",
            "seq": seq,
            "event": event,
        }))?;
    }

    if args.report {
        eprintln!("{}", serde_json::to_string(&report)?);
    }

    let rendered = if args.pretty {
        serde_json::to_string_pretty(&messages)?
    } else {
        serde_json::to_string(&messages)?
    };

    if let Some(output) = &args.output {
        fs::write(output, format!("{rendered}\n"))
            .with_context(|| format!("failed to write output {}", output.display()))?;
    }

    Ok((rendered, report))
}

fn assemble(
    args: &Args,
    history: &[Message],
    message: &str,
    logger: &mut Logger,
) -> Result<(Vec<Message>, SanitizeReport)> {
    let builder = ContextBuilder::new(load_system_prompt(args)?);
    let channel = args.channel.as_deref().unwrap_or("");
    let chat_id = args.chat_id.as_deref().unwrap_or("");

    logger.log_event(&json!({
        "type": "context.system_prompt",
        "stats": prompt_stats(&builder.system_prompt(channel, chat_id)),
    }))?;

    Ok(builder.build_messages_with_report(
        history,
        args.summary.as_deref().unwrap_or(""),
        message,
        &args.media,
        channel,
        chat_id,
    ))
}

fn resolve_log_path(args: &Args, run_id: &str) -> Option<PathBuf> {
    if let Some(path) = &args.log_path {
        return Some(path.clone());
    }
    let log_dir = args.log_dir.as_ref()?;
    // Unique per run so concurrent invocations never share a file.
    let now = OffsetDateTime::now_utc();
    let rfc3339 = now
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown-time".to_string());
    let safe_ts = rfc3339.replace(':', "-");
    Some(log_dir.join(format!("sanitize-{}-{}.jsonl", safe_ts, run_id)))
}

fn source_name(args: &Args) -> String {
    match &args.history {
        Some(path) if path.as_os_str() != "-" => path.display().to_string(),
        _ => "stdin".to_string(),
    }
}
