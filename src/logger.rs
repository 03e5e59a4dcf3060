use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::rc::Rc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// JSONL event sink. Clones share the same writers.
#[derive(Clone)]
pub(crate) struct Logger {
    inner: Rc<RefCell<LoggerInner>>,
}

struct LoggerInner {
    run_id: String,
    file_writer: Option<BufWriter<File>>,
    stderr_writer: Option<BufWriter<std::io::Stderr>>,
}

impl Logger {
    pub(crate) fn new(
        run_id: String,
        log_path: Option<PathBuf>,
        stream_to_stderr: bool,
    ) -> Result<Self> {
        let file_writer = if let Some(log_path) = log_path {
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create log directory {}", parent.display())
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&log_path)
                .with_context(|| format!("failed to create log file {}", log_path.display()))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        let stderr_writer = if stream_to_stderr {
            Some(BufWriter::new(std::io::stderr()))
        } else {
            None
        };

        Ok(Self {
            inner: Rc::new(RefCell::new(LoggerInner {
                run_id,
                file_writer,
                stderr_writer,
            })),
        })
    }

    pub(crate) fn log_event(&mut self, event: &Value) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.file_writer.is_none() && inner.stderr_writer.is_none() {
            return Ok(());
        }

        let mut enriched = event.clone();
        if let Value::Object(obj) = &mut enriched {
            let now = OffsetDateTime::now_utc();
            let ts_ms = now.unix_timestamp_nanos() / 1_000_000;
            obj.entry("run_id").or_insert_with(|| json!(inner.run_id));
            obj.entry("timestamp_ms").or_insert_with(|| json!(ts_ms));
            obj.entry("timestamp").or_insert_with(|| {
                json!(now.format(&Rfc3339).unwrap_or_else(|_| ts_ms.to_string()))
            });
        }

        if let Some(w) = inner.file_writer.as_mut() {
            write_line(w, &enriched)?;
        }
        if let Some(w) = inner.stderr_writer.as_mut() {
            write_line(w, &enriched)?;
        }
        Ok(())
    }
}

fn write_line<W: Write>(w: &mut W, event: &Value) -> Result<()> {
    serde_json::to_writer(&mut *w, event)?;
    w.write_all(b"\n")?;
    w.flush()?;
    Ok(())
}
