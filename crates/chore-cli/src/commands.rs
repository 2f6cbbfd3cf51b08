//! Console commands → work items.

use std::time::Duration;

use chore_core::{ItemError, WorkItem};
use tracing::info;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sleep for the given time, honoring cancellation.
    Sleep(Duration),
    /// Fail with the given message.
    Fail(String),
    /// Panic with the given message.
    Panic(String),
    /// Log the text.
    Echo(String),
    /// Stop reading input and drain the queue.
    Quit,
}

impl Command {
    /// Parse a console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let cmd = match verb {
            "sleep" => {
                let ms: u64 = rest
                    .parse()
                    .map_err(|e| format!("sleep expects milliseconds: {e}"))?;
                Command::Sleep(Duration::from_millis(ms))
            }
            "fail" => Command::Fail(non_empty(rest, "failed on request")),
            "panic" => Command::Panic(non_empty(rest, "panicked on request")),
            "quit" | "exit" => Command::Quit,
            _ => Command::Echo(line.to_string()),
        };
        Ok(Some(cmd))
    }

    /// Build the work item for this command. `Quit` has none.
    pub fn into_item(self) -> Option<WorkItem> {
        let item = match self {
            Command::Sleep(duration) => WorkItem::new(move |cancel| async move {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        info!(ms = duration.as_millis() as u64, "slept");
                        Ok(())
                    }
                    _ = cancel.cancelled() => Err(ItemError::Cancelled),
                }
            })
            .with_label(format!("sleep {}ms", duration.as_millis())),
            Command::Fail(msg) => {
                let label = format!("fail {msg}");
                WorkItem::new(move |_| async move { Err(ItemError::Failed(msg)) }).with_label(label)
            }
            Command::Panic(msg) => {
                let label = format!("panic {msg}");
                WorkItem::blocking(move |_| panic!("{msg}")).with_label(label)
            }
            Command::Echo(text) => {
                let label = format!("echo {text}");
                WorkItem::new(move |_| async move {
                    info!(%text, "echo");
                    Ok(())
                })
                .with_label(label)
            }
            Command::Quit => return None,
        };
        Some(item)
    }
}

fn non_empty(s: &str, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s.to_string()
    }
}

/// Item enqueued by the periodic trigger.
pub fn heartbeat(tick: u64) -> WorkItem {
    WorkItem::new(move |_| async move {
        info!(tick, "heartbeat");
        Ok(())
    })
    .with_label(format!("heartbeat #{tick}"))
}
