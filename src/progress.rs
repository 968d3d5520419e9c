//! Ingestion progress reporting.
//!
//! Reports each document's state transitions during `ragline ingest` so
//! users see which file is being chunked, embedded, or indexed and how
//! many remain. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

use crate::ingest::IngestState;

/// A single progress event for an ingestion batch.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// A batch of `total` documents is about to be processed.
    Started { total: u64 },
    /// Document `position` (1-based) entered `state`.
    Transition {
        document_id: String,
        position: u64,
        total: u64,
        state: IngestState,
        /// Entry count for `Done`, error text for `Failed`.
        detail: Option<String>,
    },
    Finished { done: u64, failed: u64, entries: u64 },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest [2/5] policy.pdf  embedding".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Started { total } => {
                format!("ingest  {} document(s)\n", format_number(*total))
            }
            IngestProgressEvent::Transition {
                document_id,
                position,
                total,
                state,
                detail,
            } => match detail {
                Some(detail) => format!(
                    "ingest [{}/{}] {}  {}  ({})\n",
                    position, total, document_id, state, detail
                ),
                None => format!(
                    "ingest [{}/{}] {}  {}\n",
                    position, total, document_id, state
                ),
            },
            IngestProgressEvent::Finished {
                done,
                failed,
                entries,
            } => format!(
                "ingest  finished: {} done, {} failed, {} entries\n",
                format_number(*done),
                format_number(*failed),
                format_number(*entries)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Started { total } => serde_json::json!({
                "event": "started",
                "total": total
            }),
            IngestProgressEvent::Transition {
                document_id,
                position,
                total,
                state,
                detail,
            } => serde_json::json!({
                "event": "progress",
                "document_id": document_id,
                "n": position,
                "total": total,
                "state": state.as_str(),
                "detail": detail
            }),
            IngestProgressEvent::Finished {
                done,
                failed,
                entries,
            } => serde_json::json!({
                "event": "finished",
                "done": done,
                "failed": failed,
                "entries": entries
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
