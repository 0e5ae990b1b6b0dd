//! Ingestion progress reporting.
//!
//! Reports what `pcl update` is doing: fetching, extracting, then one
//! `FileStarted`/`FileDone` pair per data file with a file counter that only
//! moves forward. Progress goes to **stderr** so stdout remains parseable
//! for scripts. It is informational and plays no part in correctness.

use std::io::Write;

/// A single progress event emitted by the ingestion pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    /// Archive download (or copy) has begun.
    Fetching { source: String },
    /// Archive unpacked; `files` data files will be processed.
    Extracted { files: usize },
    /// Starting file `index` (1-based) of `total`.
    FileStarted {
        index: usize,
        total: usize,
        file: String,
    },
    /// Finished file `index` of `total`.
    FileDone {
        index: usize,
        total: usize,
        rows: u64,
        skipped: u64,
    },
}

/// Receives ingestion progress. Implementations write to stderr (human or
/// JSON) or discard.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "update  [3/120]  ab.csv  1,234 rows".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Fetching { source } => format!("update  fetching {}\n", source),
            IngestProgressEvent::Extracted { files } => {
                format!("update  extracted {} data files\n", format_number(*files as u64))
            }
            IngestProgressEvent::FileStarted { index, total, file } => {
                format!("update  [{}/{}]  {}\n", index, total, file)
            }
            IngestProgressEvent::FileDone {
                index,
                total,
                rows,
                skipped,
            } => format!(
                "update  [{}/{}]  {} rows, {} skipped\n",
                index,
                total,
                format_number(*rows),
                format_number(*skipped)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &IngestProgressEvent) -> serde_json::Value {
        match event {
            IngestProgressEvent::Fetching { source } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "source": source
            }),
            IngestProgressEvent::Extracted { files } => serde_json::json!({
                "event": "progress",
                "phase": "extracted",
                "files": files
            }),
            IngestProgressEvent::FileStarted { index, total, file } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": index,
                "total": total,
                "file": file
            }),
            IngestProgressEvent::FileDone {
                index,
                total,
                rows,
                skipped,
            } => serde_json::json!({
                "event": "progress",
                "phase": "processed",
                "n": index,
                "total": total,
                "rows": rows,
                "skipped": skipped
            }),
        }
    }
}

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
