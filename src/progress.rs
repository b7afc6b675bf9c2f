//! Discovery and enrichment progress reporting.
//!
//! Progress goes to **stderr** so the run summary on stdout stays
//! parseable by scripts. Human output is one line per event; JSON output
//! is one object per line.

use std::io::Write;

use serde_json::json;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A discovery sub-window is being scanned. `count` is the search
    /// total for the window, `index` is 1-based.
    Window {
        window: String,
        count: u64,
        index: usize,
        windows: usize,
    },
    /// Repository `n` of `total` is being enriched.
    Enriching { repo: String, n: u64, total: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr:
/// `discover 2024-01-01..2024-01-07  [3/24]  812 repositories`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Window {
                window,
                count,
                index,
                windows,
            } => format!(
                "discover {}  [{}/{}]  {} repositories\n",
                window,
                index,
                windows,
                format_number(*count)
            ),
            ProgressEvent::Enriching { repo, n, total } => format!(
                "enrich {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                repo
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
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Window {
                window,
                count,
                index,
                windows,
            } => json!({
                "event": "progress",
                "phase": "discovering",
                "window": window,
                "count": count,
                "index": index,
                "windows": windows
            }),
            ProgressEvent::Enriching { repo, n, total } => json!({
                "event": "progress",
                "phase": "enriching",
                "repo": repo,
                "n": n,
                "total": total
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
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
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

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
