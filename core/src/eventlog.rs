//! Append-only event log.
//!
//! One line per event: `[YYYY-mm-dd HH:MM:SS] [LEVEL] message`. The file is
//! opened in append mode for every line, so overlapping cycles may interleave
//! lines but never tear them. Every entry is mirrored to `tracing`.
//!
//! Writing the log is never fatal: a failed append is reported through
//! `tracing::warn!` and dropped.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
        }
    }
}


#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
    persist_debug: bool,
}


impl EventLog {
    pub fn new(path: &Path, persist_debug: bool) -> Self {
        EventLog {
            path: path.to_path_buf(),
            persist_debug,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debug(&self, message: &str) {
        self.write(Level::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.write(Level::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.write(Level::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.write(Level::Error, message);
    }

    pub fn write(&self, level: Level, message: &str) {
        match level {
            Level::Debug => tracing::debug!("{}", message),
            Level::Info => tracing::info!("{}", message),
            Level::Warning => tracing::warn!("{}", message),
            Level::Error => tracing::error!("{}", message),
        }
        if level == Level::Debug && !self.persist_debug {
            return;
        }
        if let Err(e) = self.append(&format_line(level, message)) {
            tracing::warn!(path = %self.path.display(), "event log append failed: {}", e);
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // Single write call per line keeps O_APPEND writes whole.
        f.write_all(line.as_bytes())
    }

    /// The last `n` lines of the log, oldest first. Missing log → empty.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].iter().map(|l| l.to_string()).collect()
    }
}


fn format_line(level: Level, message: &str) -> String {
    let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    // Keep the one-line-per-event shape even for multi-line messages.
    let flat = message.replace('\n', " ");
    format!("[{}] [{}] {}\n", ts, level.as_str(), flat)
}
