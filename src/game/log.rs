use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::routing::GameLog;

/// Appends game logs to a file, one line per entry.
#[derive(Debug, Clone)]
pub struct GameLogWriter {
    path: PathBuf,
}

impl GameLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_log(&self, log: &GameLog) -> io::Result<()> {
        tracing::info!(username = %log.username, "received game log: {}", log.message);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", format_line(log))
    }
}

fn format_line(log: &GameLog) -> String {
    format!(
        "{} {}: {}",
        log.current_time.to_rfc3339(),
        log.username,
        log.message
    )
}
