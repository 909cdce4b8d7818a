use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

const LOG_FILE: &str = "wardenpatch_log.jsonl";
const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Serialize)]
pub struct LogEntry<'a> {
    pub timestamp: &'a str,
    pub level: Level,
    pub event: &'a str,
    pub path: &'a Path,
    pub message: &'a str,
}

/// JSON Lines log kept next to the save it describes.
#[derive(Debug, Clone)]
pub struct PatchLog {
    log_path: PathBuf,
    document: PathBuf,
}

impl PatchLog {
    pub fn beside(document: &Path) -> Self {
        let dir = document
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self {
            log_path: dir.join(LOG_FILE),
            document: document.to_path_buf(),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    pub fn record(&self, level: Level, event: &str, message: &str) -> Result<()> {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let entry = LogEntry {
            timestamp: &timestamp,
            level,
            event,
            path: &self.document,
            message,
        };
        let json = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.log_path)
            .with_context(|| format!("opening {:?}", self.log_path))?;
        writeln!(file, "{json}")?;
        truncate_log(&self.log_path)?;
        Ok(())
    }

    pub fn info(&self, event: &str, message: &str) {
        let _ = self.record(Level::Info, event, message);
    }

    pub fn warn(&self, event: &str, message: &str) {
        println!("warning: {message}");
        let _ = self.record(Level::Warn, event, message);
    }

    pub fn error(&self, event: &str, message: &str) {
        let _ = self.record(Level::Error, event, message);
    }
}

fn truncate_log(path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("reading {path:?}"))?;
    let reader = BufReader::new(file);
    let lines: Vec<_> = reader.lines().collect::<Result<_, _>>()?;
    if lines.len() <= MAX_ENTRIES {
        return Ok(());
    }
    let keep = &lines[lines.len() - MAX_ENTRIES..];
    fs::write(path, keep.join("\n") + "\n")?;
    Ok(())
}
