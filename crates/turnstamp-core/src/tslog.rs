use crate::{Result, SyncError};
use chrono::{DateTime, SecondsFormat, Utc};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMPS_DIR_NAME: &str = "timestamps";
const LOG_EXTENSION: &str = "timestamps";

/// One recorded turn arrival: wall-clock time plus the turn's fingerprint
/// snippet, stored as `timestamp|snippet` on its own line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub snippet: String,
}

impl LogEntry {
    pub fn new(now: DateTime<Utc>, snippet: &str) -> Self {
        Self {
            timestamp: format_timestamp(now),
            snippet: snippet.to_string(),
        }
    }

    fn to_line(&self) -> String {
        format!("{}|{}", self.timestamp, self.snippet)
    }

    fn from_line(line: &str) -> Self {
        match line.split_once('|') {
            Some((timestamp, snippet)) => Self {
                timestamp: timestamp.trim().to_string(),
                snippet: snippet.to_string(),
            },
            None => Self {
                timestamp: line.to_string(),
                snippet: String::new(),
            },
        }
    }
}

pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Maps a transcript path to its timestamp log: a `timestamps/` directory
/// sibling to the transcript's own parent (the history dir), keyed by the
/// transcript's stem. Creates the directory if absent.
pub fn log_path_for(transcript: &Path) -> Result<PathBuf> {
    let absolute = absolutize(transcript);
    let history_dir = absolute
        .parent()
        .ok_or_else(|| SyncError::Layout(absolute.clone()))?;
    let base_dir = history_dir
        .parent()
        .ok_or_else(|| SyncError::Layout(absolute.clone()))?;
    let timestamps_dir = base_dir.join(TIMESTAMPS_DIR_NAME);
    fs::create_dir_all(&timestamps_dir)?;
    let stem = absolute
        .file_stem()
        .ok_or_else(|| SyncError::Layout(absolute.clone()))?
        .to_string_lossy();
    Ok(timestamps_dir.join(format!("{stem}.{LOG_EXTENSION}")))
}

/// Reads the log, collapsing adjacent duplicate lines into one logical
/// entry. An absent file reads as empty. The collapse guards the race
/// where the watcher and the merge-time backfill both observe the same
/// new turn in overlapping passes.
pub fn read_entries(path: &Path) -> Result<Vec<LogEntry>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut entries = Vec::new();
    let mut last: Option<String> = None;
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if last.as_deref() == Some(line) {
            continue;
        }
        entries.push(LogEntry::from_line(line));
        last = Some(line.to_string());
    }
    Ok(entries)
}

/// Appends entries and syncs before returning; the log must survive the
/// watcher being killed right after a poll tick.
pub fn append_entries(path: &Path, entries: &[LogEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for entry in entries {
        writeln!(file, "{}", entry.to_line())?;
    }
    file.sync_all()?;
    Ok(())
}

/// Truncates the log. Used only when a session turns out to hold no
/// user-authored content and watcher noise must be discarded.
pub fn clear(path: &Path) -> Result<()> {
    fs::write(path, "")?;
    Ok(())
}

/// Creates the log if absent without touching existing contents.
pub fn touch(path: &Path) -> Result<()> {
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}
