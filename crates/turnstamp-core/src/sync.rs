use crate::transcript;
use crate::tslog::{self, LogEntry};
use crate::Result;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Core detection step, shared by the watcher poll tick and the
/// merge-time backfill: re-parse the whole transcript, and if its log
/// holds fewer entries than the file holds content-bearing turns, append
/// one record per newly appeared turn at `now`.
///
/// Assignment is driven by turn-count growth, never by diffing text, so a
/// turn is stamped the moment it first acquires meaningful content.
/// Returns the number of entries appended.
pub fn record_new_turns(transcript_path: &Path, now: DateTime<Utc>) -> Result<usize> {
    let lines = transcript::normalized_lines(transcript_path)?;
    let turns = transcript::parse_lines(&lines);
    let snippets = transcript::content_snippets(&turns);

    let log_path = tslog::log_path_for(transcript_path)?;
    let existing = tslog::read_entries(&log_path)?;
    if existing.len() >= snippets.len() {
        return Ok(0);
    }

    let fresh: Vec<LogEntry> = snippets[existing.len()..]
        .iter()
        .map(|snippet| LogEntry::new(now, snippet))
        .collect();
    tslog::append_entries(&log_path, &fresh)?;
    Ok(fresh.len())
}
