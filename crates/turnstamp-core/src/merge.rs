use crate::sync;
use crate::transcript::{self, HEADER_PREFIX, HEADER_SUFFIX};
use crate::tslog::{self, LogEntry, TIMESTAMP_FORMAT};
use crate::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Headers rewritten in place; counts cover this pass only.
    Merged { stamped: usize, backfilled: usize },
    /// No user-authored content: log cleared, transcript untouched.
    NoUserContent,
}

/// One-shot post-processing for a single transcript, run after the
/// watcher has been stopped. Backfills log entries the watcher missed,
/// then splices each entry's timestamp into the matching turn header.
///
/// Headers and log entries are both produced in increasing file-position
/// and wall-clock order, so entries are consumed positionally, one per
/// header line. A header that already carries a timestamp suffix consumes
/// its entry without being rewritten, which makes repeated merges
/// byte-identical while turns appended after an earlier merge still pair
/// with their own entries.
pub fn merge_file(transcript_path: &Path, now: DateTime<Utc>) -> Result<MergeOutcome> {
    let log_path = tslog::log_path_for(transcript_path)?;
    tslog::touch(&log_path)?;

    let lines = transcript::normalized_lines(transcript_path)?;
    if !transcript::has_user_content(&lines) {
        tslog::clear(&log_path)?;
        return Ok(MergeOutcome::NoUserContent);
    }

    let backfilled = sync::record_new_turns(transcript_path, now)?;
    let entries = tslog::read_entries(&log_path)?;

    let mut consumed = 0usize;
    let mut stamped = 0usize;
    let mut output = Vec::with_capacity(lines.len());
    for line in &lines {
        if transcript::is_turn_header(line) && consumed < entries.len() {
            let label = &line[HEADER_PREFIX.len()..line.len() - HEADER_SUFFIX.len()];
            if label_has_timestamp(label) {
                consumed += 1;
                output.push(line.clone());
            } else {
                let entry: &LogEntry = &entries[consumed];
                consumed += 1;
                stamped += 1;
                output.push(format!(
                    "{HEADER_PREFIX}{label} ({}){HEADER_SUFFIX}",
                    entry.timestamp
                ));
            }
        } else {
            output.push(line.clone());
        }
    }

    // Atomic replace: a crash mid-rewrite must never truncate the
    // transcript the producer wrote.
    let tmp_path = transcript_path.with_file_name(format!(
        "{}.tmp",
        transcript_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    fs::write(&tmp_path, output.join("\n"))?;
    fs::rename(&tmp_path, transcript_path)?;

    Ok(MergeOutcome::Merged { stamped, backfilled })
}

/// Merges every transcript in the history dir; a failure on one file is
/// logged and never blocks the rest. Returns how many files merged.
pub fn merge_all(history_dir: &Path, now: DateTime<Utc>) -> usize {
    let transcripts = match crate::paths::list_transcripts(history_dir) {
        Ok(transcripts) => transcripts,
        Err(err) => {
            warn!("history_scan_error: {err}");
            return 0;
        }
    };
    let mut merged = 0;
    for path in transcripts {
        match merge_file(&path, now) {
            Ok(outcome) => {
                debug!("merged {}: {outcome:?}", path.display());
                merged += 1;
            }
            Err(err) => warn!("merge_error for {}: {err}", path.display()),
        }
    }
    merged
}

/// True when a header label already ends in a `(<timestamp>)` suffix in
/// the log's own format, e.g. `User (2025-08-26T09:15:00Z)`.
fn label_has_timestamp(label: &str) -> bool {
    let Some(rest) = label.strip_suffix(')') else {
        return false;
    };
    let Some((_, candidate)) = rest.rsplit_once(" (") else {
        return false;
    };
    NaiveDateTime::parse_from_str(candidate, TIMESTAMP_FORMAT).is_ok()
}
