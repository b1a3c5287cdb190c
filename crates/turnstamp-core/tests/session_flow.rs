use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use turnstamp_core::{merge, sync, tslog, MergeOutcome, ProjectPaths};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_756_200_000 + secs, 0)
        .single()
        .expect("valid test timestamp")
}

fn stamp(secs: i64) -> String {
    tslog::format_timestamp(ts(secs))
}

fn write_transcript(paths: &ProjectPaths, name: &str, text: &str) -> PathBuf {
    let history = paths.history_dir();
    fs::create_dir_all(&history).expect("history dir");
    let path = history.join(name);
    fs::write(&path, text).expect("write transcript");
    path
}

/// Simulates a full session: the producer appends turns between watcher
/// poll ticks, the watcher stops, and the merge sweep stamps everything
/// in arrival order.
#[test]
fn turns_arrive_tick_by_tick_and_merge_in_order() {
    let dir = TempDir::new().expect("temp dir");
    let paths = ProjectPaths::new(dir.path());

    let path = write_transcript(&paths, "chat.md", "_**User**_\n\nhi\n");
    sync::record_new_turns(&path, ts(0)).expect("tick 1");

    fs::write(&path, "_**User**_\n\nhi\n\n_**Agent**_\n\nhello\n").expect("grow");
    sync::record_new_turns(&path, ts(12)).expect("tick 2");

    fs::write(
        &path,
        "_**User**_\n\nhi\n\n_**Agent**_\n\nhello\n\n_**User**_\n\nbye\n",
    )
    .expect("grow");
    sync::record_new_turns(&path, ts(47)).expect("tick 3");

    let outcome = merge::merge_file(&path, ts(60)).expect("merge");
    assert_eq!(
        outcome,
        MergeOutcome::Merged {
            stamped: 3,
            backfilled: 0
        }
    );

    let text = fs::read_to_string(&path).expect("read");
    let expected = format!(
        "_**User ({})**_\n\nhi\n\n_**Agent ({})**_\n\nhello\n\n_**User ({})**_\n\nbye\n",
        stamp(0),
        stamp(12),
        stamp(47),
    );
    assert_eq!(text, expected);
}

/// The i-th content-bearing header receives the i-th log entry's
/// timestamp, even when the watcher missed the tail and merge backfills.
#[test]
fn partial_observation_still_stamps_every_header() {
    let dir = TempDir::new().expect("temp dir");
    let paths = ProjectPaths::new(dir.path());

    let path = write_transcript(
        &paths,
        "chat.md",
        "_**User**_\n\none\n\n_**Agent**_\n\ntwo\n\n_**User**_\n\nthree\n\n_**Agent**_\n\nfour\n",
    );
    // Watcher saw only the first two turns.
    let log = tslog::log_path_for(&path).expect("log path");
    tslog::append_entries(
        &log,
        &[
            tslog::LogEntry::new(ts(0), "one"),
            tslog::LogEntry::new(ts(5), "two"),
        ],
    )
    .expect("append");

    let outcome = merge::merge_file(&path, ts(100)).expect("merge");
    assert_eq!(
        outcome,
        MergeOutcome::Merged {
            stamped: 4,
            backfilled: 2
        }
    );

    let text = fs::read_to_string(&path).expect("read");
    assert!(text.contains(&format!("_**User ({})**_", stamp(0))));
    assert!(text.contains(&format!("_**Agent ({})**_", stamp(5))));
    assert_eq!(text.matches(&format!("({})", stamp(100))).count(), 2);
}

/// Several transcripts touched in one run all get their own log and
/// their own merge; an agent-only file is cleared, not stamped.
#[test]
fn merge_sweep_handles_mixed_sessions() {
    let dir = TempDir::new().expect("temp dir");
    let paths = ProjectPaths::new(dir.path());

    let interactive =
        write_transcript(&paths, "interactive.md", "_**User**_\n\nquestion\n");
    let automated = write_transcript(&paths, "automated.md", "_**Agent**_\n\nbatch output\n");

    sync::record_new_turns(&interactive, ts(0)).expect("tick");
    sync::record_new_turns(&automated, ts(0)).expect("tick");

    assert_eq!(merge::merge_all(&paths.history_dir(), ts(30)), 2);

    let text = fs::read_to_string(&interactive).expect("read");
    assert!(text.contains(&format!("_**User ({})**_", stamp(0))));

    let untouched = fs::read_to_string(&automated).expect("read");
    assert_eq!(untouched, "_**Agent**_\n\nbatch output\n");
    let automated_log = tslog::log_path_for(&automated).expect("log path");
    assert!(tslog::read_entries(&automated_log)
        .expect("read log")
        .is_empty());
}

/// Running the whole pipeline twice changes nothing the second time.
#[test]
fn repeated_merges_are_stable() {
    let dir = TempDir::new().expect("temp dir");
    let paths = ProjectPaths::new(dir.path());

    let path = write_transcript(
        &paths,
        "chat.md",
        "_**User**_\n\nhi\n\n_**Agent**_\n\nhello\n",
    );
    sync::record_new_turns(&path, ts(0)).expect("tick");
    merge::merge_file(&path, ts(10)).expect("first merge");
    let first = fs::read_to_string(&path).expect("read");

    for round in 0..3 {
        merge::merge_file(&path, ts(100 + round)).expect("re-merge");
    }
    assert_eq!(fs::read_to_string(&path).expect("read"), first);
}
