use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use turnstamp_core::{handle, paths, sync, tslog, ProjectPaths, WatcherHandle};

/// Producer timestamps are compared against the discovery snapshot with a
/// small slack so an equal-looking mtime never counts as activity.
const MTIME_EPSILON: Duration = Duration::from_micros(1);

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    pub session: String,
    pub poll_interval: Duration,
}

/// Watcher process body: discover the transcript the wrapped tool is
/// writing, publish a handle so the supervisor can stop us, then poll
/// every transcript for newly arrived turns until signaled.
///
/// Discovery has no timeout by contract; the wrapped tool's startup
/// latency is unbounded. It is cancelable via the same stop signal used
/// while polling.
pub async fn run(cfg: WatchConfig) -> Result<()> {
    let project = ProjectPaths::new(&cfg.root);
    let history = project.history_dir();
    let mut stop = Box::pin(stop_signal());

    let snapshot = scan_mtimes(&history);
    info!(
        "discovering: waiting for a new or growing transcript in {}",
        history.display()
    );
    let target = loop {
        if let Some(found) = select_bind_target(&snapshot, &scan_mtimes(&history)) {
            break found;
        }
        tokio::select! {
            _ = tokio::time::sleep(cfg.poll_interval) => {}
            _ = &mut stop => {
                info!("stop requested before any transcript appeared");
                return Ok(());
            }
        }
    };

    let log_path = tslog::log_path_for(&target)?;
    tslog::touch(&log_path)?;
    handle::write_handle(
        &project.handle_path(&cfg.session),
        &WatcherHandle {
            pid: std::process::id(),
            target: target.clone(),
        },
    )?;
    info!("bound to {}", target.display());

    loop {
        let now = Utc::now();
        for transcript in project.transcripts() {
            // A file the producer is mid-writing may vanish or half-read;
            // next tick re-derives everything from scratch.
            if let Err(err) = poll_transcript(&transcript, now) {
                debug!("poll_retry for {}: {err}", transcript.display());
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(cfg.poll_interval) => {}
            _ = &mut stop => break,
        }
    }
    info!("stopped");
    Ok(())
}

fn poll_transcript(transcript: &Path, now: DateTime<Utc>) -> turnstamp_core::Result<()> {
    let log_path = tslog::log_path_for(transcript)?;
    tslog::touch(&log_path)?;
    let appended = sync::record_new_turns(transcript, now)?;
    if appended > 0 {
        debug!("recorded {appended} turn(s) for {}", transcript.display());
    }
    Ok(())
}

fn scan_mtimes(history_dir: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut mtimes = HashMap::new();
    for path in paths::list_transcripts(history_dir).unwrap_or_default() {
        if let Ok(modified) = fs::metadata(&path).and_then(|meta| meta.modified()) {
            mtimes.insert(path, modified);
        }
    }
    mtimes
}

/// A transcript qualifies as the bind target when it is new since the
/// snapshot or its mtime advanced past the snapshot by more than the
/// epsilon. Among qualifiers the most recently modified wins.
fn select_bind_target(
    snapshot: &HashMap<PathBuf, SystemTime>,
    current: &HashMap<PathBuf, SystemTime>,
) -> Option<PathBuf> {
    current
        .iter()
        .filter(|(path, modified)| match snapshot.get(*path) {
            None => true,
            Some(baseline) => **modified > *baseline + MTIME_EPSILON,
        })
        .max_by_key(|(_, modified)| **modified)
        .map(|(path, _)| path.clone())
}

#[cfg(unix)]
async fn stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(_) => return std::future::pending().await,
    };
    let mut int = match signal(SignalKind::interrupt()) {
        Ok(stream) => stream,
        Err(_) => return std::future::pending().await,
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(not(unix))]
async fn stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
