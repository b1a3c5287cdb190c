use std::env;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use turnstamp_core::handle;

pub const STOP_DEADLINE: Duration = Duration::from_secs(2);
const STOP_GRACE: Duration = Duration::from_millis(200);
const HANDLE_POLL: Duration = Duration::from_millis(100);

enum StopSignal {
    Term,
    Kill,
}

/// Spawns the watcher as a detached background process: own process
/// group, null stdio, re-invoking this executable's hidden `watch`
/// subcommand. Returns as soon as the process exists; binding happens in
/// the background and is observed later through the handle file.
pub fn spawn_watcher(root: &Path, session: &str, poll_interval: Duration) -> io::Result<()> {
    let exe = env::current_exe()?;
    let mut cmd = Command::new(exe);
    cmd.arg("watch")
        .arg("--root")
        .arg(root)
        .arg("--session")
        .arg(session)
        .arg("--poll-interval-ms")
        .arg(poll_interval.as_millis().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let child = cmd.spawn()?;
    debug!("spawned watcher pid {}", child.id());
    Ok(())
}

/// Waits up to `deadline` for the handle file to be populated — `stop`
/// can race the watcher's discovery phase — then sends SIGTERM to the
/// recorded process group and, after a short grace period, SIGKILL
/// unconditionally. A watcher that never bound, or already exited, is
/// "nothing to stop". The handle file is removed regardless of outcome.
pub fn stop_watcher(handle_path: &Path, deadline: Duration) {
    let give_up_at = Instant::now() + deadline;
    let recorded = loop {
        if let Some(found) = handle::read_handle(handle_path) {
            break Some(found);
        }
        if Instant::now() >= give_up_at {
            break None;
        }
        std::thread::sleep(HANDLE_POLL);
    };

    let Some(recorded) = recorded else {
        info!("no watcher handle appeared; nothing to stop");
        handle::remove_handle(handle_path);
        return;
    };

    signal_watcher(recorded.pid, StopSignal::Term);
    std::thread::sleep(STOP_GRACE);
    signal_watcher(recorded.pid, StopSignal::Kill);
    handle::remove_handle(handle_path);
    debug!(
        "stopped watcher pid {} bound to {}",
        recorded.pid,
        recorded.target.display()
    );
}

/// Targets the whole process group so any children die with the watcher,
/// falling back to the single pid. Delivery errors are swallowed; the
/// process may already be gone.
#[cfg(unix)]
fn signal_watcher(pid: u32, signal: StopSignal) {
    let signo = match signal {
        StopSignal::Term => libc::SIGTERM,
        StopSignal::Kill => libc::SIGKILL,
    };
    let pid = pid as libc::pid_t;
    let rc = unsafe { libc::killpg(pid, signo) };
    if rc != 0 {
        unsafe {
            libc::kill(pid, signo);
        }
    }
}

#[cfg(not(unix))]
fn signal_watcher(_pid: u32, _signal: StopSignal) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use turnstamp_core::WatcherHandle;

    #[test]
    fn stop_without_handle_returns_cleanly_within_deadline() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("watcher-none.json");

        let started = Instant::now();
        stop_watcher(&path, Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!path.exists());
    }

    #[test]
    fn stop_cleans_up_an_unpopulated_remnant_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("watcher-empty.json");
        std::fs::write(&path, "").expect("write remnant");

        stop_watcher(&path, Duration::from_millis(50));
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn stop_terminates_the_recorded_process() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("watcher-live.json");

        let mut child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleeper");
        handle::write_handle(
            &path,
            &WatcherHandle {
                pid: child.id(),
                target: dir.path().join("chat.md"),
            },
        )
        .expect("write handle");

        stop_watcher(&path, Duration::from_millis(100));
        assert!(!path.exists());

        let status = child.wait().expect("reap sleeper");
        assert!(!status.success());
    }
}
