use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};
use turnstamp_core::{merge, ProjectPaths};

mod supervisor;
mod watcher;

#[derive(Parser, Debug)]
#[command(
    name = "turnstamp",
    version,
    about = "Wraps a transcript-producing CLI and stamps each conversational turn with its arrival time"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a tool with turn timestamping and merge on exit
    Run(RunArgs),
    /// Merge recorded timestamps into transcript headers
    Merge(MergeArgs),
    /// Background watcher process (started internally by `run`)
    #[command(hide = true)]
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Project root holding .specstory (defaults to the current directory)
    #[arg(long, default_value = "")]
    root: String,
    /// Watcher poll interval in milliseconds
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,
    /// The wrapped tool and its arguments
    #[arg(last = true)]
    cmd: Vec<String>,
}

#[derive(Args, Debug)]
struct MergeArgs {
    #[arg(long, default_value = "")]
    root: String,
    /// Merge a single transcript instead of the whole history directory
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long, default_value = "")]
    root: String,
    /// Session id assigned by the supervising `run` process
    #[arg(long)]
    session: String,
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run_wrapped(args).await,
        Command::Merge(args) => run_merge(args),
        Command::Watch(args) => run_watch(args).await,
    };
    std::process::exit(code);
}

/// Start watcher -> run the tool in the foreground -> stop watcher ->
/// merge. The tool's exit status is returned unchanged; every
/// synchronization failure is logged and contained.
async fn run_wrapped(args: RunArgs) -> i32 {
    let root = resolve_root(&args.root);
    let paths = ProjectPaths::new(&root);
    let session = uuid::Uuid::new_v4().to_string();
    let _log_guard = init_logging(&paths, "run", &session);

    if args.cmd.is_empty() {
        error!("missing command to wrap");
        eprintln!("turnstamp: missing command to wrap (usage: turnstamp run -- <tool> [args...])");
        return 1;
    }

    let poll_interval = Duration::from_millis(args.poll_interval_ms.max(1));
    if let Err(err) = fs::create_dir_all(paths.timestamps_dir()) {
        warn!("timestamps_dir_error: {err}");
    }
    if let Err(err) = supervisor::spawn_watcher(paths.root(), &session, poll_interval) {
        warn!("watcher_spawn_error: {err}; turns will be backfilled at merge time");
    }

    let status = run_tool(&args.cmd).await;

    // Let the watcher observe the tool's final writes, then make sure it
    // is gone before the rewrite starts so it cannot record the merge.
    tokio::time::sleep(poll_interval * 5).await;
    supervisor::stop_watcher(&paths.handle_path(&session), supervisor::STOP_DEADLINE);
    tokio::time::sleep(poll_interval * 2).await;

    let merged = merge::merge_all(&paths.history_dir(), Utc::now());
    info!("merged {merged} transcript(s)");

    status
}

fn run_merge(args: MergeArgs) -> i32 {
    let root = resolve_root(&args.root);
    let paths = ProjectPaths::new(&root);
    let _log_guard = init_logging(&paths, "merge", "manual");
    let now = Utc::now();
    match args.file {
        Some(file) => match merge::merge_file(&file, now) {
            Ok(outcome) => {
                info!("merged {}: {outcome:?}", file.display());
                0
            }
            Err(err) => {
                error!("merge_failed for {}: {err}", file.display());
                eprintln!("turnstamp: merge failed: {err}");
                1
            }
        },
        None => {
            let merged = merge::merge_all(&paths.history_dir(), now);
            info!("merged {merged} transcript(s)");
            0
        }
    }
}

async fn run_watch(args: WatchArgs) -> i32 {
    let root = resolve_root(&args.root);
    let paths = ProjectPaths::new(&root);
    let _log_guard = init_logging(&paths, "watch", &args.session);
    let cfg = watcher::WatchConfig {
        root,
        session: args.session,
        poll_interval: Duration::from_millis(args.poll_interval_ms.max(1)),
    };
    match watcher::run(cfg).await {
        Ok(()) => 0,
        Err(err) => {
            error!("watcher_failed: {err:#}");
            1
        }
    }
}

async fn run_tool(cmd: &[String]) -> i32 {
    let mut child = match tokio::process::Command::new(&cmd[0]).args(&cmd[1..]).spawn() {
        Ok(child) => child,
        Err(err) => {
            error!("spawn_failed for {}: {err}", cmd[0]);
            eprintln!("turnstamp: failed to run {}: {err}", cmd[0]);
            return 127;
        }
    };
    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => exit_code(status),
                    Err(err) => {
                        error!("wait_failed: {err}");
                        1
                    }
                };
            }
            _ = tokio::signal::ctrl_c() => {
                // The tool shares the foreground process group and received
                // the same SIGINT; keep waiting so stop + merge still run.
            }
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

fn resolve_root(flag: &str) -> PathBuf {
    if !flag.trim().is_empty() {
        return PathBuf::from(flag);
    }
    if let Ok(value) = env::var("TURNSTAMP_ROOT") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

struct LogGuard {
    _file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout_enabled: bool,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stdout_enabled {
            let _ = io::stdout().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.stdout_enabled {
            let _ = io::stdout().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

/// Logs go to a per-mode file under the runtime dir; stdout echo is
/// opt-in via TURNSTAMP_LOG_STDOUT so the wrapped tool's terminal stays
/// clean.
fn init_logging(paths: &ProjectPaths, component: &str, session: &str) -> Option<LogGuard> {
    let level = env::var("TURNSTAMP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let file = open_log_file(&paths.log_dir(), component, session);
    let stdout_enabled = resolve_log_stdout();
    let writer_file = file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter {
        stdout_enabled,
        file: writer_file.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(LogGuard { _file: file })
}

fn open_log_file(dir: &Path, component: &str, session: &str) -> Option<Arc<Mutex<std::fs::File>>> {
    if fs::create_dir_all(dir).is_err() {
        return None;
    }
    let path = dir.join(format!(
        "turnstamp-{component}-{}.log",
        sanitize_component(session)
    ));
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
        .map(|file| Arc::new(Mutex::new(file)))
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn resolve_log_stdout() -> bool {
    matches!(
        env::var("TURNSTAMP_LOG_STDOUT").as_deref().map(str::trim),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes") | Ok("YES")
    )
}
