//! hashwatch - per-file content hash history tracker.
//!
//! # Commands
//!
//! - `hashwatch check <PATH>`: Record the file's current hash once
//! - `hashwatch watch <PATH>`: Poll the file until interrupted
//! - `hashwatch history <PATH>`: Print the recorded hash history
//! - `hashwatch shell`: Interactive prompt with background watching
//!
//! # Environment Variables
//!
//! See `hashwatch::config` for available configuration options.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hashwatch::config::Config;
use hashwatch::reconcile::Reconciler;
use hashwatch::report::{describe_decision, describe_event, format_history};
use hashwatch::session::{WatchEvent, WatchSession};
use hashwatch::store::HistoryStore;

/// Capacity of the watch event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// hashwatch - keep track of file integrity using SHA-256 hashing.
///
/// Records a file's hash history: a new entry when the content changes,
/// a refreshed timestamp when it does not.
#[derive(Parser, Debug)]
#[command(name = "hashwatch")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    HASHWATCH_HOME             Base directory for .hashwatch/ (default: home directory)
    HASHWATCH_INTERVAL_SECS    Seconds between watch polls (default: 5)
    HASHWATCH_RETRY_SECS       Seconds to wait after a read error (default: 3)
    RUST_LOG                   Log filter (default: warn)

EXAMPLES:
    # Record the current hash of a file
    hashwatch check ./config.toml

    # Watch a file until Ctrl+C
    hashwatch watch ./config.toml

    # Show everything recorded so far
    hashwatch history ./config.toml
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Compute and record the hash of a file once, then print its history.
    Check {
        /// File to hash.
        path: PathBuf,
    },

    /// Continuously monitor a file for changes.
    ///
    /// Runs until Ctrl+C, which stops the watch and exits cleanly.
    Watch {
        /// File to watch.
        path: PathBuf,
    },

    /// Print the complete hash history of a file, oldest first.
    History {
        /// File whose history to print.
        path: PathBuf,
    },

    /// Start an interactive prompt.
    ///
    /// Lets a file be watched in the background while other files are
    /// checked, and the watch stopped with `stopwatch`.
    Shell,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;
    debug!(
        history_dir = %config.history_dir().display(),
        "Configuration loaded"
    );
    let reconciler = Reconciler::new(Arc::new(HistoryStore::open(&config)));

    match cli.command {
        Command::Check { path } => run_check(&reconciler, &path),
        Command::History { path } => run_history(&reconciler, &path),
        Command::Watch { path } => {
            build_runtime()?.block_on(run_watch(reconciler, config, path))
        }
        Command::Shell => build_runtime()?.block_on(run_shell(reconciler, config)),
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

/// Runs a one-shot check and prints the resulting history.
fn run_check(reconciler: &Reconciler, path: &Path) -> Result<()> {
    let result = reconciler
        .check(path)
        .with_context(|| format!("Failed to check {}", path.display()))?;

    println!("{}", describe_decision(result.decision, &result.entry));
    println!();
    run_history(reconciler, path)
}

/// Prints the recorded history of a file.
fn run_history(reconciler: &Reconciler, path: &Path) -> Result<()> {
    let history = reconciler
        .history(path)
        .with_context(|| format!("Failed to load history for {}", path.display()))?;
    println!("{}", format_history(&history));
    Ok(())
}

/// Watches a file in the foreground until a shutdown signal arrives.
async fn run_watch(reconciler: Reconciler, config: Config, path: PathBuf) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<WatchEvent>(EVENT_CHANNEL_CAPACITY);
    let session = WatchSession::new(reconciler, config.watch).with_events(tx);

    session.start(&path).await?;
    println!("Now watching: {}", path.display());

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    let mut halted = None;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }

            Some(event) = rx.recv() => {
                println!("{}", describe_event(&event));
                if let WatchEvent::Halted { message, .. } = event {
                    halted = Some(message);
                    break;
                }
            }
        }
    }

    if session.is_watching().await {
        session.stop().await?;
    }
    println!("Stopped watching the file.");

    match halted {
        Some(message) => Err(anyhow!(message)),
        None => Ok(()),
    }
}

/// A parsed line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ShellCommand {
    Check(PathBuf),
    Watch(PathBuf),
    StopWatch,
    History(PathBuf),
    Help,
    Exit,
    Empty,
    Invalid(String),
}

fn parse_shell_command(line: &str) -> ShellCommand {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match (head, rest) {
        ("", _) => ShellCommand::Empty,
        ("exit" | "quit", "") => ShellCommand::Exit,
        ("help", "") => ShellCommand::Help,
        ("stopwatch", "") => ShellCommand::StopWatch,
        ("watch" | "history", "") => ShellCommand::Invalid(format!("usage: {head} <file-path>")),
        ("watch", path) => ShellCommand::Watch(PathBuf::from(path)),
        ("history", path) => ShellCommand::History(PathBuf::from(path)),
        _ => ShellCommand::Check(PathBuf::from(line)),
    }
}

/// Runs the interactive prompt.
async fn run_shell(reconciler: Reconciler, config: Config) -> Result<()> {
    let (tx, mut rx) = mpsc::channel::<WatchEvent>(EVENT_CHANNEL_CAPACITY);
    let session = WatchSession::new(reconciler.clone(), config.watch).with_events(tx);
    let mut lines = spawn_line_reader(BufReader::new(io::stdin()))
        .context("Failed to start input reader")?;

    print_intro();
    prompt()?;

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                println!();
                break;
            }

            Some(event) = rx.recv() => {
                println!("{}", describe_event(&event));
            }

            line = lines.recv() => {
                let Some(line) = line.transpose().context("Failed to read input")? else {
                    break;
                };
                match parse_shell_command(&line) {
                    ShellCommand::Exit => break,
                    command => run_shell_command(&reconciler, &session, command).await,
                }
                prompt()?;
            }
        }
    }

    if session.is_watching().await {
        session.stop().await?;
    }
    println!("Exiting.");
    Ok(())
}

/// Executes one shell command, printing rejections and errors instead of
/// ending the session.
async fn run_shell_command(reconciler: &Reconciler, session: &WatchSession, command: ShellCommand) {
    let outcome = match command {
        ShellCommand::Check(path) => {
            let reconciler = reconciler.clone();
            run_blocking(move || run_check(&reconciler, &path)).await
        }
        ShellCommand::History(path) => {
            let reconciler = reconciler.clone();
            run_blocking(move || run_history(&reconciler, &path)).await
        }
        ShellCommand::Watch(path) => session
            .start(&path)
            .await
            .map(|()| println!("Now watching: {}", path.display()))
            .map_err(Into::into),
        ShellCommand::StopWatch => session
            .stop()
            .await
            .map(|path| println!("Stopped watching {}.", path.display()))
            .map_err(Into::into),
        ShellCommand::Help => {
            print_help();
            Ok(())
        }
        ShellCommand::Invalid(message) => Err(anyhow!(message)),
        ShellCommand::Empty | ShellCommand::Exit => Ok(()),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
    }
}

/// Runs file I/O for a shell command on the blocking pool.
async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Shell command task failed")?
}

/// Reads lines on a dedicated thread and forwards them to the returned
/// channel. The channel closes at end of input.
///
/// The thread is detached, so a read still pending at shutdown does not keep
/// the runtime or the process alive.
fn spawn_line_reader<R>(mut reader: R) -> io::Result<mpsc::Receiver<io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    thread::Builder::new()
        .name("hashwatch-input".to_string())
        .spawn(move || loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.blocking_send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        })?;

    Ok(rx)
}

fn prompt() -> Result<()> {
    print!("\n> ");
    io::stdout().flush().context("Failed to flush stdout")
}

fn print_intro() {
    println!("hashwatch - file hash history");
    println!("-----------------------------");
    println!("Keep track of file integrity using SHA-256 hashing.");
    println!("Type 'help' anytime to see all commands.");
    println!();
    print_help();
}

fn print_help() {
    println!("Commands:");
    println!("  <file-path>          Compute and record the hash of a file once");
    println!("  watch <file-path>    Monitor a file for changes in the background");
    println!("  stopwatch            Stop watching the current file");
    println!("  history <file-path>  Show the recorded hash history of a file");
    println!("  help                 Show this help");
    println!("  exit                 Quit");
    println!();
    println!("Notes:");
    println!("  - When a file's hash is unchanged, only its timestamp is updated.");
    println!("  - Only one file can be watched at a time.");
}

/// Initializes the logging subsystem. Logs go to stderr so they never mix
/// with command output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(io::stderr)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
