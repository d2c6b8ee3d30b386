//! tailhub daemon - follows tracked log files and serves them to clients
//!
//! This binary runs as a background daemon. It tails every tracked file or
//! glob pattern, keeps a bounded buffer per log, and answers list, read,
//! search and subscribe requests over a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! tailhubd start
//!
//! # Start the daemon (background/daemonized)
//! tailhubd start -d
//!
//! # Start with an explicit config file
//! tailhubd start --config ./tailhub.toml
//!
//! # Stop the daemon
//! tailhubd stop
//!
//! # Check daemon status
//! tailhubd status
//!
//! # Start with custom socket path
//! TAILHUB_SOCKET=/run/tailhub.sock tailhubd start
//!
//! # Enable debug logging
//! RUST_LOG=tailhubd=debug tailhubd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Save the session, stop monitors, remove the socket

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tailhubd::config::{state_dir, DaemonConfig, LogFormat};
use tailhubd::registry::spawn_registry;
use tailhubd::server::DaemonServer;
use tailhubd::session::{self, SessionFile};

/// tailhub daemon - live log tail hub
#[derive(Parser, Debug)]
#[command(name = "tailhubd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Config file (defaults to <config dir>/tailhub/config.toml)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("tailhubd.pid")
}

/// Returns the path to the log file used when daemonized.
fn log_file_path() -> PathBuf {
    state_dir().join("tailhubd.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is already running, clearing a stale PID file.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    let Ok(raw) = i32::try_from(pid) else {
        bail!("Invalid PID {pid}");
    };
    let result = unsafe { libc::kill(raw, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {pid}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        config: None,
    });

    match command {
        Command::Start { daemon, config } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'tailhubd stop' to stop it first.");
                process::exit(1);
            }

            // Load before forking so config errors reach the terminal
            let config = DaemonConfig::load(config.as_deref()).context("Failed to load configuration")?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();
            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // Wait for process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");

                if let Ok(config) = DaemonConfig::load(None) {
                    if config.daemon.socket_path.exists() {
                        println!("Socket: {}", config.daemon.socket_path.display());
                    }
                    println!("Session: {}", config.session_file().display());
                }
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process, sending output to the log file.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Initializes tracing in the configured format.
fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("tailhubd=info".parse()?)
        .add_directive("tailhub_core=info".parse()?)
        .add_directive("tailhub_protocol=info".parse()?);

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
    Ok(())
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    init_logging(config.daemon.log_format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "tailhub daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry(config.registry.clone(), config.monitor.clone())
        .context("Failed to start log registry")?;
    info!(
        buffer_lines = config.registry.buffer_lines,
        max_logs = config.registry.max_logs,
        "Log registry started"
    );

    let session_path = config.session_file();
    let saving = match SessionFile::load_or_set_aside(&session_path) {
        Some(saved) => {
            session::restore(&registry, &saved).await;
            true
        }
        None => false,
    };

    let autosave = (saving && config.daemon.autosave)
        .then(|| session::spawn_autosave(registry.clone(), session_path.clone(), cancel_token.child_token()));

    let server = DaemonServer::new(&config.daemon.socket_path, registry.clone(), cancel_token.clone());
    info!(socket = %config.daemon.socket_path.display(), "Starting server");

    let served = server.run().await;
    cancel_token.cancel();

    if let Some(task) = autosave {
        let _ = task.await;
    }
    if saving {
        match session::save_current(&registry, &session_path).await {
            Ok(saved) => info!(logs = saved, path = %session_path.display(), "Session saved"),
            Err(e) => warn!(error = %e, "Failed to save session on shutdown"),
        }
    }
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Registry did not shut down cleanly");
    }

    if let Err(e) = served {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("tailhub daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
