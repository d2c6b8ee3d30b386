//! tailhub - command-line client for the tailhub daemon
//!
//! # Usage
//!
//! ```text
//! tailhub track ./app.log --id app        # follow a file
//! tailhub track '/var/log/api-*.log'      # follow the newest match of a pattern
//! tailhub list                            # tracked logs
//! tailhub read app -n 50                  # last 50 buffered lines
//! tailhub search -r 'ERROR|WARN'          # search every buffer
//! tailhub follow app                      # stream new lines
//! tailhub untrack app
//! ```
//!
//! The daemon socket is taken from `--socket`, then `TAILHUB_SOCKET`, then
//! `/tmp/tailhub.sock`.

use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use tailhub_cli::{render, ClientError, DaemonClient};
use tailhub_core::{LogSource, SearchQuery, DEFAULT_SEARCH_LIMIT};
use tailhub_protocol::DaemonMessage;
use tailhubd::config::{DEFAULT_SOCKET_PATH, ENV_SOCKET};

// ============================================================================
// CLI Arguments
// ============================================================================

/// tailhub - follow, read and search live log files
#[derive(Parser, Debug)]
#[command(name = "tailhub")]
#[command(version, about)]
struct Args {
    /// Daemon socket path
    #[arg(long, short = 'S', global = true, env = ENV_SOCKET, default_value = DEFAULT_SOCKET_PATH)]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tracked logs
    #[command(alias = "ls")]
    List,

    /// Start following a file or glob pattern
    Track {
        /// File path or pattern (`*`, `?`, `[...]`); relative paths use the current directory
        source: String,

        /// Short name to refer to the log by
        #[arg(long = "id")]
        friendly_id: Option<String>,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// Stop following a log
    #[command(alias = "rm")]
    Untrack {
        /// Friendly id or full log id
        log: String,
    },

    /// Print buffered lines
    Read {
        log: String,

        /// Number of most recent lines (all buffered lines when omitted)
        #[arg(short = 'n', long)]
        lines: Option<usize>,

        /// Prefix each line with its sequence number
        #[arg(long)]
        numbered: bool,
    },

    /// Search buffered lines
    Search {
        pattern: String,

        /// Match case exactly
        #[arg(short = 's', long)]
        case_sensitive: bool,

        /// Treat the pattern as a regular expression
        #[arg(short = 'r', long)]
        regex: bool,

        /// Only search this log
        #[arg(long)]
        log: Option<String>,

        /// Maximum number of hits
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },

    /// Show everything known about one log
    Describe { log: String },

    /// Set or remove a log's friendly id and description
    Label {
        log: String,

        /// New friendly id (omit to remove)
        #[arg(long = "id")]
        friendly_id: Option<String>,

        /// New description (omit to remove)
        #[arg(long)]
        description: Option<String>,
    },

    /// Drop a log's buffered lines
    Clear { log: String },

    /// Stream new lines as they arrive
    #[command(alias = "tail")]
    Follow {
        log: String,

        /// Buffered lines to print first
        #[arg(short = 'n', long, default_value_t = 10)]
        lines: usize,
    },

    /// Check that the daemon answers
    Ping,
}

// ============================================================================
// Entry point
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        if let Some(ClientError::DaemonConnection(_)) = e.downcast_ref::<ClientError>() {
            eprintln!("hint: start the daemon with `tailhubd start -d`");
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut client = DaemonClient::connect(&args.socket).await?;
    debug!(client_id = client.client_id(), "Connected");

    match args.command {
        Command::List => {
            let logs = client.list_logs().await?;
            print!("{}", render::log_table(&logs, Utc::now()));
        }
        Command::Track {
            source,
            friendly_id,
            description,
        } => {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            let source = LogSource::from_input(&source, &cwd)?;
            let summary = client
                .track(&source.to_string(), friendly_id, description)
                .await?;
            println!("Tracking {} ({})", summary.display_name(), summary.status);
        }
        Command::Untrack { log } => {
            if client.untrack(&log).await? {
                println!("Untracked {log}");
            } else {
                println!("{log} was not tracked");
            }
        }
        Command::Read {
            log,
            lines,
            numbered,
        } => {
            let (_, lines) = client.read_log(&log, lines).await?;
            print!("{}", render::lines(&lines, numbered));
        }
        Command::Search {
            pattern,
            case_sensitive,
            regex,
            log,
            limit,
        } => {
            let query = SearchQuery::literal(pattern)
                .case_sensitive(case_sensitive)
                .regex(regex)
                .limit(limit);
            let results = client.search(query, log).await?;
            print!("{}", render::hits(&results));
        }
        Command::Describe { log } => {
            let logs = client.list_logs().await?;
            let found = logs
                .iter()
                .find(|s| s.friendly_id.as_deref() == Some(log.as_str()))
                .or_else(|| logs.iter().find(|s| s.id.as_str() == log));
            match found {
                Some(summary) => print!("{}", render::describe(summary, Utc::now())),
                None => anyhow::bail!("log not found: {log}"),
            }
        }
        Command::Label {
            log,
            friendly_id,
            description,
        } => {
            let summary = client.set_metadata(&log, friendly_id, description).await?;
            println!("Updated {}", summary.display_name());
        }
        Command::Clear { log } => {
            let summary = client.clear_log(&log).await?;
            println!("Cleared {}", summary.display_name());
        }
        Command::Follow { log, lines } => {
            follow(&mut client, &log, lines).await?;
            return Ok(());
        }
        Command::Ping => {
            let rtt = client.ping().await?;
            println!("pong from {} in {:.2?}", args.socket.display(), rtt);
        }
    }

    client.disconnect().await?;
    Ok(())
}

/// Prints events for one log until it is untracked, the daemon goes away,
/// or Ctrl+C.
async fn follow(client: &mut DaemonClient, log: &str, backlog: usize) -> Result<()> {
    let (id, _) = client.subscribe(log, backlog).await?;
    debug!(log = %id, "Following");

    let mut stdout = std::io::stdout();
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = client.next_event() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(ClientError::Closed) => {
                eprintln!("-- daemon closed the connection");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(text) = render::event(&event) {
            writeln!(stdout, "{text}")?;
            stdout.flush()?;
        }
        if matches!(event, DaemonMessage::LogRemoved { .. }) {
            return Ok(());
        }
    }
}
