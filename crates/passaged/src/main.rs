//! passaged - Main entry point.
//!
//! Serves secrets from the platform keychain over a Unix socket at
//! `~/.passage.sock`, caching every secret it has fetched until it receives
//! `SIGUSR1`.
//!
//! ```bash
//! # Ask for a secret
//! echo '{"Account":"me@example.com","Service":"smtp.example.com"}' | nc -U ~/.passage.sock
//!
//! # Forget all cached secrets after rotating one
//! pkill -USR1 passaged
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};

use passage_core::{Config, KeyringStore};
use passaged::{Daemon, SignalListener, UserSocket};

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Local secret broker that caches keychain lookups.
#[derive(Parser)]
#[command(name = "passaged")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file [default: ~/.config/passage/config.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Path to Unix socket [default: ~/.passage.sock]
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Filter directive selected by `-q` and `-v`.
    fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn setup_logging(level: &str) {
    // RUST_LOG takes precedence over the CLI flags
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Started as a systemd user service: log to the journal with native priorities
    if std::env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald_layer)
                .with(filter)
                .init();
            return;
        }
    }

    // Started from a shell or a login script
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.log_level());

    info!(version = env!("CARGO_PKG_VERSION"), "Starting passaged");

    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from specified path");
            Config::load_from(path).context("Failed to load configuration")?
        }
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            if let Some(path) = Config::default_path() {
                if path.exists() {
                    info!(path = %path.display(), "Loaded configuration");
                } else {
                    debug!("No config file found, using defaults");
                }
            }
            config
        }
    };

    let socket_path = cli
        .socket
        .or_else(|| config.socket_path())
        .context("Cannot determine home directory for the socket path")?;

    // Signal handlers must be in place before the socket file exists
    let signals = SignalListener::install().context("Failed to subscribe to signals")?;
    let socket = UserSocket::new(&socket_path)
        .bind()
        .with_context(|| format!("Failed to listen on {}", socket_path.display()))?;

    let daemon = Daemon::with_config(KeyringStore::new(), &config);
    if let Err(e) = daemon.run(socket, signals).await {
        error!(error = %e, "Daemon error");
        return Err(e);
    }

    Ok(())
}
