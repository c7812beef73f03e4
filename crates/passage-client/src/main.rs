//! passage - Thin client for the passage daemon.
//!
//! Asks the daemon for the secret stored under a service and account and
//! prints it to stdout without a trailing newline, which makes it usable
//! from mail clients and shell scripts:
//!
//! ```bash
//! passage smtp.example.com me@example.com
//! ```
//!
//! Exits with a failure status if the daemon answers with nothing.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use passage_core::{default_socket_path, Request};
use zeroize::Zeroize;

/// Fetch a secret from the passage daemon.
#[derive(Parser)]
#[command(name = "passage")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the daemon's Unix socket [default: ~/.passage.sock]
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Service the secret is stored under
    service: String,

    /// Account the secret is stored under
    account: String,
}

/// Send a request to the daemon and read the reply until it hangs up.
fn fetch_secret(socket_path: &Path, request: &Request) -> Result<Vec<u8>> {
    let mut stream = UnixStream::connect(socket_path)
        .with_context(|| format!("Failed to connect to daemon at {:?}", socket_path))?;

    let request_json = request.to_json().context("Failed to serialize request")?;
    stream
        .write_all(request_json.as_bytes())
        .context("Failed to send request")?;
    stream.flush().context("Failed to flush request")?;

    let mut secret = Vec::new();
    stream
        .read_to_end(&mut secret)
        .context("Failed to read response")?;
    Ok(secret)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let socket_path = cli
        .socket
        .or_else(default_socket_path)
        .context("Cannot determine home directory for the socket path")?;
    let request = Request::new(cli.account, cli.service);

    let mut secret = fetch_secret(&socket_path, &request)?;
    if secret.is_empty() {
        eprintln!(
            "Error: no secret for service {:?}, account {:?}",
            request.service(),
            request.account()
        );
        return Ok(ExitCode::FAILURE);
    }

    let mut stdout = std::io::stdout().lock();
    let written = stdout.write_all(&secret).and_then(|()| stdout.flush());
    secret.zeroize();
    written.context("Failed to write secret to stdout")?;

    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
