mod client;
mod error;
mod protocol;
mod signing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use client::{ClientConfig, Outcome};
use protocol::{CommandKind, PathPolicy, Request};

#[derive(Parser)]
#[command(name = "notebook-client")]
#[command(about = "Send one command to a notebook execution server and print its response")]
struct Cli {
    /// Port the server listens on
    port: u16,

    /// Host the server listens on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Shared secret; when set, requests are HMAC-signed
    #[arg(short, long, env = "NOTEBOOK_CLIENT_KEY", hide_env_values = true)]
    key: Option<String>,

    /// How relative notebook paths are handled
    #[arg(long, value_enum, default_value_t = PathPolicy::ResolveRelative)]
    path_policy: PathPolicy,

    /// Give up after this many seconds (default: wait indefinitely)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Pretty-print the response instead of echoing it as received
    #[arg(long, default_value = "false")]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a notebook, waiting through progress updates
    Run {
        /// Notebook file
        path: Option<String>,
    },

    /// Close an open notebook
    Close {
        /// Notebook file
        path: Option<String>,
    },

    /// Stop the server
    Stop,

    /// Check whether a notebook is open
    #[command(name = "isopen")]
    IsOpen {
        /// Notebook file
        path: Option<String>,
    },

    /// Check whether the server is ready
    #[command(name = "isready")]
    IsReady,

    /// Query server status
    Status,
}

impl Commands {
    fn kind_and_arg(&self) -> (CommandKind, Option<&str>) {
        match self {
            Commands::Run { path } => (CommandKind::Run, path.as_deref()),
            Commands::Close { path } => (CommandKind::Close, path.as_deref()),
            Commands::Stop => (CommandKind::Stop, None),
            Commands::IsOpen { path } => (CommandKind::IsOpen, path.as_deref()),
            Commands::IsReady => (CommandKind::IsReady, None),
            Commands::Status => (CommandKind::Status, None),
        }
    }
}

#[tokio::main]
async fn main() {
    // stdout is reserved for the server's response
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("notebook_client=warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (kind, arg) = cli.command.kind_and_arg();

    // Validate before touching the network
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    let request = Request::new(kind, arg, cli.path_policy, &cwd)?;

    let config = ClientConfig {
        host: cli.host,
        port: cli.port,
        key: cli.key.map(String::into_bytes),
        timeout: cli.timeout.map(Duration::from_secs),
    };

    match client::execute(&config, &request).await? {
        Outcome::Terminal(response) => {
            if cli.pretty {
                println!("{}", response.to_pretty()?);
            } else {
                println!("{}", response.raw);
            }
        }
        Outcome::Closed => {
            if kind != CommandKind::Stop {
                warn!(%kind, "Connection closed without a response");
            }
        }
    }

    Ok(())
}
