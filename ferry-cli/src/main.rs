//! CLI for the ferry remote-object bridge.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod client;
mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use ferry::transport::stream;
use ferry::{Bridge, Options};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default listen / connect address.
const DEFAULT_ADDR: &str = "127.0.0.1:7001";

#[derive(Parser)]
#[command(name = "ferry", version, about = "Remote-object bridge over TCP")]
struct Cli {
    /// Log every frame payload.
    #[arg(long, global = true)]
    debug: bool,

    /// JSON file with bridge options (`{"proxy": "chain", "debug": true}`).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the demo context to every peer that connects.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = DEFAULT_ADDR)]
        listen: String,
    },

    /// Read a value by dotted path, e.g. `config.name`.
    Get(client::PathArgs),

    /// Call a remote function; arguments are JSON, bare words are strings.
    Call(client::CallArgs),

    /// Construct an instance of a remote class.
    New(client::CallArgs),

    /// List the member names of a remote value.
    Keys(client::PathArgs),

    /// Print the owner's inspect form of a remote value.
    Repr(client::ReprArgs),

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    if let Err(e) = cli.dispatch().await {
        eprintln!("ferry: {e:#}");
        std::process::exit(1);
    }
}

/// Installs the stderr subscriber; `FERRY_LOG` overrides the default filter.
fn init_tracing(debug: bool) {
    let default = if debug {
        "info,ferry=debug,ferry_proto=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_env("FERRY_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        let options = self.options()?;
        match self.command {
            Command::Serve { listen } => serve(&listen, options).await,
            Command::Get(args) => client::get(args, options).await,
            Command::Call(args) => client::call(args, options, false).await,
            Command::New(args) => client::call(args, options, true).await,
            Command::Keys(args) => client::keys(args, options).await,
            Command::Repr(args) => client::repr(args, options).await,
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "ferry", &mut std::io::stdout());
                Ok(())
            }
        }
    }

    /// Options from `--config`, with `--debug` layered on top.
    fn options(&self) -> Result<Options> {
        let mut options = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Options::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => Options::default(),
        };
        options.debug |= self.debug;
        Ok(options)
    }
}

/// Accepts peers until interrupted; every peer shares one demo context.
async fn serve(addr: &str, options: Options) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let bridge = Bridge::builder()
        .context(demo::context())
        .options(options)
        .build();
    info!(%addr, proxy = %bridge.options().proxy, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted.context("accepting connection")?;
                let (transport, inbound) = stream::split(socket);
                let conn = bridge.attach(transport, inbound);
                info!(%peer, conn = conn.id(), "peer connected");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}
