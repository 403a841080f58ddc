//! Client subcommands: one connection, one operation, one line of output.

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use ferry::transport::stream;
use ferry::{Args, Bridge, ChainHandle, Connection, Options, ProxyKind, RemoteObject, Value};
use tokio::net::TcpStream;

use crate::DEFAULT_ADDR;

/// Arguments shared by every client subcommand.
#[derive(ClapArgs)]
pub(crate) struct PathArgs {
    /// Dotted path into the remote context; empty for the context itself.
    #[arg(default_value = "")]
    path: String,

    /// Server address.
    #[arg(long, default_value = DEFAULT_ADDR)]
    connect: String,
}

#[derive(ClapArgs)]
pub(crate) struct CallArgs {
    #[command(flatten)]
    target: PathArgs,

    /// Positional arguments.
    args: Vec<String>,
}

#[derive(ClapArgs)]
pub(crate) struct ReprArgs {
    #[command(flatten)]
    target: PathArgs,

    /// Print the display (`String()`) form instead.
    #[arg(long)]
    string: bool,
}

pub(crate) async fn get(args: PathArgs, options: Options) -> Result<()> {
    let (conn, handle) = open(&args, options).await?;
    let value = handle.await?;
    println!("{}", show(&value).await?);
    conn.close();
    Ok(())
}

pub(crate) async fn call(args: CallArgs, options: Options, construct: bool) -> Result<()> {
    let (conn, handle) = open(&args.target, options).await?;
    let values = args.args.iter().map(|a| parse_arg(a)).collect::<Vec<_>>();
    let out = if construct {
        handle.construct(Args::from(values)).await?
    } else {
        handle.call(Args::from(values)).await?
    };
    println!("{}", show(&out).await?);
    conn.close();
    Ok(())
}

pub(crate) async fn keys(args: PathArgs, options: Options) -> Result<()> {
    let (conn, handle) = open(&args, options).await?;
    for key in handle.keys().await? {
        println!("{key}");
    }
    conn.close();
    Ok(())
}

pub(crate) async fn repr(args: ReprArgs, options: Options) -> Result<()> {
    let (conn, handle) = open(&args.target, options).await?;
    let text = if args.string {
        handle.to_display().await?
    } else {
        handle.repr().await?
    };
    println!("{text}");
    conn.close();
    Ok(())
}

/// Connects and builds a lazy handle for `path`.
async fn open(args: &PathArgs, options: Options) -> Result<(Connection, ChainHandle)> {
    let socket = TcpStream::connect(&args.connect)
        .await
        .with_context(|| format!("connecting to {}", args.connect))?;
    let (transport, inbound) = stream::split(socket);
    let conn = Bridge::builder()
        .options(options)
        .proxy(ProxyKind::Chain)
        .transport(transport, inbound)
        .start()?;
    let handle = args
        .path
        .split('.')
        .filter(|s| !s.is_empty())
        .fold(conn.root(), |h, seg| h.attr(seg));
    Ok((conn, handle))
}

/// JSON if it parses, otherwise the word as a string.
fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).map_or_else(|_| Value::from(raw), Value::from_json)
}

/// Plain values print locally; remote ones ask their owner.
async fn show(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Remote(p) => p.repr().await?,
        plain => plain.repr(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_json_or_words() {
        assert_eq!(parse_arg("42"), Value::from(42));
        assert_eq!(parse_arg("\"quoted\""), Value::from("quoted"));
        assert_eq!(parse_arg("bare"), Value::from("bare"));
        assert!(parse_arg("[1,2]").as_array().is_some_and(|a| a.len() == 2));
    }
}
