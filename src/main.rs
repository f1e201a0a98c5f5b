//! Janus CLI — thin front end over the library.
//!
//! Listen mode serves a socket until SIGINT:
//!   janus --socket /tmp/service.sock --listen --manifest manifest.json
//!
//! Send mode performs one exchange and prints the response JSON:
//!   janus --send-to /tmp/service.sock --request echo --message hello

use clap::Parser;
use janus::{JanusClient, JanusClientConfig, JanusServer, Manifest, ServerConfig};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "janus", version, about = "Connectionless Unix datagram IPC")]
struct Cli {
    /// Socket path to listen on (server mode)
    #[arg(long, requires = "listen")]
    socket: Option<String>,

    /// Run as a server on --socket
    #[arg(long)]
    listen: bool,

    /// Send one request to the server at this socket path (client mode)
    #[arg(long, conflicts_with = "listen")]
    send_to: Option<String>,

    /// Request name to send
    #[arg(long, default_value = "ping")]
    request: String,

    /// Attached as the `message` argument
    #[arg(long)]
    message: Option<String>,

    /// JSON manifest file describing the served contract
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Round-trip timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    if cli.listen {
        let socket = cli
            .socket
            .ok_or("--listen requires --socket <path>")?;
        serve(socket, cli.manifest).await?;
        return Ok(0);
    }

    let Some(target) = cli.send_to else {
        return Err("pass --listen (with --socket) or --send-to <path>".into());
    };
    send(target, cli.request, cli.message, cli.timeout).await
}

async fn serve(socket: String, manifest_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = match manifest_path {
        Some(path) => {
            let bytes = std::fs::read(&path)?;
            let manifest = Manifest::parse_json(&bytes)?;
            info!("📜 Manifest loaded: {} ({} requests)", path.display(), manifest.requests.len());
            manifest
        }
        None => Manifest::default(),
    };

    info!("🦀 Janus server starting...");
    info!("   IPC socket: {socket}");

    let server = Arc::new(JanusServer::new(socket, manifest, ServerConfig::default())?);

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.stop();
        }
    });

    server.listen().await?;
    Ok(())
}

async fn send(
    target: String,
    request: String,
    message: Option<String>,
    timeout: Option<f64>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let client = JanusClient::new(target, JanusClientConfig::default()).await?;

    let args = message.map(|m| {
        let mut args: HashMap<String, Value> = HashMap::new();
        args.insert("message".to_string(), Value::String(m));
        args
    });
    let timeout = timeout.map(Duration::from_secs_f64);

    let response = client.send_request(&request, args, timeout).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    client.close();

    Ok(if response.success { 0 } else { 1 })
}
