use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tracing_subscriber::EnvFilter;

use sightline_gateway::api::{ApiServer, ApiState};
use sightline_gateway::session::RealtimeWsEngine;
use sightline_gateway::transport::{ChannelLink, StreamPacket, StreamReassembler};
use sightline_gateway::{Config, Daemon};

/// Packets buffered per stream subscriber before it is considered lagging
const PACKET_BUFFER: usize = 1024;

/// Sightline - camera-aware gateway for realtime voice assistants
#[derive(Parser)]
#[command(name = "sightline", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "SIGHTLINE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Receive a participant's frame stream and save completed frames
    Receive {
        /// Stream endpoint, e.g. ws://127.0.0.1:18790/api/participants/alice/stream
        #[arg(long)]
        url: String,
        /// Directory to write frames into
        #[arg(long, default_value = "frames")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,sightline_gateway=info",
        1 => "info,sightline_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::Receive { url, out }) = cli.command {
        return receive(&url, &out).await;
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if config.realtime.api_key.is_none() {
        tracing::warn!("no realtime API key configured; participants cannot join");
    }

    let host = config.server.host.clone();
    let port = config.server.port;
    let engine = Arc::new(RealtimeWsEngine::new(&config.realtime)?);
    let link = ChannelLink::new(PACKET_BUFFER);
    let daemon = Arc::new(Daemon::new(config, engine, Arc::new(link.clone()))?);

    tracing::info!(%host, port, "starting sightline gateway");

    let server = ApiServer::new(
        ApiState {
            daemon: Arc::clone(&daemon),
            packets: Some(link),
        },
        host,
        port,
    );
    server.run(shutdown_signal()).await?;

    daemon.shutdown().await;
    tracing::info!("sightline gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Reassemble frames from a stream endpoint until it closes or ctrl-c
async fn receive(url: &str, out: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("creating {}", out.display()))?;

    let (mut socket, _response) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    tracing::info!(url, out = %out.display(), "receiving frames");

    let mut reassembler = StreamReassembler::new();
    let mut saved = 0usize;

    loop {
        let message = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            message = socket.next() => message,
        };

        let text = match message {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(_)) => continue,
        };

        let packet: StreamPacket = match serde_json::from_str(&text) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed packet");
                continue;
            }
        };

        match reassembler.accept(packet) {
            Ok(Some(frame)) => {
                let path = out.join(format!("{}.jpg", frame.stream_id));
                tokio::fs::write(&path, &frame.payload)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                saved += 1;
                tracing::info!(
                    topic = %frame.topic,
                    bytes = frame.payload.len(),
                    path = %path.display(),
                    "frame received"
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "discarding stream"),
        }
    }

    let incomplete = reassembler.drain_incomplete();
    if !incomplete.is_empty() {
        tracing::warn!(count = incomplete.len(), "discarding unterminated streams");
    }
    tracing::info!(saved, "receiver stopped");
    Ok(())
}
