use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voice_relay::{RelayConfig, RelayServer, ToolRegistry, demo};

/// Relay phone-call media sockets to a realtime voice model.
#[derive(Parser, Debug)]
#[command(name = "voice-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address to accept media sockets on
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Realtime model name
    #[arg(long)]
    model: Option<String>,

    /// Assistant voice
    #[arg(long)]
    voice: Option<String>,

    /// System instructions for the assistant
    #[arg(long)]
    instructions: Option<String>,

    /// Include failure messages in tool outputs sent to the model
    #[arg(long)]
    detailed_tool_errors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let config = load_config(cli)?;

    let server = build_server(&config);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
            }
            cancel.cancel();
        }
    });

    Arc::new(server).serve(listener, cancel).await?;
    Ok(())
}

/// Server with the demo tools. Transcripts are only logged; the in-memory
/// store would grow for the life of the process.
fn build_server(config: &RelayConfig) -> RelayServer {
    let mut tools = ToolRegistry::new();
    demo::register(&mut tools);
    RelayServer::from_config(config, tools)
}

fn load_config(cli: Cli) -> anyhow::Result<RelayConfig> {
    let mut config = RelayConfig::from_env().context("Invalid relay configuration")?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(voice) = cli.voice {
        config.voice = voice;
    }
    if cli.instructions.is_some() {
        config.instructions = cli.instructions;
    }
    config.detailed_tool_errors |= cli.detailed_tool_errors;
    config.validate()?;
    Ok(config)
}
