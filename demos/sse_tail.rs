//! Tail a Server-Sent Events endpoint from the command line
use ag_ui_sse::{Callbacks, SseClient, SseClientConfig};
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sse-tail")]
#[command(about = "Connect to an SSE endpoint and print every event received")]
struct Cli {
    /// SSE endpoint URL
    url: String,

    /// Print each event as JSON instead of a one-line summary
    #[arg(long)]
    json: bool,

    /// Resume from this Last-Event-ID
    #[arg(long)]
    last_event_id: Option<String>,

    /// Maximum reconnect attempts (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_reconnect_attempts: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = SseClientConfig::new(cli.url).with_max_reconnect_attempts(cli.max_reconnect_attempts);
    if let Some(id) = cli.last_event_id {
        config = config.with_last_event_id(id);
    }
    config = config.with_callbacks(Callbacks {
        on_connect: Some(Arc::new(|| tracing::info!("connected"))),
        on_reconnect: Some(Arc::new(|attempt| tracing::info!(attempt, "reconnecting"))),
        on_disconnect: Some(Arc::new(|err| tracing::warn!(%err, "disconnected"))),
        on_error: Some(Arc::new(|err| tracing::error!(%err, "connect error"))),
    });

    let client = Arc::new(SseClient::new(config).context("invalid configuration")?);
    client
        .connect()
        .await
        .context("failed to establish the initial connection")?;

    let shutdown_client = Arc::clone(&client);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        let _ = shutdown_client.close();
    });

    while let Some(event) = client.recv().await {
        if cli.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("[{}] {}: {}", event.sequence, event.name, event.data);
        }
    }

    // Give the control loop a moment to settle before the process exits.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
