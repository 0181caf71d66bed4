//! Pollbot - Entry Point
//!
//! Connects to the store (fatal on failure), logs in to Mattermost, greets
//! the channel and listens for `/poll` commands until Ctrl-C.

use anyhow::Context;
use pollbot::channels::{ChannelResponse, MattermostClient, MessageSink};
use pollbot::store::DynConnection;
use pollbot::{
    CommandRouter, Config, IngestionConfig, IngestionLoop, MemoryConnection, PollStore,
    RedisConnection, RouterConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const GREETING: &str = "Hi! I am a poll bot. Type /poll help to see what I can do.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Pollbot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: pollbot");
        println!();
        println!("Environment variables:");
        println!("  MM_SERVER, MM_TOKEN       Mattermost server URL and bot token");
        println!("  MM_TEAM, MM_CHANNEL       Team and channel to serve");
        println!("  STORE_URL                 Redis URL, or memory:// (default: redis://127.0.0.1:6379)");
        println!("  STORE_USERNAME/PASSWORD   Store credentials");
        println!("  POLL_OWNER_ONLY           Creator-only stop/delete (default: true)");
        println!("  POLL_MAX_IN_FLIGHT        Concurrent commands (default: 32)");
        println!("  POLL_RECONNECT_BACKOFF_MS Event reconnect delay (default: 2000)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Pollbot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        server = %config.mattermost.server_url,
        team = %config.mattermost.team,
        channel = %config.mattermost.channel,
        store = %config.store.url,
        owner_only = config.owner_only,
        max_in_flight = config.max_in_flight,
        "Loaded configuration"
    );

    let conn: DynConnection = if config.uses_memory_store() {
        warn!("Using the in-process store; polls are lost on restart");
        Arc::new(MemoryConnection::new())
    } else {
        Arc::new(
            RedisConnection::connect(&config.store)
                .await
                .context("Connection to store failed")?,
        )
    };
    let store = PollStore::new(conn);

    let client = Arc::new(MattermostClient::new(config.mattermost.clone()));
    let bot = client.login().await?;

    let router = Arc::new(CommandRouter::new(
        store,
        client.clone(),
        RouterConfig {
            owner_only: config.owner_only,
        },
    ));

    if let Err(e) = client
        .send(ChannelResponse::text(&bot.channel.id, GREETING))
        .await
    {
        error!("Failed to post greeting: {}", e);
    }

    let mut ingestion_config = IngestionConfig::new(&bot.channel.id, &bot.user.id);
    ingestion_config.reconnect_backoff = config.reconnect_backoff;
    ingestion_config.max_in_flight = config.max_in_flight;
    let ingestion = IngestionLoop::new(client, router, ingestion_config);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutting down");
                    shutdown.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    });

    ingestion.run(shutdown).await;
    info!("Pollbot stopped");

    Ok(())
}
