//! Covenant - contract negotiation and usage-control enforcement

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use covenant::{
    config::Args,
    message::MessageHandler,
    notify::{FanoutConfig, SubscriberNotifier},
    store::{EntityStore, InMemoryStore},
    transport::{HttpNotifier, Notifier},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("covenant={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Covenant - Usage-Control Connector");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Connector ID: {}", args.connector_id);
    info!("Protocol version: {}", args.protocol_version);
    info!(
        "Clearing house: {}",
        args.clearing_house_url.as_deref().unwrap_or("(not configured)")
    );
    info!(
        "Duty mode: {}",
        if args.strict_duties { "STRICT" } else { "LENIENT" }
    );
    info!(
        "Unsupported patterns: {}",
        if args.allow_unsupported_patterns { "skip" } else { "deny" }
    );
    info!("Fan-out: {} concurrent, {} retries", args.fanout_concurrency, args.fanout_retries);
    info!("Build: {} ({})", env!("GIT_COMMIT_SHORT"), env!("BUILD_TIMESTAMP"));
    info!("======================================");

    let config = args.enforcement_config();

    let notifier: Arc<dyn Notifier> = match HttpNotifier::new(Duration::from_millis(
        args.request_timeout_ms,
    )) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            error!("Transport setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let store: Arc<dyn EntityStore> = Arc::new(InMemoryStore::new());
    info!("Entity store initialized (in-memory)");

    let fanout = Arc::new(SubscriberNotifier::new(
        FanoutConfig {
            connector_id: args.connector_id.clone(),
            protocol_version: args.protocol_version.clone(),
            concurrency: args.fanout_concurrency,
            retries: args.fanout_retries,
            retry_delay: Duration::from_millis(args.fanout_retry_delay_ms),
        },
        Arc::clone(&store),
        Arc::clone(&notifier),
    ));

    // Kept alive for the process lifetime; the embedding message
    // transport clones the Arc and drives `handle` per inbound message.
    let _handler = Arc::new(MessageHandler::new(config, store, notifier, fanout));
    info!("Message handler wired; connector core ready");

    // The message transport (mounted by the embedding service) drives the
    // handler; the process itself just waits for shutdown.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");

    Ok(())
}
