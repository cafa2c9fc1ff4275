mod cache;
mod config;
mod delivery;
mod generator;
mod llm;
mod relay;
mod scheduler;
mod store;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::delivery::{Delivery, OsascriptTransport};
use crate::generator::{Generator, PersonaSource};
use crate::llm::OllamaClient;
use crate::relay::{Relay, WatchedConversation};
use crate::scheduler::Scheduler;
use crate::store::SqliteMessageStore;
use crate::watcher::Watcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,imessage_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Model: {}", config.backend.model);
    info!("  Backend: {}", config.backend.url);

    // The backend must answer before any loop starts
    let backend = Arc::new(OllamaClient::new(config.backend.clone()));
    info!("Checking backend...");
    backend.check().await.context("Backend check failed")?;
    info!("  Model ready: {}", backend.model());

    let assistant_name = config
        .group
        .as_ref()
        .map(|g| g.mention.trim_start_matches('@').to_string())
        .unwrap_or_else(|| "JARVIS".to_string());
    let personas = PersonaSource::new(config.personality_path(), config.personality.clone());
    let generator = Arc::new(Generator::new(backend, personas, &assistant_name));
    let delivery = Delivery::new(Arc::new(OsascriptTransport::new()));
    let cache = ResponseCache::new(config.cache_path());
    let store = SqliteMessageStore::new(config.database_path());
    info!("  Messages database: {}", store.path().display());
    info!("  Response cache: {}", cache.path().display());
    let watcher = Watcher::new(Arc::new(store));

    let mut conversations = Vec::new();
    if let Some(direct) = &config.direct {
        info!("Listening for messages from: {}", direct.identity);
        conversations.push(WatchedConversation::direct(&direct.identity));
    }
    if let Some(admin) = &config.admin {
        info!(
            "Admin commands from: {} (use {} prefix)",
            admin.identity, admin.prefix
        );
        conversations.push(WatchedConversation::admin(&admin.identity, &admin.prefix));
    }
    if let Some(group) = &config.group {
        info!("Listening for {} mentions from any number", group.mention);
        conversations.push(WatchedConversation::group(
            &group.mention,
            group.reply_to.as_deref(),
        ));
    }

    let mut cron = None;
    if let Some(scheduled) = config.scheduled.clone() {
        let mut s = Scheduler::new().await?;
        scheduler::tasks::register_scheduled_message(
            &mut s,
            scheduled,
            Arc::clone(&generator),
            delivery.clone(),
        )
        .await?;
        s.start().await?;
        cron = Some(s);
    }

    let mut relay = Relay::new(
        watcher,
        generator,
        cache,
        delivery,
        conversations,
        Duration::from_secs(config.poll_interval_secs()),
    );
    relay.seed_cursors().await;

    info!(
        "Relay is starting with {} conversation(s)... (Ctrl+C to stop)",
        relay.conversations().len()
    );
    relay
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Some(mut s) = cron {
        s.shutdown().await?;
    }

    Ok(())
}
