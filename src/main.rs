//! Lottery Bot - Main Entry Point
//!
//! A Telegram bot that lets group members join a giveaway and lets the
//! group administrators draw the winners.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lottery_bot::commands::{LotteryCommand, LotteryHandler};
use lottery_bot::config::{BotSettings, DEADLINE_FORMAT, TelegramConfig};
use lottery_bot::dispatcher::{Dispatcher, DispatcherMessage, JsonCursorStore};
use lottery_bot::register::ParticipantRegister;
use lottery_bot::telegram::BotApiClient;

/// Telegram bot that runs a giveaway draw.
#[derive(Parser, Debug)]
#[command(name = "lottery_bot")]
#[command(about = "Run a giveaway draw in a Telegram group")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;

    let settings = BotSettings::from_env().context("Failed to load bot settings")?;

    match settings.scope {
        Some(scope) => info!(
            chat_id = scope.chat_id,
            thread_id = ?scope.thread_id,
            "Serving a single chat"
        ),
        None => warn!("CHAT_ID not set, answering in every chat"),
    }
    if let Some(deadline) = settings.deadline {
        info!("Registration closes at {}", deadline.format(DEADLINE_FORMAT));
    }

    // Connect to Telegram
    let client = Arc::new(
        BotApiClient::new(
            &tg_config,
            settings.poll_timeout_secs,
            settings.reply_interval(),
        )
        .context("Failed to create Telegram client")?,
    );

    let me = client
        .get_me()
        .await
        .context("Failed to reach Telegram, check TELEGRAM_TOKEN")?;
    info!("Logged in as {}", me.alias());

    let register = ParticipantRegister::open(&settings.register_path).with_context(|| {
        format!(
            "Failed to open participant register {}",
            settings.register_path.display()
        )
    })?;

    let handler = LotteryHandler::new(Arc::clone(&client), register, settings.deadline);
    let store = JsonCursorStore::new(&settings.offset_path);

    let mut dispatcher = Dispatcher::new(client, store, handler, LotteryCommand::registry())
        .with_context(|| {
            format!(
                "Failed to load update cursor from {}",
                settings.offset_path.display()
            )
        })?
        .with_scope(settings.scope)
        .with_poll_timeout(settings.poll_timeout_secs)
        .with_retry_delay(settings.retry_delay());

    // Create dispatcher channel
    let (dispatcher_tx, dispatcher_rx) = mpsc::channel::<DispatcherMessage>(1);

    info!("Starting lottery bot...");

    // Spawn dispatcher task
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_rx).await;
    });

    info!("Bot is running. Use Ctrl+C to stop.");

    // Wait for Ctrl+C
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    // Cleanup
    let _ = dispatcher_tx.send(DispatcherMessage::Shutdown).await;
    dispatcher_handle
        .await
        .context("Dispatcher task panicked")?;

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
