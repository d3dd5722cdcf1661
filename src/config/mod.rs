//! Configuration module for the lottery bot.
//!
//! Handles loading and validation of the bot configuration from the
//! process environment: Bot API credentials, the chat the bot serves,
//! persistence paths and polling timings.

mod settings;

pub use settings::{
    BotSettings, ChatScope, ConfigError, DEADLINE_FORMAT, DEFAULT_API_URL, TelegramConfig,
};
