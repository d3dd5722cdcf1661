//! Application settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::telegram::ReplyTarget;

/// Format accepted for the `DEADLINE` variable.
pub const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default public Bot API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram Bot API configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token issued by `@BotFather`.
    pub token: String,

    /// Base URL of the Bot API server.
    pub api_url: String,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_owned()
}

impl TelegramConfig {
    /// Creates a new Telegram configuration against the public Bot API.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: default_api_url(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `TELEGRAM_TOKEN` to be set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup("TELEGRAM_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingEnvVar("TELEGRAM_TOKEN"))?;

        let api_url = lookup("TELEGRAM_API_URL")
            .map_or_else(default_api_url, |url| url.trim_end_matches('/').to_owned());

        Ok(Self { token, api_url })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// The single chat (and optional forum thread) a bot instance serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatScope {
    pub chat_id: i64,

    /// `None` is the main thread of the chat.
    pub thread_id: Option<i64>,
}

impl ChatScope {
    /// Creates a scope. A thread id of `0` means the main thread.
    #[must_use]
    pub fn new(chat_id: i64, thread_id: Option<i64>) -> Self {
        Self {
            chat_id,
            thread_id: thread_id.filter(|&t| t != 0),
        }
    }

    /// Checks whether a reply target lies inside this scope.
    #[must_use]
    pub fn contains(&self, target: ReplyTarget) -> bool {
        self.chat_id == target.chat_id && self.thread_id == target.thread_id.filter(|&t| t != 0)
    }
}

/// Bot-specific settings.
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Chat the bot answers in. `None` accepts every chat.
    pub scope: Option<ChatScope>,

    /// Path to the participants JSON file.
    pub register_path: PathBuf,

    /// Path to the update offset JSON file.
    pub offset_path: PathBuf,

    /// Server-side long-poll timeout in seconds.
    pub poll_timeout_secs: u32,

    /// Minimum interval between outgoing replies in milliseconds.
    pub reply_interval_ms: u64,

    /// Pause after a failed polling cycle in seconds.
    pub retry_delay_secs: u64,

    /// Registration closes after this local date and time.
    pub deadline: Option<NaiveDateTime>,
}

fn default_register_path() -> PathBuf {
    PathBuf::from("participants.json")
}

/// The offset file lives next to the executable unless told otherwise.
fn default_offset_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("offset.json")))
        .unwrap_or_else(|| PathBuf::from("offset.json"))
}

fn default_poll_timeout() -> u32 {
    300
}

fn default_reply_interval() -> u64 {
    1000
}

fn default_retry_delay() -> u64 {
    5
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Creates bot settings from an arbitrary key lookup with defaults.
    ///
    /// Unset or empty variables fall back to their default; present but
    /// malformed ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let chat_id: Option<i64> = get("CHAT_ID").map(|v| parse_var("CHAT_ID", &v)).transpose()?;
        let thread_id: Option<i64> = get("THREAD_ID")
            .map(|v| parse_var("THREAD_ID", &v))
            .transpose()?;

        if chat_id.is_none() && thread_id.is_some_and(|t| t != 0) {
            return Err(ConfigError::InvalidValue {
                key: "THREAD_ID",
                reason: "requires CHAT_ID to be set".to_owned(),
            });
        }

        let deadline = get("DEADLINE")
            .map(|v| {
                NaiveDateTime::parse_from_str(v.trim(), DEADLINE_FORMAT).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: "DEADLINE",
                        reason: format!("{e} (expected {DEADLINE_FORMAT})"),
                    }
                })
            })
            .transpose()?;

        Ok(Self {
            scope: chat_id.map(|chat| ChatScope::new(chat, thread_id)),
            register_path: get("REGISTER_PATH").map_or_else(default_register_path, PathBuf::from),
            offset_path: get("OFFSET_PATH").map_or_else(default_offset_path, PathBuf::from),
            poll_timeout_secs: get("POLL_TIMEOUT")
                .map(|v| parse_var("POLL_TIMEOUT", &v))
                .transpose()?
                .unwrap_or_else(default_poll_timeout),
            reply_interval_ms: get("REPLY_INTERVAL_MS")
                .map(|v| parse_var("REPLY_INTERVAL_MS", &v))
                .transpose()?
                .unwrap_or_else(default_reply_interval),
            retry_delay_secs: get("RETRY_DELAY")
                .map(|v| parse_var("RETRY_DELAY", &v))
                .transpose()?
                .unwrap_or_else(default_retry_delay),
            deadline,
        })
    }

    #[must_use]
    pub fn reply_interval(&self) -> Duration {
        Duration::from_millis(self.reply_interval_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn parse_var<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key,
        reason: e.to_string(),
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}
