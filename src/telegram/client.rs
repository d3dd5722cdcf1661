//! Bot API client and the transport contract the dispatcher polls through.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{ApiResponse, ChatMember, ReplyTarget, Update, User};
use super::RateLimiter;
use crate::config::TelegramConfig;

/// Extra time on top of the long-poll timeout before the HTTP request gives up.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(15);

/// Maximum number of body bytes kept in an HTTP error.
const MAX_ERROR_BODY: usize = 512;

/// Errors that can occur during Bot API operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Telegram API error {code}: {description}")]
    Api { code: i32, description: String },

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Failed to decode Telegram response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Messaging transport with long-poll semantics.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetches updates with an identifier of at least `offset`, blocking
    /// server-side for up to `timeout_secs` when none are pending.
    async fn get_updates(&self, offset: u64, timeout_secs: u32)
    -> Result<Vec<Update>, TelegramError>;

    /// Sends a plain text message to a chat, inside a thread when one is set.
    async fn send_message(&self, text: &str, target: ReplyTarget) -> Result<(), TelegramError>;

    /// Lists the administrators of a chat.
    async fn get_chat_administrators(&self, chat_id: i64)
    -> Result<Vec<ChatMember>, TelegramError>;
}

/// Telegram Bot API client over HTTPS.
pub struct BotApiClient {
    http: reqwest::Client,

    /// `<api_url>/bot<token>`; never logged.
    base_url: String,

    /// Spacing for outgoing messages.
    rate_limiter: RateLimiter,
}

impl BotApiClient {
    /// Creates a client whose HTTP timeout covers a long poll of `poll_timeout_secs`.
    pub fn new(
        config: &TelegramConfig,
        poll_timeout_secs: u32,
        reply_interval: Duration,
    ) -> Result<Self, TelegramError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(u64::from(poll_timeout_secs)) + HTTP_TIMEOUT_SLACK)
            .build()
            .map_err(reqwest::Error::without_url)?;

        Ok(Self {
            http,
            base_url: format!("{}/bot{}", config.api_url, config.token),
            rate_limiter: RateLimiter::new(reply_interval),
        })
    }

    /// Returns the bot's own account.
    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &json!({})).await
    }

    /// Invokes a Bot API method with a JSON body.
    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R, TelegramError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/{method}", self.base_url);

        let response = self
            .http
            .post(url)
            .json(params)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        let body = response.text().await.map_err(reqwest::Error::without_url)?;

        let envelope: ApiResponse<R> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(TelegramError::Http {
                    status: status.as_u16(),
                    body: truncate_body(&body),
                });
            }
            Err(e) => return Err(e.into()),
        };

        into_result(envelope)
    }
}

/// Maps a Bot API envelope onto its result or the matching error.
fn into_result<T>(envelope: ApiResponse<T>) -> Result<T, TelegramError> {
    if let Some(seconds) = envelope.parameters.as_ref().and_then(|p| p.retry_after) {
        return Err(TelegramError::FloodWait(seconds));
    }

    match envelope {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiResponse {
            error_code,
            description,
            ..
        } => Err(TelegramError::Api {
            code: error_code.unwrap_or_default(),
            description: description.unwrap_or_else(|| "no description".to_owned()),
        }),
    }
}

#[async_trait]
impl Transport for BotApiClient {
    async fn get_updates(
        &self,
        offset: u64,
        timeout_secs: u32,
    ) -> Result<Vec<Update>, TelegramError> {
        let params = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        self.call("getUpdates", &params).await
    }

    async fn send_message(&self, text: &str, target: ReplyTarget) -> Result<(), TelegramError> {
        let mut params = json!({
            "chat_id": target.chat_id,
            "text": text,
        });
        if let Some(thread_id) = target.thread_id.filter(|&t| t > 0) {
            params["message_thread_id"] = json!(thread_id);
        }

        self.rate_limiter.acquire().await;
        debug!(chat_id = target.chat_id, "Sending message");

        match self.call::<_, serde_json::Value>("sendMessage", &params).await {
            Ok(_) => Ok(()),
            Err(TelegramError::FloodWait(seconds)) => {
                self.rate_limiter.back_off(seconds).await;
                self.rate_limiter.acquire().await;
                warn!(chat_id = target.chat_id, "Retrying message after flood wait");
                self.call::<_, serde_json::Value>("sendMessage", &params)
                    .await
                    .map(drop)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_chat_administrators(
        &self,
        chat_id: i64,
    ) -> Result<Vec<ChatMember>, TelegramError> {
        self.call("getChatAdministrators", &json!({ "chat_id": chat_id }))
            .await
    }
}

impl std::fmt::Debug for BotApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApiClient")
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Truncates an error body so a misbehaving proxy cannot flood the logs.
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_owned();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
