//! Telegram Bot API module.
//!
//! Provides the wire types of the Bot API, the [`Transport`] contract the
//! dispatcher polls through and its HTTPS implementation with rate limiting.

mod client;
mod rate_limiter;
mod types;

pub use client::{BotApiClient, TelegramError, Transport};
pub use rate_limiter::RateLimiter;
pub use types::{Chat, ChatMember, Message, ReplyTarget, Update, User};
