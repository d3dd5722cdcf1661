//! Bot API wire types.
//!
//! Only the fields the bot reads are modelled; everything else in the
//! payload is ignored on deserialization.

use serde::{Deserialize, Serialize};

/// One inbound event returned by `getUpdates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub update_id: u64,

    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,

    /// Forum topic the message was posted in.
    #[serde(default)]
    pub message_thread_id: Option<i64>,

    /// Absent for messages sent on behalf of channels.
    #[serde(default)]
    pub from: Option<User>,

    pub chat: Chat,

    /// Unix time the message was sent.
    pub date: i64,

    #[serde(default)]
    pub text: Option<String>,
}

impl Message {
    /// Where replies to this message should go.
    #[must_use]
    pub fn reply_target(&self) -> ReplyTarget {
        ReplyTarget::new(self.chat.id, self.message_thread_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    #[serde(default)]
    pub is_bot: bool,

    #[serde(default)]
    pub first_name: String,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub language_code: Option<String>,
}

impl User {
    /// Human readable handle: `@username` when set, the full name otherwise.
    #[must_use]
    pub fn alias(&self) -> String {
        match self.username.as_deref() {
            Some(username) if !username.is_empty() => format!("@{username}"),
            _ => {
                let last = self.last_name.as_deref().unwrap_or_default();
                format!("{} {last}", self.first_name).trim().to_owned()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,

    #[serde(default, rename = "type")]
    pub kind: Option<String>,

    #[serde(default)]
    pub title: Option<String>,
}

/// Entry of `getChatAdministrators`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMember {
    pub user: User,

    #[serde(default)]
    pub status: String,
}

/// Conversation a reply is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplyTarget {
    pub chat_id: i64,
    pub thread_id: Option<i64>,
}

impl ReplyTarget {
    #[must_use]
    pub const fn new(chat_id: i64, thread_id: Option<i64>) -> Self {
        Self { chat_id, thread_id }
    }
}

/// Response envelope shared by every Bot API method.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiResponse<T> {
    pub ok: bool,

    pub result: Option<T>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub error_code: Option<i32>,

    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u32>,
}
