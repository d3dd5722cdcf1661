//! Update dispatching module.
//!
//! Long-polls the transport for new updates, keeps the update cursor on
//! durable storage and routes each message to a command handler by prefix.

mod cursor;
mod registry;
mod runner;

pub use cursor::{CursorError, CursorRecord, CursorStore, JsonCursorStore, MemoryCursorStore};
pub use registry::{COMMAND_SIGIL, CommandRegistry, RegistryBuilder, command_token, is_command};
pub use runner::{
    CommandHandler, DEFAULT_POLL_TIMEOUT_SECS, DEFAULT_RETRY_DELAY, DispatchError, Dispatcher,
    DispatcherMessage, PollOutcome,
};
