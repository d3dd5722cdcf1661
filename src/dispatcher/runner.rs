//! Update dispatcher.
//!
//! Every polling cycle follows the same steps:
//! 1. Fetch updates from the transport starting at the cursor
//! 2. On a transport error → log it, leave the cursor alone (next cycle retries)
//! 3. On an empty batch → nothing to do
//! 4. Otherwise advance the cursor past the batch and SAVE it
//! 5. Route every update of the batch to its command handler and reply
//!
//! The cursor is saved before the batch is handled: a crash mid-batch
//! drops the rest of that batch instead of replaying it after restart.
//! A shutdown request only interrupts the fetch; a batch whose cursor
//! was saved always runs to completion.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::registry::{CommandRegistry, command_token, is_command};
use super::{CursorError, CursorStore};
use crate::commands::CommandError;
use crate::config::ChatScope;
use crate::telegram::{Message, TelegramError, Transport, Update};

/// Default server-side long-poll timeout in seconds.
pub const DEFAULT_POLL_TIMEOUT_SECS: u32 = 300;

/// Default pause after a failed cycle.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Executes the command a message was routed to.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Key the registry maps prefixes to.
    type Command: Copy + fmt::Debug + Send + Sync;

    /// Runs `command` for `message` and returns the reply text.
    async fn handle(
        &self,
        command: Self::Command,
        message: &Message,
    ) -> Result<String, CommandError>;
}

/// Messages that can be sent to a running dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherMessage {
    /// Stop polling.
    Shutdown,
}

/// Result of a single polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The transport had nothing new.
    Empty,

    /// A batch was consumed.
    Processed {
        /// Updates in the batch.
        updates: usize,
        /// Updates that were answered.
        handled: usize,
        /// Cursor after the batch.
        cursor: u64,
    },
}

/// Errors that end a polling cycle early. The cursor is untouched.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to fetch updates: {0}")]
    Transport(#[from] TelegramError),

    #[error("Failed to persist cursor: {0}")]
    Cursor(#[from] CursorError),
}

/// Long-poll loop that routes inbound messages to command handlers.
pub struct Dispatcher<T, S, H: CommandHandler> {
    transport: Arc<T>,
    store: S,
    handler: H,
    registry: CommandRegistry<H::Command>,

    /// Only messages from here are handled. `None` accepts every chat.
    scope: Option<ChatScope>,

    /// Next update id to ask for.
    cursor: u64,

    poll_timeout_secs: u32,
    retry_delay: Duration,
}

impl<T, S, H> Dispatcher<T, S, H>
where
    T: Transport,
    S: CursorStore,
    H: CommandHandler,
{
    /// Creates a dispatcher resuming from the cursor in `store`.
    pub fn new(
        transport: Arc<T>,
        store: S,
        handler: H,
        registry: CommandRegistry<H::Command>,
    ) -> Result<Self, DispatchError> {
        let cursor = store.load()?;
        debug!(prefixes = ?registry.prefixes().collect::<Vec<_>>(), "Command prefixes");
        info!(cursor, commands = registry.len(), "Dispatcher ready");

        Ok(Self {
            transport,
            store,
            handler,
            registry,
            scope: None,
            cursor,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Restricts handling to a single chat and thread.
    #[must_use]
    pub fn with_scope(mut self, scope: Option<ChatScope>) -> Self {
        self.scope = scope;
        self
    }

    /// Sets the server-side long-poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, secs: u32) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    /// Sets the pause after a failed cycle.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Runs polling cycles until a shutdown message arrives.
    ///
    /// A shutdown interrupts a pending fetch or retry pause, never a batch
    /// in progress.
    pub async fn run(&mut self, mut rx: mpsc::Receiver<DispatcherMessage>) {
        info!(cursor = self.cursor, "Dispatcher started");

        loop {
            let fetched = tokio::select! {
                biased;

                msg = rx.recv() => {
                    match msg {
                        Some(DispatcherMessage::Shutdown) | None => break,
                    }
                }
                fetched = self.fetch() => fetched,
            };

            let outcome = match fetched {
                Ok(updates) => self.consume(updates).await,
                Err(e) => Err(e),
            };

            if let Err(e) = outcome {
                let delay = retry_delay_after(&e, self.retry_delay);
                debug!(retry_in = ?delay, "Polling cycle failed: {e}");

                tokio::select! {
                    biased;

                    _ = rx.recv() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(cursor = self.cursor, "Dispatcher shutting down");
    }

    /// Runs one polling cycle.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, DispatchError> {
        let updates = self.fetch().await?;
        self.consume(updates).await
    }

    /// Asks the transport for updates from the cursor on.
    async fn fetch(&self) -> Result<Vec<Update>, DispatchError> {
        debug!(cursor = self.cursor, "Fetching updates");

        self.transport
            .get_updates(self.cursor, self.poll_timeout_secs)
            .await
            .map_err(|e| {
                warn!(cursor = self.cursor, "Failed to fetch updates: {e}");
                DispatchError::from(e)
            })
    }

    /// Saves the advanced cursor, then handles every update of the batch.
    async fn consume(&mut self, updates: Vec<Update>) -> Result<PollOutcome, DispatchError> {
        let Some(max_id) = updates.iter().map(|u| u.update_id).max() else {
            return Ok(PollOutcome::Empty);
        };

        let start = self.cursor;
        let next = start.max(max_id.saturating_add(1));
        if next != start {
            if let Err(e) = self.store.save(next) {
                error!(cursor = next, "Failed to persist cursor, batch left for retry: {e}");
                return Err(e.into());
            }
            self.cursor = next;
        }

        let total = updates.len();
        let mut handled = 0;
        for update in updates {
            if update.update_id < start {
                debug!(
                    update_id = update.update_id,
                    cursor = start,
                    "Skipping already consumed update"
                );
                continue;
            }
            if self.dispatch(update).await {
                handled += 1;
            }
        }

        info!(updates = total, handled, cursor = self.cursor, "Batch processed");

        Ok(PollOutcome::Processed {
            updates: total,
            handled,
            cursor: self.cursor,
        })
    }

    /// Routes one update and sends the reply. Returns whether it was answered.
    async fn dispatch(&self, update: Update) -> bool {
        let Some(message) = update.message else {
            debug!(update_id = update.update_id, "Skipping update without message");
            return false;
        };

        let target = message.reply_target();
        if let Some(scope) = self.scope
            && !scope.contains(target)
        {
            debug!(
                update_id = update.update_id,
                chat_id = target.chat_id,
                thread_id = ?target.thread_id,
                "Skipping update outside the configured chat"
            );
            return false;
        }

        let Some(text) = message.text.as_deref() else {
            debug!(update_id = update.update_id, "Skipping message without text");
            return false;
        };

        let result = match self.registry.lookup(text) {
            Some(command) => {
                debug!(update_id = update.update_id, ?command, "Dispatching command");
                self.handler.handle(command, &message).await
            }
            None if is_command(text) => {
                Err(CommandError::UnknownCommand(command_token(text).to_owned()))
            }
            None => return false,
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) if e.is_internal() => {
                error!(update_id = update.update_id, "Command failed: {e:?}");
                e.reply_text()
            }
            Err(e) => {
                debug!(update_id = update.update_id, "Command refused: {e}");
                e.reply_text()
            }
        };

        if let Err(e) = self.transport.send_message(&reply, target).await {
            warn!(update_id = update.update_id, chat_id = target.chat_id, "Failed to send reply: {e}");
        }

        true
    }

    /// Next update id the dispatcher will ask for.
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }
}

/// Pause before the next cycle: the configured delay, or longer when
/// Telegram asked for a flood wait.
fn retry_delay_after(error: &DispatchError, base: Duration) -> Duration {
    match error {
        DispatchError::Transport(TelegramError::FloodWait(secs)) => {
            base.max(Duration::from_secs(u64::from(*secs)))
        }
        _ => base,
    }
}

impl<T, S, H: CommandHandler> fmt::Debug for Dispatcher<T, S, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("cursor", &self.cursor)
            .field("scope", &self.scope)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::dispatcher::{JsonCursorStore, MemoryCursorStore};
    use crate::telegram::{Chat, ChatMember, ReplyTarget, User};

    const CHAT: i64 = -100;
    const THREAD: i64 = 5;

    /// Transport serving canned batches and recording replies.
    #[derive(Default)]
    struct FakeTransport {
        batches: Mutex<VecDeque<Result<Vec<Update>, TelegramError>>>,
        offsets: Mutex<Vec<u64>>,
        sent: Mutex<Vec<(String, ReplyTarget)>>,
        send_delay: Duration,
    }

    impl FakeTransport {
        fn with_batches(batches: Vec<Result<Vec<Update>, TelegramError>>) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(batches.into()),
                ..Self::default()
            })
        }

        fn sent(&self) -> Vec<(String, ReplyTarget)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get_updates(&self, offset: u64, _: u32) -> Result<Vec<Update>, TelegramError> {
            self.offsets.lock().unwrap().push(offset);
            self.batches.lock().unwrap().pop_front().unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn send_message(&self, text: &str, target: ReplyTarget) -> Result<(), TelegramError> {
            tokio::time::sleep(self.send_delay).await;
            self.sent.lock().unwrap().push((text.to_owned(), target));
            Ok(())
        }

        async fn get_chat_administrators(&self, _: i64) -> Result<Vec<ChatMember>, TelegramError> {
            Ok(Vec::new())
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Cmd {
        No,
        NoParticipo,
        Fail,
    }

    /// Echoes the routed command; `Fail` always errors.
    #[derive(Default)]
    struct EchoHandler {
        calls: Mutex<Vec<Cmd>>,
    }

    #[async_trait]
    impl CommandHandler for EchoHandler {
        type Command = Cmd;

        async fn handle(&self, command: Cmd, _: &Message) -> Result<String, CommandError> {
            self.calls.lock().unwrap().push(command);
            match command {
                Cmd::Fail => Err(CommandError::NoParticipants),
                other => Ok(format!("{other:?}")),
            }
        }
    }

    fn registry() -> CommandRegistry<Cmd> {
        CommandRegistry::builder()
            .register("/no", Cmd::No)
            .register("/no-participo", Cmd::NoParticipo)
            .register("/fail", Cmd::Fail)
            .build()
    }

    fn update(id: u64, chat: i64, thread: Option<i64>, text: Option<&str>) -> Update {
        Update {
            update_id: id,
            message: Some(Message {
                message_id: i64::try_from(id).unwrap(),
                message_thread_id: thread,
                from: Some(User {
                    id: 1,
                    is_bot: false,
                    first_name: "Ada".to_owned(),
                    last_name: None,
                    username: Some("ada".to_owned()),
                    language_code: None,
                }),
                chat: Chat {
                    id: chat,
                    kind: Some("supergroup".to_owned()),
                    title: None,
                },
                date: 1_699_419_110,
                text: text.map(str::to_owned),
            }),
        }
    }

    fn dispatcher(
        transport: &Arc<FakeTransport>,
        store: MemoryCursorStore,
    ) -> Dispatcher<FakeTransport, MemoryCursorStore, EchoHandler> {
        Dispatcher::new(Arc::clone(transport), store, EchoHandler::default(), registry())
            .unwrap()
            .with_scope(Some(ChatScope::new(CHAT, Some(THREAD))))
    }

    #[tokio::test]
    async fn test_empty_batch_keeps_cursor() {
        let transport = FakeTransport::with_batches(vec![Ok(Vec::new())]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::with_value(9));

        assert_eq!(dispatcher.poll_once().await.unwrap(), PollOutcome::Empty);
        assert_eq!(dispatcher.cursor(), 9);
        assert_eq!(dispatcher.store().saves(), 0);
        assert_eq!(*transport.offsets.lock().unwrap(), [9]);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_cursor() {
        let transport = FakeTransport::with_batches(vec![Err(TelegramError::Api {
            code: 502,
            description: "Bad Gateway".to_owned(),
        })]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::with_value(4));

        let err = dispatcher.poll_once().await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
        assert_eq!(dispatcher.cursor(), 4);

        // Next cycle asks again from the same cursor.
        dispatcher.poll_once().await.unwrap();
        assert_eq!(*transport.offsets.lock().unwrap(), [4, 4]);
    }

    #[tokio::test]
    async fn test_cursor_advances_past_highest_id() {
        let transport = FakeTransport::with_batches(vec![Ok(vec![
            update(12, CHAT, Some(THREAD), Some("hello")),
            update(10, CHAT, Some(THREAD), None),
        ])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        let outcome = dispatcher.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Processed {
                updates: 2,
                handled: 0,
                cursor: 13
            }
        );
        assert_eq!(dispatcher.store().load().unwrap(), 13);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_cursor_never_decreases() {
        let transport =
            FakeTransport::with_batches(vec![Ok(vec![update(3, CHAT, Some(THREAD), Some("/no"))])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::with_value(50));

        dispatcher.poll_once().await.unwrap();
        assert_eq!(dispatcher.cursor(), 50);
        assert_eq!(dispatcher.store().saves(), 0);
        assert!(dispatcher.handler().calls.lock().unwrap().is_empty());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_consumed_updates_are_not_handled_again() {
        let transport = FakeTransport::with_batches(vec![Ok(vec![
            update(8, CHAT, Some(THREAD), Some("/no")),
            update(9, CHAT, Some(THREAD), Some("/no-participo")),
        ])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::with_value(9));

        let outcome = dispatcher.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Processed {
                updates: 2,
                handled: 1,
                cursor: 10
            }
        );
        assert_eq!(*dispatcher.handler().calls.lock().unwrap(), [Cmd::NoParticipo]);
    }

    #[tokio::test]
    async fn test_specific_command_is_routed() {
        let transport = FakeTransport::with_batches(vec![Ok(vec![
            update(1, CHAT, Some(THREAD), Some("/no-participo")),
            update(2, CHAT, Some(THREAD), Some("/no")),
        ])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        dispatcher.poll_once().await.unwrap();
        assert_eq!(
            *dispatcher.handler().calls.lock().unwrap(),
            [Cmd::NoParticipo, Cmd::No]
        );
    }

    #[tokio::test]
    async fn test_unknown_command_gets_one_reply() {
        let transport =
            FakeTransport::with_batches(vec![Ok(vec![update(1, CHAT, Some(THREAD), Some("/bogus x"))])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        dispatcher.poll_once().await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("not implemented"));
        assert!(sent[0].0.contains("/bogus"));
        assert_eq!(sent[0].1, ReplyTarget::new(CHAT, Some(THREAD)));
        assert!(dispatcher.handler().calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_batch() {
        let transport = FakeTransport::with_batches(vec![Ok(vec![
            update(1, CHAT, Some(THREAD), Some("/fail")),
            update(2, CHAT, Some(THREAD), Some("/no")),
        ])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        let outcome = dispatcher.poll_once().await.unwrap();
        assert!(matches!(outcome, PollOutcome::Processed { handled: 2, .. }));

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, CommandError::NoParticipants.to_string());
        assert_eq!(sent[1].0, "No");
    }

    #[tokio::test]
    async fn test_out_of_scope_updates_are_skipped_individually() {
        let transport = FakeTransport::with_batches(vec![Ok(vec![
            update(1, 999, None, Some("/no")),
            update(2, CHAT, None, Some("/no")),
            update(3, CHAT, Some(THREAD), Some("/no")),
        ])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        let outcome = dispatcher.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Processed {
                updates: 3,
                handled: 1,
                cursor: 4
            }
        );
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_without_scope_every_chat_is_served() {
        let transport = FakeTransport::with_batches(vec![Ok(vec![
            update(1, 999, None, Some("/no")),
            update(2, 1000, Some(8), Some("/no")),
        ])]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new()).with_scope(None);

        dispatcher.poll_once().await.unwrap();
        let targets: Vec<_> = transport.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(targets, [ReplyTarget::new(999, None), ReplyTarget::new(1000, Some(8))]);
    }

    #[tokio::test]
    async fn test_restart_resumes_from_saved_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset.json");

        let transport =
            FakeTransport::with_batches(vec![Ok(vec![update(20, CHAT, Some(THREAD), Some("/no"))])]);
        let mut first = Dispatcher::new(
            Arc::clone(&transport),
            JsonCursorStore::new(&path),
            EchoHandler::default(),
            registry(),
        )
        .unwrap();
        first.poll_once().await.unwrap();
        drop(first);

        let second = Dispatcher::new(
            Arc::clone(&transport),
            JsonCursorStore::new(&path),
            EchoHandler::default(),
            registry(),
        )
        .unwrap();
        assert_eq!(second.cursor(), 21);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_batch_unhandled() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonCursorStore::new(dir.path().join("missing").join("offset.json"));

        let transport =
            FakeTransport::with_batches(vec![Ok(vec![update(1, CHAT, Some(THREAD), Some("/no"))])]);
        let mut dispatcher =
            Dispatcher::new(Arc::clone(&transport), store, EchoHandler::default(), registry())
                .unwrap();

        let err = dispatcher.poll_once().await.unwrap_err();
        assert!(matches!(err, DispatchError::Cursor(_)));
        assert_eq!(dispatcher.cursor(), 0);
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let transport = FakeTransport::with_batches(Vec::new());
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        let (tx, rx) = mpsc::channel(1);
        tx.send(DispatcherMessage::Shutdown).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), dispatcher.run(rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_lets_batch_finish() {
        let transport = Arc::new(FakeTransport {
            batches: Mutex::new(
                vec![Ok(vec![
                    update(1, CHAT, Some(THREAD), Some("/no")),
                    update(2, CHAT, Some(THREAD), Some("/no-participo")),
                ])]
                .into(),
            ),
            send_delay: Duration::from_millis(200),
            ..FakeTransport::default()
        });
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        let (tx, rx) = mpsc::channel(1);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(DispatcherMessage::Shutdown).await.unwrap();
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(dispatcher.run(rx), stop)
        })
        .await
        .unwrap();

        let replies: Vec<String> = transport.sent().into_iter().map(|(text, _)| text).collect();
        assert_eq!(replies, ["No", "NoParticipo"]);
        assert_eq!(dispatcher.cursor(), 3);
        assert_eq!(dispatcher.store().load().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_retry_pause() {
        let transport = FakeTransport::with_batches(vec![Err(TelegramError::FloodWait(600))]);
        let mut dispatcher = dispatcher(&transport, MemoryCursorStore::new());

        let (tx, rx) = mpsc::channel(1);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(DispatcherMessage::Shutdown).await.unwrap();
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(dispatcher.run(rx), stop)
        })
        .await
        .unwrap();
        assert_eq!(dispatcher.cursor(), 0);
    }

    #[test]
    fn test_retry_delay_honours_flood_wait() {
        let base = Duration::from_secs(5);

        let flood = DispatchError::Transport(TelegramError::FloodWait(30));
        assert_eq!(retry_delay_after(&flood, base), Duration::from_secs(30));

        let short_flood = DispatchError::Transport(TelegramError::FloodWait(1));
        assert_eq!(retry_delay_after(&short_flood, base), base);

        let api = DispatchError::Transport(TelegramError::Api {
            code: 502,
            description: "Bad Gateway".to_owned(),
        });
        assert_eq!(retry_delay_after(&api, base), base);
    }
}
