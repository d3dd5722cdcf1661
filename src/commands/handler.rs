//! Lottery command handler implementation.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use rand::seq::IteratorRandom;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{CommandError, LotteryCommand};
use crate::dispatcher::CommandHandler;
use crate::register::{Participant, ParticipantRegister, RegisterError};
use crate::telegram::{Message, Transport, User};

const HAND: &str = "👉";

/// Format the deadline is shown in.
const DEADLINE_DISPLAY: &str = "%d/%m/%Y at %H:%M:%S";

/// Runs lottery commands against the participant register.
pub struct LotteryHandler<T> {
    /// Used to look up chat administrators.
    transport: Arc<T>,

    /// Participants of the draw.
    register: RwLock<ParticipantRegister>,

    /// Registration closes after this local time.
    deadline: Option<NaiveDateTime>,
}

impl<T: Transport> LotteryHandler<T> {
    /// Creates a new lottery handler.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        register: ParticipantRegister,
        deadline: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            transport,
            register: RwLock::new(register),
            deadline,
        }
    }

    /// Shared access to the participant register.
    pub fn register(&self) -> &RwLock<ParticipantRegister> {
        &self.register
    }

    fn is_closed(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Local::now().naive_local() > deadline)
    }

    fn handle_help() -> String {
        let mut help = String::new();
        for command in LotteryCommand::ALL {
            let _ = writeln!(help, "{command} {HAND} {}", command.description());
        }
        help
    }

    async fn handle_join(&self, user: &User, message: &Message) -> Result<String, CommandError> {
        let alias = user.alias();
        if self.is_closed() {
            return Err(CommandError::RegistrationClosed { alias });
        }

        let mut register = self.register.write().await;
        match register.add(Participant::from_message(user, message)) {
            Ok(()) => Ok(format!("Done! {alias}, you are registered for the draw")),
            Err(RegisterError::AlreadyRegistered(_)) => {
                Err(CommandError::AlreadyRegistered { alias })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_leave(&self, user: &User) -> Result<String, CommandError> {
        let alias = user.alias();
        if self.is_closed() {
            return Err(CommandError::RegistrationClosed { alias });
        }

        let mut register = self.register.write().await;
        match register.remove(user.id) {
            Ok(_) => Ok(format!("Sorry to see you go! {alias}, you are no longer in the draw")),
            Err(RegisterError::NotRegistered(_)) => Err(CommandError::NotRegistered { alias }),
            Err(e) => Err(e.into()),
        }
    }

    async fn handle_status(&self, user: &User) -> String {
        let alias = user.alias();
        if self.register.read().await.contains(user.id) {
            format!("You are registered, {alias}")
        } else {
            format!("You are NOT registered, {alias}")
        }
    }

    async fn handle_count(&self) -> String {
        match self.register.read().await.eligible_count() {
            0 => "There are no participants yet!".to_owned(),
            count => format!("Number of participants: {count}"),
        }
    }

    fn handle_deadline(&self, user: &User) -> String {
        let alias = user.alias();
        match self.deadline {
            Some(deadline) => format!(
                "{alias}, registration closes on {}",
                deadline.format(DEADLINE_DISPLAY)
            ),
            None => format!("{alias}, registration has no deadline"),
        }
    }

    async fn handle_draw(&self, user: &User, message: &Message) -> Result<String, CommandError> {
        let admins = self
            .transport
            .get_chat_administrators(message.chat.id)
            .await?;

        if !admins.iter().any(|member| member.user.id == user.id) {
            return Err(CommandError::NotAdmin {
                alias: user.alias(),
            });
        }

        let mut register = self.register.write().await;

        let selected = register
            .eligible()
            .map(|p| p.user_id)
            .choose(&mut rand::thread_rng())
            .ok_or(CommandError::NoParticipants)?;

        let winner = register.mark_winner(selected)?;
        info!(user_id = winner.user_id, "Draw winner selected");

        Ok(format!("The winner is {}! Congratulations!", winner.alias()))
    }
}

#[async_trait]
impl<T: Transport> CommandHandler for LotteryHandler<T> {
    type Command = LotteryCommand;

    async fn handle(
        &self,
        command: LotteryCommand,
        message: &Message,
    ) -> Result<String, CommandError> {
        debug!(%command, "Handling lottery command");

        match command {
            LotteryCommand::Help => Ok(Self::handle_help()),
            LotteryCommand::Count => Ok(self.handle_count().await),
            LotteryCommand::Join => self.handle_join(participant(message)?, message).await,
            LotteryCommand::Leave => self.handle_leave(participant(message)?).await,
            LotteryCommand::Status => Ok(self.handle_status(participant(message)?).await),
            LotteryCommand::Deadline => Ok(self.handle_deadline(participant(message)?)),
            LotteryCommand::Draw => self.handle_draw(sender(message)?, message).await,
        }
    }
}

/// The user who sent `message`.
fn sender(message: &Message) -> Result<&User, CommandError> {
    message.from.as_ref().ok_or(CommandError::UnknownSender)
}

/// The sender of `message`, refused when it is a bot.
fn participant(message: &Message) -> Result<&User, CommandError> {
    let user = sender(message)?;
    if user.is_bot {
        return Err(CommandError::BotNotAllowed {
            alias: user.alias(),
        });
    }
    Ok(user)
}

impl<T> std::fmt::Debug for LotteryHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LotteryHandler")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
