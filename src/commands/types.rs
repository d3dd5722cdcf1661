//! Command types and definitions.

use std::fmt;

use thiserror::Error;

use crate::dispatcher::CommandRegistry;
use crate::register::RegisterError;
use crate::telegram::TelegramError;

/// Commands understood by the lottery bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LotteryCommand {
    /// Show help information.
    Help,

    /// Join the draw.
    Join,

    /// Leave the draw.
    Leave,

    /// Tell the sender whether they are registered.
    Status,

    /// Show how many participants are in the draw.
    Count,

    /// Show when registration closes.
    Deadline,

    /// Pick a winner (administrators only).
    Draw,
}

impl LotteryCommand {
    /// Every command, in the order they are listed in help.
    pub const ALL: [Self; 7] = [
        Self::Help,
        Self::Join,
        Self::Leave,
        Self::Status,
        Self::Count,
        Self::Deadline,
        Self::Draw,
    ];

    /// Prefixes that trigger the command. The first one is shown in help.
    #[must_use]
    pub const fn prefixes(self) -> &'static [&'static str] {
        match self {
            Self::Help => &["/ayuda", "/help"],
            Self::Join => &["/participo"],
            Self::Leave => &["/noparticipo", "/no-participo"],
            Self::Status => &["/estado"],
            Self::Count => &["/cuenta"],
            Self::Deadline => &["/plazo"],
            Self::Draw => &["/sortea"],
        }
    }

    /// Returns the command description for help.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Help => "shows this help",
            Self::Join => "adds you to the draw",
            Self::Leave => "removes you from the draw",
            Self::Status => "tells you whether you are registered for the draw",
            Self::Count => "shows the number of participants",
            Self::Deadline => "shows when registration closes",
            Self::Draw => "runs the draw (admins only)",
        }
    }

    /// Builds the registry with every prefix of every command.
    #[must_use]
    pub fn registry() -> CommandRegistry<Self> {
        Self::ALL
            .iter()
            .flat_map(|&command| command.prefixes().iter().map(move |&p| (p, command)))
            .fold(CommandRegistry::builder(), |builder, (prefix, command)| {
                builder.register(prefix, command)
            })
            .build()
    }
}

impl fmt::Display for LotteryCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefixes()[0])
    }
}

/// Why a command could not be carried out.
///
/// The display text of every variant is what the chat gets back.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{alias}, sorry, bots cannot take part in the draw")]
    BotNotAllowed { alias: String },

    #[error("{alias}, the registration period is over. Sorry.")]
    RegistrationClosed { alias: String },

    #[error("{alias}, you were already registered for the draw!")]
    AlreadyRegistered { alias: String },

    #[error("{alias}, you were not registered for the draw!")]
    NotRegistered { alias: String },

    #[error("{alias}, only admins can run the draw!")]
    NotAdmin { alias: String },

    #[error("There is nobody left to draw from")]
    NoParticipants,

    #[error("Could not tell who sent this command")]
    UnknownSender,

    #[error("The command {0} is not implemented")]
    UnknownCommand(String),

    #[error("Participant register failed: {0}")]
    Register(#[from] RegisterError),

    #[error("Telegram request failed: {0}")]
    Transport(#[from] TelegramError),
}

impl CommandError {
    /// Failures of the bot itself rather than of the user's request.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Register(_) | Self::Transport(_))
    }

    /// Text sent back to the chat. Internal details stay in the logs.
    #[must_use]
    pub fn reply_text(&self) -> String {
        if self.is_internal() {
            "Something went wrong while processing your command. Please try again later."
                .to_owned()
        } else {
            self.to_string()
        }
    }
}
