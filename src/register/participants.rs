//! Participant storage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::telegram::{Message, User};

/// Errors that can occur while reading or changing the register.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("User {0} is already registered")]
    AlreadyRegistered(i64),

    #[error("User {0} is not registered")]
    NotRegistered(i64),

    #[error("Failed to access register file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse register file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A user taking part in the draw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub user_id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,

    /// Chat the user joined from.
    pub chat_id: i64,

    /// Unix time of the joining message.
    pub joined_at: i64,

    /// Already won a draw; not eligible again.
    #[serde(default)]
    pub winner: bool,
}

impl Participant {
    /// Builds a participant from the sender of `message`.
    #[must_use]
    pub fn from_message(user: &User, message: &Message) -> Self {
        Self {
            user_id: user.id,
            is_bot: user.is_bot,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            username: user.username.clone(),
            language_code: user.language_code.clone(),
            chat_id: message.chat.id,
            joined_at: message.date,
            winner: false,
        }
    }

    /// Same rendering as [`User::alias`].
    #[must_use]
    pub fn alias(&self) -> String {
        User {
            id: self.user_id,
            is_bot: self.is_bot,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            language_code: None,
        }
        .alias()
    }
}

/// Participants of the draw, saved as JSON after every change.
#[derive(Debug)]
pub struct ParticipantRegister {
    path: PathBuf,
    participants: Vec<Participant>,
}

impl ParticipantRegister {
    /// Opens the register at `path`. A missing file is an empty register.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegisterError> {
        let path = path.into();

        let participants = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let register = Self { path, participants };
        info!(
            path = %register.path.display(),
            participants = register.participants.len(),
            "Participant register loaded"
        );
        Ok(register)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn contains(&self, user_id: i64) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    /// Adds a participant.
    pub fn add(&mut self, participant: Participant) -> Result<(), RegisterError> {
        if self.contains(participant.user_id) {
            return Err(RegisterError::AlreadyRegistered(participant.user_id));
        }

        let user_id = participant.user_id;
        self.participants.push(participant);

        if let Err(e) = self.save() {
            self.participants.pop(); // Rollback
            return Err(e);
        }

        debug!(user_id, "Participant added");
        Ok(())
    }

    /// Removes a participant.
    pub fn remove(&mut self, user_id: i64) -> Result<Participant, RegisterError> {
        let index = self
            .participants
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or(RegisterError::NotRegistered(user_id))?;

        let removed = self.participants.remove(index);

        if let Err(e) = self.save() {
            self.participants.insert(index, removed); // Rollback
            return Err(e);
        }

        debug!(user_id, "Participant removed");
        Ok(removed)
    }

    /// Participants that have not won yet.
    pub fn eligible(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.winner)
    }

    #[must_use]
    pub fn eligible_count(&self) -> usize {
        self.eligible().count()
    }

    /// Flags a participant as winner so later draws skip them.
    pub fn mark_winner(&mut self, user_id: i64) -> Result<&Participant, RegisterError> {
        let index = self
            .participants
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or(RegisterError::NotRegistered(user_id))?;

        let was_winner = self.participants[index].winner;
        self.participants[index].winner = true;

        if let Err(e) = self.save() {
            self.participants[index].winner = was_winner; // Rollback
            return Err(e);
        }

        info!(user_id, "Participant marked as winner");
        Ok(&self.participants[index])
    }

    fn save(&self) -> Result<(), RegisterError> {
        let json = serde_json::to_string_pretty(&self.participants)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
