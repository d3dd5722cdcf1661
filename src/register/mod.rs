//! Participant register of the draw.
//!
//! Keeps who joined the draw and who already won on durable storage.

mod participants;

pub use participants::{Participant, ParticipantRegister, RegisterError};
