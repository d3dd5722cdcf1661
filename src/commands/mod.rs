//! Command handling module.
//!
//! Lottery commands users send in the group: joining and leaving the
//! draw, checking registration, and running the draw itself.

mod handler;
mod types;

pub use handler::LotteryHandler;
pub use types::{CommandError, LotteryCommand};
