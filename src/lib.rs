//! Lottery Bot Library
//!
//! A Telegram bot that runs a giveaway draw inside a group thread.
//!
//! This crate provides the core functionality for:
//! - Long-polling the Telegram Bot API for new messages
//! - Persisting the update cursor so restarts never replay messages
//! - Routing commands to handlers by prefix
//! - Keeping the participant register and drawing winners

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod register;
pub mod telegram;
