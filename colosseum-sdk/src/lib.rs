//! colosseum-sdk: a small Telegram Bot API client.
//!
//! Covers the handful of methods the debate bots need: sending messages,
//! creating forum topics, checking chat admins, and long-polling updates.

pub mod client;
pub mod types;

pub use client::{ApiError, BotClient, PollConfig, UpdatesHandle};
