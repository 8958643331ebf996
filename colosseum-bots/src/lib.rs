//! colosseum-bots: round-robin LLM debates in Telegram forum groups.
//!
//! Several persona bots take turns arguing a topic, each through its own
//! bot account, while a judge bot summarizes and takes admin commands:
//! - Debate engine: sessions, turn loop, daily trigger ([`debate`])
//! - Providers: Groq generation ([`llm`]), Gemini judge ([`judge`])
//! - Telegram delivery ([`delivery`]) and commands ([`commands`])
//! - Optional SQLite log ([`store`])

pub mod commands;
pub mod config;
pub mod debate;
pub mod delivery;
pub mod health;
pub mod judge;
pub mod llm;
pub mod store;
