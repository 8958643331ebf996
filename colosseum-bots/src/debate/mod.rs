//! Round-robin debate engine.
//!
//! An [`Orchestrator`] owns every live [`Session`], keyed by chat and forum
//! topic. Each session runs one background turn loop ([`scheduler`]) that
//! wakes every cadence interval and calls [`Session::advance`]. A
//! [`DailyTrigger`] starts a fresh session every day at a fixed local time.
//!
//! Collaborators (generation, judge, delivery identities, store) are bundled
//! in a [`Stage`] shared by all sessions of one orchestrator.

mod daily;
mod orchestrator;
pub mod prompt;
pub mod scheduler;
mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::delivery::Delivery;
use crate::judge::Summarizer;
use crate::llm::Generator;
use crate::store::Persistence;

pub use daily::{Clock, DEFAULT_TOPIC, DailyTime, DailyTrigger, InvalidDailyTime, Rotation, seconds_until};
pub use orchestrator::Orchestrator;
pub use session::{Session, TurnOutcome, TurnState, Utterance, judge_due, speaker_at};

/// A debater. Loaded once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Stable short id used in turn orders and history.
    pub key: String,
    /// Display name shown in transcripts.
    pub name: String,
    pub system_prompt: String,
    /// Generation-service model id.
    pub model: String,
}

/// Registry key: a chat plus an optional forum topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub conversation_id: i64,
    pub sub_channel_id: Option<i64>,
}

impl SessionKey {
    pub fn new(conversation_id: i64, sub_channel_id: Option<i64>) -> Self {
        Self { conversation_id, sub_channel_id }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sub_channel_id {
            Some(thread) => write!(f, "{}/{}", self.conversation_id, thread),
            None => write!(f, "{}", self.conversation_id),
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct DebateConfig {
    /// Wait between turns.
    pub cadence: Duration,
    /// Token budget per turn.
    pub max_tokens: u32,
    /// History entries shown to the speaker; the judge sees this many rounds.
    pub context_turns: usize,
    /// Judge posts every this many full rounds. 0 disables the cadence.
    pub judge_summary_every_turns: u64,
    pub judge_summary_max_tokens: u32,
    pub temperature: f32,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(120),
            max_tokens: 120,
            context_turns: 4,
            judge_summary_every_turns: 2,
            judge_summary_max_tokens: 120,
            temperature: 0.6,
        }
    }
}

/// The neutral judge: a summarizer plus the identity it posts with.
#[derive(Clone)]
pub struct Judge {
    pub summarizer: Arc<dyn Summarizer>,
    pub voice: Arc<dyn Delivery>,
}

#[derive(Debug, thiserror::Error)]
pub enum DebateError {
    #[error("turn order is empty")]
    EmptyTurnOrder,
    #[error("unknown participant '{0}'")]
    UnknownParticipant(String),
}

/// Collaborators shared by every session of an orchestrator.
pub struct Stage {
    pub generator: Arc<dyn Generator>,
    roster: Vec<Participant>,
    voices: HashMap<String, Arc<dyn Delivery>>,
    pub judge: Option<Judge>,
    pub store: Persistence,
    pub config: DebateConfig,
}

impl Stage {
    pub fn new(generator: Arc<dyn Generator>, config: DebateConfig) -> Self {
        Self {
            generator,
            roster: Vec::new(),
            voices: HashMap::new(),
            judge: None,
            store: Persistence::disabled(),
            config,
        }
    }

    /// Add a participant. Without a voice its turns are skipped.
    pub fn with_participant(mut self, participant: Participant, voice: Option<Arc<dyn Delivery>>) -> Self {
        if let Some(voice) = voice {
            self.voices.insert(participant.key.clone(), voice);
        }
        self.roster.push(participant);
        self
    }

    pub fn with_judge(mut self, judge: Judge) -> Self {
        self.judge = Some(judge);
        self
    }

    pub fn with_store(mut self, store: Persistence) -> Self {
        self.store = store;
        self
    }

    pub fn roster(&self) -> &[Participant] {
        &self.roster
    }

    pub fn participant(&self, key: &str) -> Option<&Participant> {
        self.roster.iter().find(|p| p.key == key)
    }

    pub fn voice(&self, key: &str) -> Option<&Arc<dyn Delivery>> {
        self.voices.get(key)
    }

    /// Display name for a key, falling back to the key itself.
    pub fn display_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.participant(key).map(|p| p.name.as_str()).unwrap_or(key)
    }

    /// Keys of every participant, in roster order.
    pub fn turn_order(&self) -> Vec<String> {
        self.roster.iter().map(|p| p.key.clone()).collect()
    }
}
