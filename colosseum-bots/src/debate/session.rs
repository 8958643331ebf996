use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{DebateError, Judge, SessionKey, Stage, prompt};
use crate::delivery::Target;
use crate::llm::{GenerationRequest, TokenUsage};
use crate::store::UsageRecord;

/// One line of debate history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Participant key.
    pub speaker: String,
    pub text: String,
}

/// Mutable turn state, guarded by the session's advancement lock.
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub turn_index: u64,
    pub history: Vec<Utterance>,
    pub judge_summary: Option<String>,
}

/// What a single call to [`Session::advance`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The session was already stopped. Nothing happened.
    Inactive,
    /// The speaker has no delivery identity. The turn was consumed.
    Skipped { speaker: String },
    /// Cancelled while waiting on a provider. Nothing was delivered or recorded.
    Cancelled,
    Spoke {
        speaker: String,
        /// Turn index after this turn.
        turn_index: u64,
        /// False when the text is the failure placeholder.
        generated: bool,
        delivered: bool,
        /// The judge posted after this turn.
        summarized: bool,
    },
}

/// Speaker for `turn_index`, wrapping around the order.
pub fn speaker_at(turn_order: &[String], turn_index: u64) -> &str {
    let len = turn_order.len() as u64;
    &turn_order[(turn_index % len) as usize]
}

/// Whether the judge posts once `turn_index` turns have completed.
pub fn judge_due(turn_index: u64, every: u64, participants: usize) -> bool {
    let period = every.saturating_mul(participants as u64);
    period > 0 && turn_index > 0 && turn_index % period == 0
}

/// A running debate in one chat (and optional forum topic).
pub struct Session {
    key: SessionKey,
    topic_title: String,
    turn_order: Vec<String>,
    external_id: Option<i64>,
    active: AtomicBool,
    cancel: CancellationToken,
    state: Mutex<TurnState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("topic_title", &self.topic_title)
            .field("turn_order", &self.turn_order)
            .field("external_id", &self.external_id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        key: SessionKey,
        topic_title: String,
        turn_order: Vec<String>,
        external_id: Option<i64>,
    ) -> Result<Self, DebateError> {
        if turn_order.is_empty() {
            return Err(DebateError::EmptyTurnOrder);
        }
        Ok(Self {
            key,
            topic_title,
            turn_order,
            external_id,
            active: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            state: Mutex::new(TurnState::default()),
        })
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn topic_title(&self) -> &str {
        &self.topic_title
    }

    pub fn turn_order(&self) -> &[String] {
        &self.turn_order
    }

    /// Store row id, if the session was persisted.
    pub fn external_id(&self) -> Option<i64> {
        self.external_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Mark the session stopped and cancel in-flight provider calls.
    /// Returns true only for the call that performed the transition.
    pub(crate) fn deactivate(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        self.cancel.cancel();
        was_active
    }

    /// Copy of the current turn state. Waits for any in-progress turn.
    pub async fn snapshot(&self) -> TurnState {
        self.state.lock().await.clone()
    }

    pub async fn turn_index(&self) -> u64 {
        self.state.lock().await.turn_index
    }

    /// Speaker of the next turn.
    pub async fn next_speaker(&self) -> String {
        let state = self.state.lock().await;
        speaker_at(&self.turn_order, state.turn_index).to_string()
    }

    fn target(&self) -> Target {
        Target::new(self.key.conversation_id, self.key.sub_channel_id)
    }

    /// Run one turn: generate, deliver, record, and maybe post a judge summary.
    pub async fn advance(&self, stage: &Stage) -> Result<TurnOutcome, DebateError> {
        let mut state = self.state.lock().await;
        if !self.is_active() {
            return Ok(TurnOutcome::Inactive);
        }

        let speaker_key = speaker_at(&self.turn_order, state.turn_index).to_string();
        let speaker = stage
            .participant(&speaker_key)
            .ok_or_else(|| DebateError::UnknownParticipant(speaker_key.clone()))?;
        let Some(voice) = stage.voice(&speaker_key) else {
            state.turn_index += 1;
            tracing::debug!(session = %self.key, speaker = %speaker_key, "No delivery identity, turn skipped");
            return Ok(TurnOutcome::Skipped { speaker: speaker_key });
        };

        let request = GenerationRequest {
            model: speaker.model.clone(),
            messages: prompt::turn_messages(
                stage,
                speaker,
                &self.topic_title,
                &state.history,
                state.judge_summary.as_deref(),
            ),
            temperature: stage.config.temperature,
            max_tokens: stage.config.max_tokens,
            stop: prompt::stop_sequences(stage),
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
            r = stage.generator.generate(&request) => r,
        };
        if !self.is_active() {
            return Ok(TurnOutcome::Cancelled);
        }

        let (text, generated) = match result {
            Ok(generation) => {
                if let Some(usage) = generation.usage {
                    self.record_usage(stage, stage.generator.provider(), &speaker.model, &speaker_key, usage);
                }
                (generation.text, true)
            }
            Err(e) => {
                tracing::warn!(session = %self.key, speaker = %speaker_key, error = %e, "Generation failed");
                (prompt::generation_failed(&e), false)
            }
        };

        // From here the turn completes even if the session is stopped meanwhile.
        let receipt = match voice.send(&self.target(), &text, true).await {
            Ok(receipt) => Some(receipt.message_id),
            Err(e) => {
                tracing::warn!(session = %self.key, speaker = %speaker_key, error = %e, "Delivery failed");
                None
            }
        };
        state.history.push(Utterance { speaker: speaker_key.clone(), text: text.clone() });
        state.turn_index += 1;
        let turn_index = state.turn_index;
        tracing::info!(session = %self.key, speaker = %speaker_key, turn_index, "Turn complete");

        if let Err(e) = stage.store.record_utterance(self.external_id, &text, receipt, "assistant") {
            tracing::debug!(session = %self.key, error = %e, "Utterance not recorded");
        }

        let mut summarized = false;
        if let Some(judge) = stage.judge.as_ref()
            && judge_due(turn_index, stage.config.judge_summary_every_turns, self.turn_order.len())
        {
            summarized = self.summarize_locked(&mut state, stage, judge).await;
        }

        Ok(TurnOutcome::Spoke {
            speaker: speaker_key,
            turn_index,
            generated,
            delivered: receipt.is_some(),
            summarized,
        })
    }

    /// Post a judge summary right away. False when stopped or no judge is configured.
    pub async fn post_summary_now(&self, stage: &Stage) -> bool {
        let Some(judge) = stage.judge.as_ref() else {
            return false;
        };
        let mut state = self.state.lock().await;
        if !self.is_active() {
            return false;
        }
        self.summarize_locked(&mut state, stage, judge).await
    }

    /// Judge procedure. Caller holds the advancement lock.
    async fn summarize_locked(&self, state: &mut TurnState, stage: &Stage, judge: &Judge) -> bool {
        let window = stage.config.context_turns * self.turn_order.len();
        let start = state.history.len().saturating_sub(window);
        let texts: Vec<String> = state.history[start..].iter().map(|u| u.text.clone()).collect();

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            r = judge.summarizer.summarize(&texts, stage.config.judge_summary_max_tokens) => r,
        };
        let summary = match result {
            Ok(summary) => {
                if let Some(usage) = summary.usage {
                    self.record_usage(stage, judge.summarizer.provider(), judge.summarizer.model(), "judge", usage);
                }
                summary.text
            }
            Err(e) => {
                tracing::warn!(session = %self.key, error = %e, "Judge summary failed");
                prompt::summary_failed(&e)
            }
        };
        state.judge_summary = Some(summary.clone());

        let post = prompt::judge_post(&summary);
        let receipt = match judge.voice.send(&self.target(), &post, true).await {
            Ok(receipt) => Some(receipt.message_id),
            Err(e) => {
                tracing::warn!(session = %self.key, error = %e, "Judge delivery failed");
                None
            }
        };
        if let Err(e) = stage.store.record_utterance(self.external_id, &post, receipt, "system") {
            tracing::debug!(session = %self.key, error = %e, "Judge summary not recorded");
        }
        true
    }

    fn record_usage(&self, stage: &Stage, provider: &str, model: &str, role: &str, usage: TokenUsage) {
        let record = UsageRecord {
            session_id: self.external_id,
            conversation_id: self.key.conversation_id,
            sub_channel_id: self.key.sub_channel_id,
            provider: provider.to_string(),
            model: model.to_string(),
            role: role.to_string(),
            usage,
            meta: Some(serde_json::json!({ "topic": self.topic_title })),
        };
        if let Err(e) = stage.store.record_usage(&record) {
            tracing::debug!(session = %self.key, error = %e, "Usage not recorded");
        }
    }
}
