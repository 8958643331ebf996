use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{DebateError, Session, SessionKey, Stage, scheduler};

struct Entry {
    session: Arc<Session>,
    task: Option<JoinHandle<()>>,
}

/// Registry of debate sessions, at most one active per chat/topic.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Orchestrator {
    stage: Arc<Stage>,
    sessions: Arc<Mutex<HashMap<SessionKey, Entry>>>,
}

impl Orchestrator {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage: Arc::new(stage),
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Start a debate, or return the one already running at this key.
    ///
    /// A stopped session at the key is replaced by a fresh one. Every key in
    /// `turn_order` must name a participant on the stage.
    pub async fn start(
        &self,
        conversation_id: i64,
        sub_channel_id: Option<i64>,
        topic_title: &str,
        turn_order: Vec<String>,
    ) -> Result<Arc<Session>, DebateError> {
        let key = SessionKey::new(conversation_id, sub_channel_id);
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get(&key)
            && entry.session.is_active()
        {
            return Ok(entry.session.clone());
        }
        if turn_order.is_empty() {
            return Err(DebateError::EmptyTurnOrder);
        }
        if let Some(unknown) = turn_order.iter().find(|k| self.stage.participant(k).is_none()) {
            return Err(DebateError::UnknownParticipant(unknown.clone()));
        }

        let external_id = match self.stage.store.create_session(conversation_id, topic_title) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::debug!(session = %key, error = %e, "Session not persisted");
                None
            }
        };
        let session = Arc::new(Session::new(key, topic_title.to_string(), turn_order, external_id)?);
        let task = tokio::spawn(scheduler::run_turns(session.clone(), self.stage.clone()));
        sessions.insert(key, Entry { session: session.clone(), task: Some(task) });
        tracing::info!(session = %key, topic = %topic_title, "Debate started");
        Ok(session)
    }

    /// Stop the session at this key and wait for its loop to exit.
    /// False when there is no session here at all.
    pub async fn stop(&self, conversation_id: i64, sub_channel_id: Option<i64>) -> bool {
        let key = SessionKey::new(conversation_id, sub_channel_id);
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&key) {
            Some(entry) => {
                self.stop_entry(key, entry).await;
                true
            }
            None => false,
        }
    }

    /// Stop every active session in a conversation. Returns how many were stopped.
    pub async fn stop_all(&self, conversation_id: i64) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut count = 0;
        for (key, entry) in sessions.iter_mut() {
            if key.conversation_id == conversation_id && entry.session.is_active() {
                self.stop_entry(*key, entry).await;
                count += 1;
            }
        }
        count
    }

    async fn stop_entry(&self, key: SessionKey, entry: &mut Entry) {
        let transitioned = entry.session.deactivate();
        if let Some(task) = entry.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(session = %key, error = %e, "Turn loop ended abnormally");
        }
        if transitioned {
            if let Err(e) = self.stage.store.end_session(entry.session.external_id()) {
                tracing::debug!(session = %key, error = %e, "Session end not recorded");
            }
            tracing::info!(session = %key, "Debate stopped");
        }
    }

    pub async fn get(&self, conversation_id: i64, sub_channel_id: Option<i64>) -> Option<Arc<Session>> {
        let key = SessionKey::new(conversation_id, sub_channel_id);
        self.sessions.lock().await.get(&key).map(|e| e.session.clone())
    }

    /// Active sessions in a conversation.
    pub async fn active_in(&self, conversation_id: i64) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .await
            .iter()
            .filter(|(k, e)| k.conversation_id == conversation_id && e.session.is_active())
            .map(|(_, e)| e.session.clone())
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.values().filter(|e| e.session.is_active()).count()
    }

    /// Ask the judge for a summary now. False without an active session or a judge.
    pub async fn post_summary_now(&self, conversation_id: i64, sub_channel_id: Option<i64>) -> bool {
        if self.stage.judge.is_none() {
            return false;
        }
        let Some(session) = self.get(conversation_id, sub_channel_id).await else {
            return false;
        };
        session.post_summary_now(&self.stage).await
    }

    /// Stop everything. Used at process exit.
    pub async fn shutdown(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut count = 0;
        for (key, entry) in sessions.iter_mut() {
            if entry.session.is_active() {
                count += 1;
            }
            self.stop_entry(*key, entry).await;
        }
        tracing::info!(stopped = count, "Orchestrator shut down");
        count
    }
}
