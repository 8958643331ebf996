//! Optional debate log backed by SQLite.
//!
//! Records session lifecycle, every delivered utterance, and token usage.
//! Nothing here is required for a debate to run: the engine goes through
//! [`Persistence`], which reports [`StoreError::Unavailable`] when no store is
//! configured, and every engine call site treats failures as no-ops.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::llm::TokenUsage;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("persistence is not configured")]
    Unavailable,
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One usage event to record.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub session_id: Option<i64>,
    pub conversation_id: i64,
    pub sub_channel_id: Option<i64>,
    pub provider: String,
    pub model: String,
    pub role: String,
    pub usage: TokenUsage,
    pub meta: Option<serde_json::Value>,
}

/// Aggregated usage per provider/model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRow {
    pub provider: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A stored utterance (inspection only).
#[derive(Debug, Clone)]
pub struct UtteranceRow {
    pub role: String,
    pub content: String,
    pub delivery_msg_id: Option<i64>,
}

pub trait Store: Send + Sync {
    /// Insert an active session (creating its topic row if needed) and return its id.
    fn create_session(&self, conversation_id: i64, topic_title: &str) -> Result<i64, StoreError>;

    fn end_session(&self, session_id: i64) -> Result<(), StoreError>;

    fn record_utterance(
        &self,
        session_id: i64,
        text: &str,
        delivery_msg_id: Option<i64>,
        role: &str,
    ) -> Result<(), StoreError>;

    fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError>;

    /// Usage in the last `hours`, grouped by provider and model.
    fn usage_summary(
        &self,
        conversation_id: i64,
        hours: u32,
        sub_channel_id: Option<i64>,
    ) -> Result<Vec<UsageRow>, StoreError>;

    fn ensure_topic(&self, title: &str, description: Option<&str>, tags: &[String]) -> Result<(), StoreError>;
}

/// Handle the engine holds: a store, or nothing.
///
/// Calls are synchronous and short; they run inline on the calling task.
#[derive(Clone, Default)]
pub struct Persistence {
    store: Option<Arc<dyn Store>>,
}

impl Persistence {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    fn store(&self) -> Result<&dyn Store, StoreError> {
        self.store.as_deref().ok_or(StoreError::Unavailable)
    }

    pub fn create_session(&self, conversation_id: i64, topic_title: &str) -> Result<i64, StoreError> {
        self.store()?.create_session(conversation_id, topic_title)
    }

    pub fn end_session(&self, session_id: Option<i64>) -> Result<(), StoreError> {
        self.store()?.end_session(session_id.ok_or(StoreError::Unavailable)?)
    }

    pub fn record_utterance(
        &self,
        session_id: Option<i64>,
        text: &str,
        delivery_msg_id: Option<i64>,
        role: &str,
    ) -> Result<(), StoreError> {
        let id = session_id.ok_or(StoreError::Unavailable)?;
        self.store()?.record_utterance(id, text, delivery_msg_id, role)
    }

    pub fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.store()?.record_usage(record)
    }

    pub fn usage_summary(
        &self,
        conversation_id: i64,
        hours: u32,
        sub_channel_id: Option<i64>,
    ) -> Result<Vec<UsageRow>, StoreError> {
        self.store()?.usage_summary(conversation_id, hours, sub_channel_id)
    }

    pub fn ensure_topic(&self, title: &str, description: Option<&str>, tags: &[String]) -> Result<(), StoreError> {
        self.store()?.ensure_topic(title, description, tags)
    }
}

/// SQLite implementation of [`Store`].
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS topics (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                title       TEXT NOT NULL UNIQUE,
                description TEXT,
                tags        TEXT NOT NULL DEFAULT '[]',
                created_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS debate_sessions (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                topic_id    INTEGER NOT NULL REFERENCES topics(id),
                chat_id     INTEGER NOT NULL,
                status      TEXT NOT NULL,
                started_at  INTEGER NOT NULL,
                ended_at    INTEGER
            );

            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id      INTEGER NOT NULL REFERENCES debate_sessions(id) ON DELETE CASCADE,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                delivery_msg_id INTEGER,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, id);

            CREATE TABLE IF NOT EXISTS usage (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id        INTEGER,
                chat_id           INTEGER NOT NULL,
                thread_id         INTEGER,
                provider          TEXT NOT NULL,
                model             TEXT NOT NULL,
                role              TEXT NOT NULL,
                prompt_tokens     INTEGER NOT NULL DEFAULT 0,
                completion_tokens INTEGER NOT NULL DEFAULT 0,
                total_tokens      INTEGER,
                meta              TEXT,
                created_at        INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_usage_chat_time
                ON usage(chat_id, created_at);
            ",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Usage since a unix timestamp. [`Store::usage_summary`] wraps this.
    pub fn usage_since(
        &self,
        conversation_id: i64,
        since: i64,
        sub_channel_id: Option<i64>,
    ) -> Result<Vec<UsageRow>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT provider, model,
                    SUM(prompt_tokens),
                    SUM(completion_tokens),
                    SUM(COALESCE(total_tokens, prompt_tokens + completion_tokens)) AS total
             FROM usage
             WHERE chat_id = ?1 AND created_at >= ?2 AND (?3 IS NULL OR thread_id = ?3)
             GROUP BY provider, model
             ORDER BY total DESC, provider, model",
        )?;
        let rows = stmt
            .query_map(params![conversation_id, since, sub_channel_id], |row| {
                Ok(UsageRow {
                    provider: row.get(0)?,
                    model: row.get(1)?,
                    prompt_tokens: row.get::<_, i64>(2)? as u64,
                    completion_tokens: row.get::<_, i64>(3)? as u64,
                    total_tokens: row.get::<_, i64>(4)? as u64,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `status` column of a session row.
    pub fn session_status(&self, session_id: i64) -> Result<Option<String>, StoreError> {
        let db = self.db.lock();
        let status = db
            .query_row(
                "SELECT status FROM debate_sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }

    /// Utterances of a session, oldest first.
    pub fn utterances(&self, session_id: i64) -> Result<Vec<UtteranceRow>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT role, content, delivery_msg_id FROM messages
             WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(UtteranceRow {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    delivery_msg_id: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl Store for SqliteStore {
    fn create_session(&self, conversation_id: i64, topic_title: &str) -> Result<i64, StoreError> {
        let mut db = self.db.lock();
        let now = Utc::now().timestamp();
        let tx = db.transaction()?;
        let topic_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM topics WHERE title = ?1 LIMIT 1",
                params![topic_title],
                |row| row.get(0),
            )
            .optional()?;
        let topic_id = match topic_id {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO topics (title, created_at) VALUES (?1, ?2)",
                    params![topic_title, now],
                )?;
                tx.last_insert_rowid()
            }
        };
        tx.execute(
            "INSERT INTO debate_sessions (topic_id, chat_id, status, started_at)
             VALUES (?1, ?2, 'active', ?3)",
            params![topic_id, conversation_id, now],
        )?;
        let session_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(session_id)
    }

    fn end_session(&self, session_id: i64) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute(
            "UPDATE debate_sessions SET status = 'ended', ended_at = ?2 WHERE id = ?1",
            params![session_id, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn record_utterance(
        &self,
        session_id: i64,
        text: &str,
        delivery_msg_id: Option<i64>,
        role: &str,
    ) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute(
            "INSERT INTO messages (session_id, role, content, delivery_msg_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, role, text, delivery_msg_id, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn record_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let meta = record.meta.as_ref().map(serde_json::to_string).transpose()?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO usage (session_id, chat_id, thread_id, provider, model, role,
                                prompt_tokens, completion_tokens, total_tokens, meta, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.session_id,
                record.conversation_id,
                record.sub_channel_id,
                record.provider,
                record.model,
                record.role,
                record.usage.prompt_tokens as i64,
                record.usage.completion_tokens as i64,
                record.usage.total_tokens.map(|t| t as i64),
                meta,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    fn usage_summary(
        &self,
        conversation_id: i64,
        hours: u32,
        sub_channel_id: Option<i64>,
    ) -> Result<Vec<UsageRow>, StoreError> {
        let since = Utc::now().timestamp() - i64::from(hours) * 3600;
        self.usage_since(conversation_id, since, sub_channel_id)
    }

    fn ensure_topic(&self, title: &str, description: Option<&str>, tags: &[String]) -> Result<(), StoreError> {
        let tags = serde_json::to_string(tags)?;
        let db = self.db.lock();
        db.execute(
            "INSERT INTO topics (title, description, tags, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(title) DO UPDATE SET
                description = COALESCE(excluded.description, topics.description),
                tags = CASE WHEN excluded.tags = '[]' THEN topics.tags ELSE excluded.tags END",
            params![title, description, tags, Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u64, completion: u64, total: Option<u64>) -> UsageRecord {
        UsageRecord {
            session_id: None,
            conversation_id: -100,
            sub_channel_id: Some(4),
            provider: "groq".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            role: "optimist".to_string(),
            usage: TokenUsage { prompt_tokens: prompt, completion_tokens: completion, total_tokens: total },
            meta: None,
        }
    }

    #[test]
    fn session_lifecycle() {
        let store = SqliteStore::open_memory().unwrap();
        let id = store.create_session(-100, "Pajak karbon").unwrap();
        assert_eq!(store.session_status(id).unwrap().as_deref(), Some("active"));

        store.record_utterance(id, "- poin", Some(55), "assistant").unwrap();
        store.record_utterance(id, "ringkasan", None, "system").unwrap();
        let rows = store.utterances(id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].delivery_msg_id, Some(55));
        assert_eq!(rows[1].role, "system");

        store.end_session(id).unwrap();
        assert_eq!(store.session_status(id).unwrap().as_deref(), Some("ended"));
    }

    #[test]
    fn sessions_reuse_topic_rows() {
        let store = SqliteStore::open_memory().unwrap();
        let a = store.create_session(-1, "Energi nuklir").unwrap();
        let b = store.create_session(-2, "Energi nuklir").unwrap();
        assert_ne!(a, b);
        let db = store.db.lock();
        let topics: i64 = db.query_row("SELECT COUNT(*) FROM topics", [], |r| r.get(0)).unwrap();
        assert_eq!(topics, 1);
    }

    #[test]
    fn usage_aggregates_per_model() {
        let store = SqliteStore::open_memory().unwrap();
        store.record_usage(&usage(10, 5, Some(15))).unwrap();
        store.record_usage(&usage(3, 2, Some(5))).unwrap();

        let rows = store.usage_summary(-100, 24, None).unwrap();
        assert_eq!(
            rows,
            vec![UsageRow {
                provider: "groq".to_string(),
                model: "llama-3.1-8b-instant".to_string(),
                prompt_tokens: 13,
                completion_tokens: 7,
                total_tokens: 20,
            }]
        );
    }

    #[test]
    fn usage_total_derived_when_missing() {
        let store = SqliteStore::open_memory().unwrap();
        store.record_usage(&usage(10, 5, None)).unwrap();
        store.record_usage(&usage(3, 2, None)).unwrap();
        let rows = store.usage_summary(-100, 1, Some(4)).unwrap();
        assert_eq!(rows[0].total_tokens, 20);
    }

    #[test]
    fn usage_filters_thread_and_window() {
        let store = SqliteStore::open_memory().unwrap();
        store.record_usage(&usage(10, 5, None)).unwrap();
        assert!(store.usage_summary(-100, 24, Some(99)).unwrap().is_empty());
        assert!(store.usage_summary(-200, 24, None).unwrap().is_empty());
        let future = Utc::now().timestamp() + 3600;
        assert!(store.usage_since(-100, future, None).unwrap().is_empty());
    }

    #[test]
    fn ensure_topic_is_idempotent() {
        let store = SqliteStore::open_memory().unwrap();
        store.ensure_topic("Sekolah empat hari", None, &[]).unwrap();
        store
            .ensure_topic("Sekolah empat hari", Some("pendidikan"), &["edu".to_string()])
            .unwrap();
        store.ensure_topic("Sekolah empat hari", None, &[]).unwrap();
        let db = store.db.lock();
        let (count, desc, tags): (i64, Option<String>, String) = db
            .query_row(
                "SELECT COUNT(*), MAX(description), MAX(tags) FROM topics",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(desc.as_deref(), Some("pendidikan"));
        assert_eq!(tags, "[\"edu\"]");
    }

    #[test]
    fn disabled_persistence_is_unavailable() {
        let p = Persistence::disabled();
        assert!(!p.is_configured());
        assert!(matches!(p.create_session(1, "x"), Err(StoreError::Unavailable)));
        assert!(matches!(p.usage_summary(1, 24, None), Err(StoreError::Unavailable)));
    }

    #[test]
    fn missing_session_id_is_unavailable() {
        let p = Persistence::new(Arc::new(SqliteStore::open_memory().unwrap()));
        assert!(matches!(
            p.record_utterance(None, "x", None, "assistant"),
            Err(StoreError::Unavailable)
        ));
    }
}
