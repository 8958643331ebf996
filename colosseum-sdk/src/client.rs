//! Telegram Bot API client.
//!
//! Every method goes through [`BotClient::call`], which decodes the Bot API
//! response envelope. Long polling runs in a spawned task (see [`updates`])
//! and hands [`Update`]s to the consumer over a channel.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::{ChatMember, ForumTopic, Message, SendMessage, Update, User};

/// Default Bot API endpoint.
pub const API_BASE: &str = "https://api.telegram.org";

/// Telegram rejects messages longer than this (in characters).
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("bot api error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("bot api returned ok without a result")]
    MissingResult,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T, ApiError> {
        if !self.ok {
            return Err(ApiError::Api {
                code: self.error_code.unwrap_or_default(),
                description: self.description.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        self.result.ok_or(ApiError::MissingResult)
    }
}

/// A bot identity. Cheap to clone; clones share the HTTP pool.
#[derive(Clone)]
pub struct BotClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print the token
        f.debug_struct("BotClient").field("base_url", &self.base_url).finish()
    }
}

impl BotClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: API_BASE.to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(75))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point the client at a different API server (local Bot API server, tests).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Invoke a Bot API method with a JSON body.
    pub async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        // Bot API reports failures in the envelope, with a matching HTTP status.
        let envelope: Envelope<T> = resp.json().await?;
        envelope.into_result()
    }

    pub async fn get_me(&self) -> Result<User, ApiError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    pub async fn send_message(&self, msg: &SendMessage) -> Result<Message, ApiError> {
        if msg.text.chars().count() > MAX_MESSAGE_CHARS {
            let mut clipped = msg.clone();
            clipped.text = clip(&msg.text, MAX_MESSAGE_CHARS);
            return self.call("sendMessage", &clipped).await;
        }
        self.call("sendMessage", msg).await
    }

    /// Create a forum topic. Needs `can_manage_topics` in a forum supergroup.
    pub async fn create_forum_topic(&self, chat_id: i64, name: &str) -> Result<ForumTopic, ApiError> {
        self.call(
            "createForumTopic",
            &serde_json::json!({ "chat_id": chat_id, "name": clip(name, 128) }),
        )
        .await
    }

    pub async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> Result<ChatMember, ApiError> {
        self.call(
            "getChatMember",
            &serde_json::json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await
    }

    /// Long-poll for updates newer than `offset`.
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>, ApiError> {
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": timeout.as_secs(),
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

/// Truncate to at most `max` characters, never splitting a char.
pub fn clip(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Long-poll tuning.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Server-side long-poll timeout.
    pub timeout: Duration,
    /// Delay after the first consecutive failure.
    pub initial_delay: Duration,
    /// Cap for the backoff delay.
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(50),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

/// Handle to a running poll loop. Dropping it does not stop the loop.
pub struct UpdatesHandle {
    task: JoinHandle<()>,
}

impl UpdatesHandle {
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Start long polling in a background task.
///
/// Returns a handle for stopping the loop and a receiver of updates. The loop
/// ends on its own once the receiver is dropped.
pub fn updates(client: BotClient, config: PollConfig) -> (UpdatesHandle, mpsc::Receiver<Update>) {
    let (tx, rx) = mpsc::channel(256);
    let task = tokio::spawn(async move {
        let mut offset = 0i64;
        let mut delay = config.initial_delay;
        loop {
            match client.get_updates(offset, config.timeout).await {
                Ok(batch) => {
                    delay = config.initial_delay;
                    for update in batch {
                        offset = offset.max(update.update_id + 1);
                        if tx.send(update).await.is_err() {
                            tracing::debug!("Update receiver dropped, stopping poll loop");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, delay_secs = delay.as_secs(), "getUpdates failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = Duration::from_millis(
                        ((delay.as_millis() as f64 * config.backoff_factor) as u64)
                            .min(config.max_delay.as_millis() as u64),
                    );
                }
            }
            if tx.is_closed() {
                return;
            }
        }
    });
    (UpdatesHandle { task }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_error_maps_to_api_error() {
        let env: Envelope<Message> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: not enough rights to create a topic"
        }))
        .unwrap();
        match env.into_result() {
            Err(ApiError::Api { code, description }) => {
                assert_eq!(code, 400);
                assert!(description.contains("not enough rights"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn envelope_ok_returns_result() {
        let env: Envelope<ForumTopic> = serde_json::from_value(serde_json::json!({
            "ok": true,
            "result": {"message_thread_id": 12, "name": "Energi nuklir", "icon_color": 7322096}
        }))
        .unwrap();
        let topic = env.into_result().unwrap();
        assert_eq!(topic.message_thread_id, 12);
    }

    #[test]
    fn envelope_ok_without_result() {
        let env: Envelope<ForumTopic> = serde_json::from_value(serde_json::json!({"ok": true})).unwrap();
        assert!(matches!(env.into_result(), Err(ApiError::MissingResult)));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("abc", 10), "abc");
        assert_eq!(clip("🙂🙂🙂", 1), "🙂");
    }

    #[test]
    fn debug_hides_token() {
        let client = BotClient::new("123:SECRET");
        assert!(!format!("{client:?}").contains("SECRET"));
    }
}
