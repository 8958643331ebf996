//! Outbound identities.
//!
//! Each participant (and the judge) speaks through its own [`Delivery`], so
//! a debate reads as several distinct speakers in the group.

use async_trait::async_trait;
use colosseum_sdk::types::SendMessage;
use colosseum_sdk::{ApiError, BotClient};

/// Where a message goes: a chat, optionally a forum topic inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    pub conversation_id: i64,
    pub sub_channel_id: Option<i64>,
}

impl Target {
    pub fn new(conversation_id: i64, sub_channel_id: Option<i64>) -> Self {
        Self { conversation_id, sub_channel_id }
    }
}

/// Provider-assigned id of a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0}")]
    Rejected(String),
}

#[async_trait]
pub trait Delivery: Send + Sync {
    async fn send(&self, target: &Target, text: &str, silent: bool) -> Result<Receipt, DeliveryError>;

    /// Open a fresh sub-channel (forum topic) and return its id.
    async fn create_sub_channel(&self, conversation_id: i64, name: &str) -> Result<i64, DeliveryError>;

    /// Whether `user_id` may run admin commands in the conversation.
    /// Lookup failures count as "no".
    async fn is_privileged(&self, conversation_id: i64, user_id: i64) -> bool;
}

/// A Telegram bot account used as one speaker.
pub struct TelegramVoice {
    bot: BotClient,
}

impl TelegramVoice {
    pub fn new(bot: BotClient) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &BotClient {
        &self.bot
    }
}

#[async_trait]
impl Delivery for TelegramVoice {
    async fn send(&self, target: &Target, text: &str, silent: bool) -> Result<Receipt, DeliveryError> {
        if text.trim().is_empty() {
            return Err(DeliveryError::Rejected("empty message".to_string()));
        }
        let msg = SendMessage::new(target.conversation_id, text)
            .in_thread(target.sub_channel_id)
            .silent(silent);
        let sent = self.bot.send_message(&msg).await?;
        Ok(Receipt { message_id: sent.message_id })
    }

    async fn create_sub_channel(&self, conversation_id: i64, name: &str) -> Result<i64, DeliveryError> {
        let topic = self.bot.create_forum_topic(conversation_id, name).await?;
        Ok(topic.message_thread_id)
    }

    async fn is_privileged(&self, conversation_id: i64, user_id: i64) -> bool {
        match self.bot.get_chat_member(conversation_id, user_id).await {
            Ok(member) => member.is_admin(),
            Err(e) => {
                tracing::debug!(error = %e, conversation_id, user_id, "getChatMember failed");
                false
            }
        }
    }
}
