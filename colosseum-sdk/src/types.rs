//! Bot API objects the debate bots consume.
//!
//! Only the fields we read are modelled; serde ignores the rest.

use serde::{Deserialize, Serialize};

/// One entry from `getUpdates`.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Supergroups with forum topics enabled.
    #[serde(default)]
    pub is_forum: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// A chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    /// Forum topic the message belongs to, if any.
    #[serde(default)]
    pub message_thread_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
}

impl Message {
    /// Split a `/command@botname args` message into `(command, args)`.
    ///
    /// The command is lowercased and stripped of its bot-name suffix; args are
    /// trimmed. Returns `None` for anything that isn't a slash command.
    pub fn command(&self) -> Option<(String, String)> {
        let text = self.text.as_deref()?.trim_start();
        let body = text.strip_prefix('/')?;
        let mut parts = body.splitn(2, char::is_whitespace);
        let head = parts.next().unwrap_or_default();
        if head.is_empty() {
            return None;
        }
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let args = parts.next().unwrap_or("").trim().to_string();
        Some((name, args))
    }
}

/// Result of `createForumTopic`.
#[derive(Debug, Clone, Deserialize)]
pub struct ForumTopic {
    pub message_thread_id: i64,
    pub name: String,
}

/// Membership status as reported by `getChatMember`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMember {
    pub status: MemberStatus,
    pub user: User,
}

impl ChatMember {
    pub fn is_admin(&self) -> bool {
        matches!(self.status, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

/// Formatting mode for outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    MarkdownV2,
}

/// Parameters for `sendMessage`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub disable_notification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
}

impl SendMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            message_thread_id: None,
            disable_notification: false,
            reply_to_message_id: None,
            parse_mode: None,
        }
    }

    pub fn in_thread(mut self, thread_id: Option<i64>) -> Self {
        self.message_thread_id = thread_id;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.disable_notification = silent;
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }

    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }
}
