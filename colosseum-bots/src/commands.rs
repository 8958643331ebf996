//! Chat command surface of the judge bot.
//!
//! [`Commander::handle`] turns one [`Invocation`] into reply texts. The
//! caller decides how to send them (the binary replies to the triggering
//! message).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use chrono::FixedOffset;
use colosseum_sdk::types::Message;
use parking_lot::Mutex;

use crate::debate::{Clock, DailyTime, DailyTrigger, Orchestrator};
use crate::delivery::Delivery;
use crate::store::{StoreError, UsageRow};

const ADMIN_ONLY: &str = "Perintah ini khusus admin.";
const NO_SESSION: &str = "Tidak ada sesi aktif.";
const TOPICS_PER_REQUEST: usize = 5;
const DEFAULT_USAGE_HOURS: u32 = 24;

const HELP: &str = "Perintah:\n\
/start_debate [topik] - mulai debat di thread ini\n\
/stop_debate - hentikan debat di thread ini\n\
/next_topic - topik berikutnya di forum topic baru\n\
/summary - minta ringkasan juri sekarang\n\
/enable_daily [HH:MM] - debat harian otomatis\n\
/disable_daily - matikan debat harian\n\
/status - status sesi\n\
/usage [jam] - pemakaian token\n\
/topics [kata kunci] - usulan topik dari juri\n\
/help - daftar perintah";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartDebate(Option<String>),
    StopDebate,
    NextTopic,
    Summary,
    EnableDaily(Option<String>),
    DisableDaily,
    Status,
    Usage(Option<String>),
    Topics(Option<String>),
    Help,
}

impl Command {
    /// Recognize a command by name. Unknown names are `None`.
    pub fn parse(name: &str, args: &str) -> Option<Self> {
        let arg = (!args.trim().is_empty()).then(|| args.trim().to_string());
        Some(match name {
            "start_debate" => Command::StartDebate(arg),
            "stop_debate" => Command::StopDebate,
            "next_topic" => Command::NextTopic,
            "summary" => Command::Summary,
            "enable_daily" => Command::EnableDaily(arg),
            "disable_daily" => Command::DisableDaily,
            "status" => Command::Status,
            "usage" => Command::Usage(arg),
            "topics" => Command::Topics(arg),
            "help" | "start" => Command::Help,
            _ => return None,
        })
    }

    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Status | Command::Help)
    }
}

/// A command plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub conversation_id: i64,
    pub sub_channel_id: Option<i64>,
    pub user_id: Option<i64>,
    pub command: Command,
}

impl Invocation {
    pub fn from_message(msg: &Message) -> Option<Self> {
        let (name, args) = msg.command()?;
        Some(Self {
            conversation_id: msg.chat.id,
            sub_channel_id: msg.message_thread_id,
            user_id: msg.from.as_ref().map(|u| u.id),
            command: Command::parse(&name, &args)?,
        })
    }
}

/// Command handler state shared by every dispatched command.
pub struct Commander {
    orchestrator: Orchestrator,
    host: Arc<dyn Delivery>,
    turn_order: Vec<String>,
    topics: Mutex<VecDeque<String>>,
    triggers: Mutex<HashMap<i64, Arc<DailyTrigger>>>,
    daily_time: DailyTime,
    tz_offset: FixedOffset,
    clock: Option<Clock>,
}

impl Commander {
    pub fn new(
        orchestrator: Orchestrator,
        host: Arc<dyn Delivery>,
        turn_order: Vec<String>,
        topics: Vec<String>,
        daily_time: DailyTime,
        tz_offset: FixedOffset,
    ) -> Self {
        Self {
            orchestrator,
            host,
            turn_order,
            topics: Mutex::new(topics.into()),
            triggers: Mutex::new(HashMap::new()),
            daily_time,
            tz_offset,
            clock: None,
        }
    }

    /// Clock handed to daily triggers created from now on.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Current topic rotation, front first.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    fn trigger(&self, conversation_id: i64) -> Arc<DailyTrigger> {
        self.triggers
            .lock()
            .entry(conversation_id)
            .or_insert_with(|| {
                let mut trigger = DailyTrigger::new(self.orchestrator.clone(), self.host.clone(), self.tz_offset);
                if let Some(clock) = &self.clock {
                    trigger = trigger.with_clock(clock.clone());
                }
                Arc::new(trigger)
            })
            .clone()
    }

    /// Run one command and return the replies.
    pub async fn handle(&self, inv: &Invocation) -> Result<Vec<String>> {
        if inv.command.requires_admin() {
            let Some(user_id) = inv.user_id else {
                return Ok(Vec::new());
            };
            if !self.host.is_privileged(inv.conversation_id, user_id).await {
                return Ok(vec![ADMIN_ONLY.to_string()]);
            }
        }
        tracing::info!(chat_id = inv.conversation_id, thread_id = ?inv.sub_channel_id, command = ?inv.command, "Command");

        let conv = inv.conversation_id;
        let replies = match &inv.command {
            Command::StartDebate(topic) => {
                let title = topic
                    .clone()
                    .or_else(|| self.topics.lock().front().cloned())
                    .unwrap_or_else(|| "Debate".to_string());
                self.orchestrator.stop_all(conv).await;
                self.orchestrator
                    .start(conv, inv.sub_channel_id, &title, self.turn_order.clone())
                    .await?;
                vec![format!("Debat dimulai. Topik: {title}")]
            }
            Command::StopDebate => {
                let stopped = self.orchestrator.stop(conv, inv.sub_channel_id).await;
                vec![if stopped { "Debat dihentikan." } else { NO_SESSION }.to_string()]
            }
            Command::NextTopic => self.next_topic(inv).await?,
            Command::Summary => {
                let ok = self.orchestrator.post_summary_now(conv, inv.sub_channel_id).await;
                vec![if ok { "Ringkasan juri diminta." } else { "Tidak ada sesi atau juri non-aktif." }.to_string()]
            }
            Command::EnableDaily(arg) => {
                let time = match arg {
                    Some(raw) => match raw.parse::<DailyTime>() {
                        Ok(time) => time,
                        Err(_) => return Ok(vec!["Format waktu tidak valid, gunakan HH:MM.".to_string()]),
                    },
                    None => self.daily_time,
                };
                self.trigger(conv).start(conv, time, self.topics(), self.turn_order.clone());
                vec![format!("Penjadwalan harian diaktifkan ({time}).")]
            }
            Command::DisableDaily => {
                let trigger = self.triggers.lock().get(&conv).cloned();
                let cancelled = trigger.is_some_and(|t| t.cancel());
                vec![if cancelled { "Penjadwalan harian dimatikan." } else { "Tidak ada penjadwalan aktif." }.to_string()]
            }
            Command::Status => vec![self.status(inv).await],
            Command::Usage(arg) => vec![self.usage(inv, arg.as_deref())],
            Command::Topics(keyword) => vec![self.suggest_topics(keyword.as_deref()).await],
            Command::Help => vec![HELP.to_string()],
        };
        Ok(replies)
    }

    async fn next_topic(&self, inv: &Invocation) -> Result<Vec<String>> {
        let conv = inv.conversation_id;
        self.orchestrator.stop_all(conv).await;
        let title = {
            let mut topics = self.topics.lock();
            let title = topics.pop_front().unwrap_or_else(|| "Topik Baru".to_string());
            topics.push_back(title.clone());
            title
        };

        let mut replies = Vec::new();
        let sub_channel_id = match self.host.create_sub_channel(conv, &title).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(chat_id = conv, error = %e, "Forum topic not created");
                replies.push(format!("Gagal membuat topik forum baru: {e}. Memulai di thread saat ini."));
                inv.sub_channel_id
            }
        };
        self.orchestrator
            .start(conv, sub_channel_id, &title, self.turn_order.clone())
            .await?;
        replies.push(format!("Topik berikutnya dimulai: {title}"));
        Ok(replies)
    }

    async fn status(&self, inv: &Invocation) -> String {
        let session = self
            .orchestrator
            .get(inv.conversation_id, inv.sub_channel_id)
            .await
            .filter(|s| s.is_active());
        let Some(session) = session else {
            return NO_SESSION.to_string();
        };
        format!(
            "Topik: {}\nGiliran: {}\nPeserta: {}",
            session.topic_title(),
            session.turn_index().await,
            session.turn_order().join(", ")
        )
    }

    fn usage(&self, inv: &Invocation, arg: Option<&str>) -> String {
        let hours = match arg {
            Some(raw) => match raw.parse::<u32>() {
                Ok(h) if h > 0 => h,
                _ => return "Format: /usage [jam]".to_string(),
            },
            None => DEFAULT_USAGE_HOURS,
        };
        let store = &self.orchestrator.stage().store;
        match store.usage_summary(inv.conversation_id, hours, inv.sub_channel_id) {
            Ok(rows) => usage_report(&rows, hours),
            Err(StoreError::Unavailable) => "Statistik tidak tersedia (database tidak dikonfigurasi).".to_string(),
            Err(e) => {
                tracing::warn!(chat_id = inv.conversation_id, error = %e, "Usage query failed");
                format!("Gagal membaca statistik: {e}")
            }
        }
    }

    async fn suggest_topics(&self, keyword: Option<&str>) -> String {
        let Some(judge) = self.orchestrator.stage().judge.as_ref() else {
            return "Juri non-aktif, tidak bisa membuat topik.".to_string();
        };
        let titles = match judge.summarizer.generate_topics(keyword, TOPICS_PER_REQUEST).await {
            Ok(titles) => titles,
            Err(e) => {
                tracing::warn!(error = %e, "Topic generation failed");
                return format!("Gagal membuat topik: {e}");
            }
        };
        if titles.is_empty() {
            return "Tidak ada topik baru.".to_string();
        }

        {
            let mut topics = self.topics.lock();
            for title in &titles {
                if !topics.iter().any(|t| t.eq_ignore_ascii_case(title)) {
                    topics.push_back(title.clone());
                }
            }
        }
        let tags: Vec<String> = keyword.map(|k| vec![k.to_string()]).unwrap_or_default();
        for title in &titles {
            if let Err(e) = self.orchestrator.stage().store.ensure_topic(title, None, &tags) {
                tracing::debug!(error = %e, "Topic not stored");
            }
        }

        let mut lines = vec!["Topik baru ditambahkan:".to_string()];
        lines.extend(titles.iter().enumerate().map(|(i, t)| format!("{}. {t}", i + 1)));
        lines.join("\n")
    }
}

fn usage_report(rows: &[UsageRow], hours: u32) -> String {
    if rows.is_empty() {
        return format!("Belum ada pemakaian dalam {hours} jam terakhir.");
    }
    let mut lines = vec![format!("Pemakaian {hours} jam terakhir:")];
    let mut total = 0;
    for row in rows {
        total += row.total_tokens;
        lines.push(format!(
            "- {}/{}: prompt {}, completion {}, total {}",
            row.provider, row.model, row.prompt_tokens, row.completion_tokens, row.total_tokens
        ));
    }
    lines.push(format!("Total: {total} token"));
    lines.join("\n")
}
