//! Daily debate trigger.
//!
//! Once a day at a fixed local time, open a forum topic with the host
//! identity, announce the day's topic there and start a debate in it.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{Orchestrator, prompt};
use crate::delivery::{Delivery, Target};

/// Topic used when the rotation is empty.
pub const DEFAULT_TOPIC: &str = "Debate Harian";

/// Source of "now". Swapped out in tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Local time of day, `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTime(NaiveTime);

#[derive(Debug, thiserror::Error)]
#[error("invalid daily time '{0}', expected HH:MM")]
pub struct InvalidDailyTime(pub String);

impl DailyTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }
}

impl Default for DailyTime {
    fn default() -> Self {
        Self(NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default())
    }
}

impl FromStr for DailyTime {
    type Err = InvalidDailyTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| InvalidDailyTime(s.to_string()))
    }
}

impl std::fmt::Display for DailyTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

/// Whole seconds from `now` until the next `time` in the `offset` zone.
///
/// A target equal to now counts as passed. Fractions round up so the
/// trigger never fires early.
pub fn seconds_until(time: DailyTime, now: DateTime<Utc>, offset: FixedOffset) -> u64 {
    let now_local = now.with_timezone(&offset).naive_local();
    let mut target = now_local.date().and_time(time.0);
    if target <= now_local {
        target += chrono::Duration::days(1);
    }
    let delta = target - now_local;
    let whole = delta.num_seconds().max(0) as u64;
    if delta.subsec_nanos() > 0 { whole + 1 } else { whole }
}

/// Round-robin over the configured topics.
#[derive(Debug, Clone, Default)]
pub struct Rotation {
    topics: Vec<String>,
    index: usize,
}

impl Rotation {
    pub fn new(topics: Vec<String>) -> Self {
        Self { topics, index: 0 }
    }

    pub fn next_title(&mut self) -> String {
        if self.topics.is_empty() {
            return DEFAULT_TOPIC.to_string();
        }
        let title = self.topics[self.index % self.topics.len()].clone();
        self.index += 1;
        title
    }
}

/// One daily loop for one conversation.
pub struct DailyTrigger {
    orchestrator: Orchestrator,
    host: Arc<dyn Delivery>,
    offset: FixedOffset,
    clock: Clock,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DailyTrigger {
    pub fn new(orchestrator: Orchestrator, host: Arc<dyn Delivery>, offset: FixedOffset) -> Self {
        Self {
            orchestrator,
            host,
            offset,
            clock: Arc::new(Utc::now),
            task: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// (Re)start the loop. A previous loop is aborted and the rotation restarts.
    pub fn start(&self, conversation_id: i64, time: DailyTime, topics: Vec<String>, turn_order: Vec<String>) {
        let mut task = self.task.lock();
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let orchestrator = self.orchestrator.clone();
        let host = self.host.clone();
        let clock = self.clock.clone();
        let offset = self.offset;
        let mut rotation = Rotation::new(topics);
        tracing::info!(conversation_id, %time, "Daily trigger armed");

        *task = Some(tokio::spawn(async move {
            loop {
                let wait = seconds_until(time, clock(), offset);
                tracing::debug!(conversation_id, wait, "Daily trigger sleeping");
                tokio::time::sleep(Duration::from_secs(wait)).await;

                let title = rotation.next_title();
                let sub_channel_id = match host.create_sub_channel(conversation_id, &title).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!(conversation_id, error = %e, "Forum topic not created, using main chat");
                        None
                    }
                };
                let target = Target::new(conversation_id, sub_channel_id);
                if let Err(e) = host.send(&target, &prompt::daily_announcement(&title), false).await {
                    tracing::warn!(conversation_id, error = %e, "Daily announcement failed");
                }
                if let Err(e) = orchestrator
                    .start(conversation_id, sub_channel_id, &title, turn_order.clone())
                    .await
                {
                    tracing::warn!(conversation_id, error = %e, "Daily debate not started");
                }
            }
        }));
    }

    /// Stop the loop. True if one was running.
    pub fn cancel(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                let running = !task.is_finished();
                task.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Seconds until `time` by this trigger's clock and zone.
    pub fn seconds_until_next(&self, time: DailyTime) -> u64 {
        seconds_until(time, (self.clock)(), self.offset)
    }
}

impl Drop for DailyTrigger {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
