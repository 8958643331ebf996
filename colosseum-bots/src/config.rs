//! Process configuration: command line, environment, and the roster file.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::debate::{DailyTime, DebateConfig, Participant};

#[derive(Parser, Debug)]
#[command(name = "colosseum", about = "Round-robin LLM debates in Telegram groups")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub settings: Settings,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Report which credentials and model mappings are present
    CheckConfig,
    /// Create the SQLite schema at DATABASE_PATH and exit
    InitDb,
    /// Start the judge bot and the debate engine
    Run,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Settings {
    /// Roster file (personas, models, topics)
    #[arg(long, env = "COLOSSEUM_CONFIG", default_value = "config/colosseum.toml")]
    pub config: PathBuf,

    /// Seconds between turns
    #[arg(long, env = "DEBATE_CADENCE_SECONDS", default_value_t = 120)]
    pub cadence_seconds: u64,

    /// Token budget per turn
    #[arg(long, env = "BOT_MESSAGE_MAX_TOKENS", default_value_t = 120)]
    pub max_tokens: u32,

    /// History entries shown to each speaker
    #[arg(long, env = "BOT_CONTEXT_TURNS", default_value_t = 4)]
    pub context_turns: usize,

    /// Judge posts every N full rounds (0 disables)
    #[arg(long, env = "JUDGE_SUMMARY_EVERY_TURNS", default_value_t = 2)]
    pub judge_every_turns: u64,

    #[arg(long, env = "JUDGE_SUMMARY_MAX_TOKENS", default_value_t = 120)]
    pub judge_max_tokens: u32,

    /// Local timezone offset for the daily trigger, in minutes east of UTC
    #[arg(long, env = "TZ_OFFSET_MINUTES", default_value_t = 480, allow_hyphen_values = true)]
    pub tz_offset_minutes: i32,

    /// Default daily trigger time (HH:MM, local)
    #[arg(long, env = "DAILY_TIME", default_value = "09:00")]
    pub daily_time: DailyTime,

    /// Participant bot tokens, comma-separated, in roster order
    #[arg(long, env = "TELEGRAM_BOT_TOKENS", hide_env_values = true)]
    pub bot_tokens: Option<String>,

    #[arg(long, env = "TELEGRAM_JUDGE_TOKEN", hide_env_values = true)]
    pub judge_token: Option<String>,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub groq_api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-1.5-flash")]
    pub gemini_model: String,

    /// SQLite debate log. Runs without persistence when unset.
    #[arg(long, env = "DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// Serve /health and /ready on this address
    #[arg(long, env = "HEALTH_ADDR")]
    pub health_addr: Option<SocketAddr>,

    /// Deployment label reported by /health
    #[arg(long, env = "ENV", default_value = "unknown")]
    pub environment: String,
}

impl Settings {
    pub fn debate_config(&self) -> DebateConfig {
        DebateConfig {
            cadence: Duration::from_secs(self.cadence_seconds),
            max_tokens: self.max_tokens,
            context_turns: self.context_turns,
            judge_summary_every_turns: self.judge_every_turns,
            judge_summary_max_tokens: self.judge_max_tokens,
            ..DebateConfig::default()
        }
    }

    pub fn tz_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.tz_offset_minutes * 60)
            .with_context(|| format!("TZ_OFFSET_MINUTES out of range: {}", self.tz_offset_minutes))
    }

    pub fn participant_tokens(&self) -> Vec<String> {
        split_tokens(self.bot_tokens.as_deref().unwrap_or_default())
    }
}

/// Split a comma-separated token list, dropping blanks.
pub fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
pub struct PersonaDef {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub system_prompt: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicDef {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Contents of the roster file.
#[derive(Debug, Default, Deserialize)]
pub struct RosterFile {
    #[serde(default)]
    pub personas: Vec<PersonaDef>,
    /// Persona key to model id.
    #[serde(default)]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub topics: Vec<TopicDef>,
}

impl RosterFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading roster {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing roster {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Complete personas, in file order. Incomplete ones are skipped.
    pub fn participants(&self) -> Vec<Participant> {
        self.personas
            .iter()
            .filter_map(|p| {
                let model = self.models.get(&p.key)?;
                if p.key.is_empty() || p.name.is_empty() || p.system_prompt.trim().is_empty() || model.is_empty() {
                    tracing::debug!(key = %p.key, "Skipping incomplete persona");
                    return None;
                }
                Some(Participant {
                    key: p.key.clone(),
                    name: p.name.clone(),
                    system_prompt: p.system_prompt.clone(),
                    model: model.clone(),
                })
            })
            .collect()
    }

    /// Like [`participants`](Self::participants) but an empty roster is an error.
    pub fn roster(&self) -> Result<Vec<Participant>> {
        let roster = self.participants();
        if roster.is_empty() {
            bail!("no personas configured");
        }
        Ok(roster)
    }

    pub fn topic_titles(&self) -> Vec<String> {
        self.topics
            .iter()
            .map(|t| t.title.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Persona keys without a model mapping.
    pub fn missing_models(&self) -> Vec<&str> {
        self.personas
            .iter()
            .filter(|p| !self.models.contains_key(&p.key))
            .map(|p| p.key.as_str())
            .collect()
    }
}

fn presence<T>(value: &Option<T>) -> &'static str {
    if value.is_some() { "set" } else { "missing" }
}

/// Human-readable configuration report for `check-config`.
pub fn check_report(settings: &Settings, roster: &RosterFile) -> String {
    let mut lines = vec![
        "== Config Check ==".to_string(),
        format!("GROQ_API_KEY: {}", presence(&settings.groq_api_key)),
        format!("GEMINI_API_KEY: {}", presence(&settings.gemini_api_key)),
        format!("TELEGRAM_JUDGE_TOKEN: {}", presence(&settings.judge_token)),
        format!("DATABASE_PATH: {}", presence(&settings.database_path)),
        format!("TELEGRAM_BOT_TOKENS: {} provided", settings.participant_tokens().len()),
    ];
    let missing = roster.missing_models();
    if missing.is_empty() {
        lines.push("Model mapping complete:".to_string());
        for p in &roster.personas {
            if let Some(model) = roster.models.get(&p.key) {
                lines.push(format!("  - {}: {}", p.key, model));
            }
        }
    } else {
        lines.push(format!("Model mapping missing for personas: {}", missing.join(", ")));
    }
    lines.push(format!("Topics: {}", roster.topic_titles().len()));
    lines.join("\n")
}
