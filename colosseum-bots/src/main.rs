//! colosseum: run Telegram debate bots.
//!
//! Subcommands:
//!
//!   check-config   Report credentials and persona model mapping
//!   init-db        Create the SQLite schema at DATABASE_PATH
//!   run            Poll the judge bot and run debates
//!
//! The judge bot answers `/start_debate`, `/stop_debate`, `/next_topic`,
//! `/summary`, `/enable_daily`, `/disable_daily`, `/status`, `/usage`,
//! `/topics` and `/help`.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use colosseum_sdk::types::{SendMessage, Update};
use colosseum_sdk::{BotClient, PollConfig};
use tracing_subscriber::EnvFilter;

use colosseum_bots::commands::{Commander, Invocation};
use colosseum_bots::config::{Cli, Command, RosterFile, Settings, check_report};
use colosseum_bots::debate::{Judge, Orchestrator, Stage};
use colosseum_bots::delivery::{Delivery, TelegramVoice};
use colosseum_bots::health::{self, Health};
use colosseum_bots::judge::GeminiJudge;
use colosseum_bots::llm::GroqClient;
use colosseum_bots::store::{Persistence, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs in production (COLOSSEUM_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("COLOSSEUM_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("colosseum_bots=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();
    match cli.command {
        Some(Command::CheckConfig) => check_config(&cli.settings),
        Some(Command::InitDb) => std::process::exit(init_db(&cli.settings)),
        Some(Command::Run) => run(cli.settings).await,
        None => {
            <Cli as clap::CommandFactory>::command().print_help()?;
            Ok(())
        }
    }
}

fn check_config(settings: &Settings) -> Result<()> {
    let roster = RosterFile::load(&settings.config)?;
    println!("{}", check_report(settings, &roster));
    Ok(())
}

fn init_db(settings: &Settings) -> i32 {
    let Some(path) = &settings.database_path else {
        eprintln!("DATABASE_PATH is missing in environment.");
        return 1;
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        eprintln!("Migration failed: {e}");
        return 2;
    }
    match SqliteStore::open(path) {
        Ok(_) => {
            println!("Database schema ready at {}", path.display());
            0
        }
        Err(e) => {
            eprintln!("Migration failed: {e}");
            2
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    let roster_file = RosterFile::load(&settings.config)?;
    let roster = roster_file.roster()?;
    let turn_order: Vec<String> = roster.iter().map(|p| p.key.clone()).collect();

    let tokens = settings.participant_tokens();
    if tokens.len() < roster.len() {
        bail!("TELEGRAM_BOT_TOKENS requires {} tokens, got {}", roster.len(), tokens.len());
    }
    let judge_token = settings.judge_token.clone().context("TELEGRAM_JUDGE_TOKEN is not set")?;
    let groq_key = settings.groq_api_key.clone().context("GROQ_API_KEY is not set")?;

    let health = Health::new(settings.environment.clone());
    if let Some(addr) = settings.health_addr {
        health::serve(addr, health.clone()).await?;
    }

    let store = match &settings.database_path {
        Some(path) => Persistence::new(Arc::new(SqliteStore::open(path)?)),
        None => {
            tracing::info!("DATABASE_PATH not set, running without persistence");
            Persistence::disabled()
        }
    };
    for topic in &roster_file.topics {
        if let Err(e) = store.ensure_topic(&topic.title, topic.description.as_deref(), &topic.tags) {
            tracing::debug!(error = %e, "Topic not stored");
        }
    }

    let judge_bot = BotClient::new(judge_token);
    let me = judge_bot.get_me().await.context("TELEGRAM_JUDGE_TOKEN rejected")?;
    let host: Arc<dyn Delivery> = Arc::new(TelegramVoice::new(judge_bot.clone()));

    let mut stage = Stage::new(Arc::new(GroqClient::new(groq_key)), settings.debate_config()).with_store(store);
    for (participant, token) in roster.into_iter().zip(tokens) {
        let voice: Arc<dyn Delivery> = Arc::new(TelegramVoice::new(BotClient::new(token)));
        stage = stage.with_participant(participant, Some(voice));
    }
    match &settings.gemini_api_key {
        Some(key) => {
            let summarizer = GeminiJudge::new(key.clone()).with_model(&settings.gemini_model);
            stage = stage.with_judge(Judge { summarizer: Arc::new(summarizer), voice: host.clone() });
        }
        None => tracing::warn!("GEMINI_API_KEY not set, judge disabled"),
    }

    let orchestrator = Orchestrator::new(stage);
    let commander = Arc::new(Commander::new(
        orchestrator.clone(),
        host,
        turn_order,
        roster_file.topic_titles(),
        settings.daily_time,
        settings.tz_offset()?,
    ));

    let (poller, mut updates) = colosseum_sdk::client::updates(judge_bot.clone(), PollConfig::default());
    health.set_running(true);
    tracing::info!(bot = ?me.username, "Judge bot polling started. Use /start_debate in your supergroup.");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(update) => dispatch(&commander, &judge_bot, update),
                None => {
                    tracing::warn!("Update stream closed, exiting");
                    break;
                }
            },
            _ = &mut shutdown => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    health.set_running(false);
    poller.stop();
    orchestrator.shutdown().await;
    Ok(())
}

/// Handle one update in its own task and reply to the triggering message.
fn dispatch(commander: &Arc<Commander>, bot: &BotClient, update: Update) {
    let Some(msg) = update.message else {
        return;
    };
    let Some(inv) = Invocation::from_message(&msg) else {
        return;
    };
    let commander = commander.clone();
    let bot = bot.clone();
    tokio::spawn(async move {
        let replies = match commander.handle(&inv).await {
            Ok(replies) => replies,
            Err(e) => {
                tracing::error!(error = %e, "Command failed");
                vec![format!("Gagal: {e}")]
            }
        };
        for text in replies {
            let reply = SendMessage::new(msg.chat.id, text)
                .in_thread(msg.message_thread_id)
                .reply_to(msg.message_id);
            if let Err(e) = bot.send_message(&reply).await {
                tracing::warn!(error = %e, "Reply failed");
            }
        }
    });
}
