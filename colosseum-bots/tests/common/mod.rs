//! In-memory stand-ins for the providers and Telegram.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use colosseum_bots::debate::{DebateConfig, Judge, Participant, Stage};
use colosseum_bots::delivery::{Delivery, DeliveryError, Receipt, Target};
use colosseum_bots::judge::{SummarizationError, Summarizer, Summary};
use colosseum_bots::llm::{Generation, GenerationError, GenerationRequest, Generator, TokenUsage};

#[derive(Default)]
pub struct FakeGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
    pub fail: AtomicBool,
    /// Provider latency, so cancellation can land mid-call.
    pub delay: Mutex<Option<Duration>>,
}

#[async_trait]
impl Generator for FakeGenerator {
    fn provider(&self) -> &str {
        "fake"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let n = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len()
        };
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenerationError::Status { status: 503, body: "overloaded".to_string() });
        }
        Ok(Generation {
            text: format!("- argumen {n} dari {}", request.model),
            usage: Some(TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: None }),
        })
    }
}

#[derive(Default)]
pub struct FakeSummarizer {
    pub calls: Mutex<Vec<Vec<String>>>,
    pub topics: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    fn provider(&self) -> &str {
        "fake-judge"
    }

    fn model(&self) -> &str {
        "judge-1"
    }

    async fn summarize(&self, texts: &[String], _max_tokens: u32) -> Result<Summary, SummarizationError> {
        self.calls.lock().push(texts.to_vec());
        if self.fail.load(Ordering::SeqCst) {
            return Err(SummarizationError::Empty);
        }
        Ok(Summary {
            text: format!("- {} giliran dirangkum", texts.len()),
            usage: Some(TokenUsage { prompt_tokens: 30, completion_tokens: 10, total_tokens: Some(40) }),
        })
    }

    async fn generate_topics(&self, _keyword: Option<&str>, count: usize) -> Result<Vec<String>, SummarizationError> {
        Ok(self.topics.lock().iter().take(count).cloned().collect())
    }
}

/// A sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub from: String,
    pub target: Target,
    pub text: String,
    pub silent: bool,
}

/// Messages from every fake identity, in send order.
pub type Transcript = Arc<Mutex<Vec<Sent>>>;

pub struct FakeDelivery {
    pub name: String,
    pub transcript: Transcript,
    pub admins: Mutex<HashSet<i64>>,
    pub topics_created: Mutex<Vec<(i64, String)>>,
    pub fail_topics: AtomicBool,
    pub fail_send: AtomicBool,
    next_id: AtomicI64,
    next_thread: AtomicI64,
    pub sends: AtomicUsize,
}

impl FakeDelivery {
    pub fn new(name: &str, transcript: Transcript) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            transcript,
            admins: Mutex::new(HashSet::new()),
            topics_created: Mutex::new(Vec::new()),
            fail_topics: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
            next_thread: AtomicI64::new(100),
            sends: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Delivery for FakeDelivery {
    async fn send(&self, target: &Target, text: &str, silent: bool) -> Result<Receipt, DeliveryError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("bot was kicked".to_string()));
        }
        self.transcript.lock().push(Sent {
            from: self.name.clone(),
            target: *target,
            text: text.to_string(),
            silent,
        });
        Ok(Receipt { message_id: self.next_id.fetch_add(1, Ordering::SeqCst) })
    }

    async fn create_sub_channel(&self, conversation_id: i64, name: &str) -> Result<i64, DeliveryError> {
        if self.fail_topics.load(Ordering::SeqCst) {
            return Err(DeliveryError::Rejected("not enough rights to create a topic".to_string()));
        }
        self.topics_created.lock().push((conversation_id, name.to_string()));
        Ok(self.next_thread.fetch_add(1, Ordering::SeqCst))
    }

    async fn is_privileged(&self, _conversation_id: i64, user_id: i64) -> bool {
        self.admins.lock().contains(&user_id)
    }
}

pub fn participant(key: &str) -> Participant {
    Participant {
        key: key.to_string(),
        name: key.to_uppercase(),
        system_prompt: format!("Kamu adalah {key}."),
        model: format!("model-{key}"),
    }
}

pub fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// Everything a test needs to drive and observe an orchestrator.
pub struct Rig {
    pub generator: Arc<FakeGenerator>,
    pub summarizer: Arc<FakeSummarizer>,
    pub judge_voice: Arc<FakeDelivery>,
    pub voices: Vec<Arc<FakeDelivery>>,
    pub transcript: Transcript,
}

impl Rig {
    pub fn new(speakers: &[&str]) -> Self {
        let transcript: Transcript = Arc::new(Mutex::new(Vec::new()));
        Self {
            generator: Arc::new(FakeGenerator::default()),
            summarizer: Arc::new(FakeSummarizer::default()),
            judge_voice: FakeDelivery::new("judge", transcript.clone()),
            voices: speakers.iter().map(|s| FakeDelivery::new(s, transcript.clone())).collect(),
            transcript,
        }
    }

    /// Stage with every speaker voiced, no judge.
    pub fn stage(&self, config: DebateConfig) -> Stage {
        let mut stage = Stage::new(self.generator.clone(), config);
        for voice in &self.voices {
            let speaker = participant(&voice.name);
            let voice: Arc<dyn Delivery> = voice.clone();
            stage = stage.with_participant(speaker, Some(voice));
        }
        stage
    }

    pub fn stage_with_judge(&self, config: DebateConfig) -> Stage {
        self.stage(config).with_judge(Judge {
            summarizer: self.summarizer.clone(),
            voice: self.judge_voice.clone(),
        })
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.transcript.lock().clone()
    }

    pub fn sent_by(&self, from: &str) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.from == from).collect()
    }
}

/// Cadence long enough that the background loop never fires in real-time tests.
pub fn idle_config() -> DebateConfig {
    DebateConfig { cadence: Duration::from_secs(3600), ..DebateConfig::default() }
}
