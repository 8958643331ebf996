//! Text generation for debate turns.
//!
//! [`Generator`] is the seam the debate engine calls through. [`GroqClient`]
//! implements it against Groq's OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Groq accepts at most this many stop sequences per request.
const MAX_STOP_SEQUENCES: usize = 4;

/// A chat message in a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Token counters reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Some providers omit the total; callers derive it from the parts.
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.total_tokens
            .unwrap_or(self.prompt_tokens + self.completion_tokens)
    }
}

/// Everything needed for one completion.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response had no choices")]
    Empty,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider label used when recording usage.
    fn provider(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "no_stop")]
    stop: &'a [String],
}

impl<'a> CompletionBody<'a> {
    /// Keeps the leading stop sequences when there are too many.
    fn new(request: &'a GenerationRequest) -> Self {
        let stop_len = request.stop.len().min(MAX_STOP_SEQUENCES);
        Self {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stop: &request.stop[..stop_len],
        }
    }
}

fn no_stop(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Groq chat completions client.
pub struct GroqClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl GroqClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Generator for GroqClient {
    fn provider(&self) -> &str {
        "groq"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let body = CompletionBody::new(request);

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status: status.as_u16(), body });
        }

        let parsed: CompletionResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(GenerationError::Empty)?
            .message
            .content
            .filter(|t| !t.trim().is_empty())
            .ok_or(GenerationError::Empty)?;
        Ok(Generation { text: text.trim().to_string(), usage: parsed.usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_falls_back_to_sum() {
        let usage = TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: None };
        assert_eq!(usage.total(), 15);
        let usage = TokenUsage { total_tokens: Some(40), ..usage };
        assert_eq!(usage.total(), 40);
    }

    #[test]
    fn completion_body_skips_empty_stop() {
        let messages = vec![ChatMessage::system("be brief")];
        let body = CompletionBody {
            model: "llama-3.1-8b-instant",
            messages: &messages,
            temperature: 0.6,
            max_tokens: 120,
            stop: &[],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("stop").is_none());
        assert_eq!(json["messages"][0]["role"], "system");
    }

    #[test]
    fn completion_body_truncates_stop_from_the_end() {
        let request = GenerationRequest {
            model: "llama-3.1-8b-instant".to_string(),
            messages: vec![ChatMessage::user("halo")],
            temperature: 0.6,
            max_tokens: 120,
            stop: ["Ringkasan Juri", "A:", "B:", "C:", "D:"].map(String::from).to_vec(),
        };
        let json = serde_json::to_value(CompletionBody::new(&request)).unwrap();
        assert_eq!(json["stop"], serde_json::json!(["Ringkasan Juri", "A:", "B:", "C:"]));
    }

    #[test]
    fn parses_openai_style_response() {
        let resp: CompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": " - poin satu "}}],
            "usage": {"prompt_tokens": 31, "completion_tokens": 12, "total_tokens": 43}
        }))
        .unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some(" - poin satu "));
        assert_eq!(resp.usage.unwrap().total(), 43);
    }
}
