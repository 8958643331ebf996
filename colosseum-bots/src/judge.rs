//! The neutral judge: summarizes recent turns and proposes debate topics.
//!
//! [`Summarizer`] is what the debate engine sees. [`GeminiJudge`] implements
//! it with Gemini's `generateContent` endpoint.

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::TokenUsage;

/// Only the most recent texts are sent, however large the window is.
const MAX_SUMMARY_INPUTS: usize = 12;

const SUMMARY_PROMPT: &str = "Anda adalah moderator debat yang ringkas (juri). Bahasa: Indonesia.\n\
Ringkaslah giliran terakhir dalam 3 bullet poin pendek, lalu beri 1 saran untuk giliran berikutnya.\n\
Bersikap netral, sebutkan poin terkuat dan kontra-argumen yang belum dijawab.\n\
Jangan menulis heading seperti 'Ringkasan Juri'. Jawab hanya berupa bullet.\n\n\
Konteks:\n";

#[derive(Debug, Clone)]
pub struct Summary {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response had no candidates")]
    Empty,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    fn provider(&self) -> &str;

    /// Model id used when recording usage.
    fn model(&self) -> &str;

    /// Produce a short neutral synopsis of `texts` (oldest first).
    async fn summarize(&self, texts: &[String], max_tokens: u32) -> Result<Summary, SummarizationError>;

    /// Suggest up to `count` distinct debate topics, optionally around `keyword`.
    async fn generate_topics(
        &self,
        keyword: Option<&str>,
        count: usize,
    ) -> Result<Vec<String>, SummarizationError>;
}

/// Build the summary prompt from the most recent inputs.
pub fn summary_prompt(texts: &[String]) -> String {
    let start = texts.len().saturating_sub(MAX_SUMMARY_INPUTS);
    format!("{SUMMARY_PROMPT}{}", texts[start..].join("\n---\n"))
}

fn topics_prompt(keyword: Option<&str>, count: usize) -> String {
    let focus = match keyword {
        Some(k) if !k.trim().is_empty() => format!(" seputar \"{}\"", k.trim()),
        _ => String::new(),
    };
    format!(
        "Buat {count} judul topik debat{focus} dalam Bahasa Indonesia.\n\
         Setiap judul singkat (maksimal 12 kata), bisa diperdebatkan dari dua sisi, dan berbeda satu sama lain.\n\
         Tulis satu judul per baris tanpa penjelasan."
    )
}

/// Turn a model's list output into clean, distinct titles.
///
/// Strips numbering (`1.`, `2)`), bullets (`-`, `*`, `•`) and wrapping quotes,
/// drops blanks and case-insensitive duplicates, and keeps at most `count`.
pub fn clean_topic_lines(raw: &str, count: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut topics = Vec::new();
    for line in raw.lines() {
        let mut t = line.trim();
        t = t.trim_start_matches(|c: char| c.is_ascii_digit());
        t = t.trim_start_matches(['.', ')', '-', '*', '•', ':']);
        t = t.trim();
        t = t.trim_matches(|c| c == '"' || c == '\'' || c == '*').trim();
        if t.is_empty() {
            continue;
        }
        if seen.insert(t.to_lowercase()) {
            topics.push(t.to_string());
        }
        if topics.len() == count {
            break;
        }
    }
    topics
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: Option<u64>,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(m: UsageMetadata) -> Self {
        TokenUsage {
            prompt_tokens: m.prompt_token_count,
            completion_tokens: m.candidates_token_count,
            total_tokens: m.total_token_count,
        }
    }
}

/// Gemini-backed judge.
pub struct GeminiJudge {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiJudge {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Summary, SummarizationError> {
        let body = serde_json::json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": temperature,
            },
        });

        let resp = self
            .http
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SummarizationError::Status { status: status.as_u16(), body });
        }

        let parsed: GenerateResponse = resp.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .filter(|t| !t.trim().is_empty())
            .ok_or(SummarizationError::Empty)?;

        Ok(Summary {
            text: text.trim().to_string(),
            usage: parsed.usage_metadata.map(TokenUsage::from),
        })
    }
}

#[async_trait]
impl Summarizer for GeminiJudge {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn summarize(&self, texts: &[String], max_tokens: u32) -> Result<Summary, SummarizationError> {
        self.generate(&summary_prompt(texts), max_tokens, 0.4).await
    }

    async fn generate_topics(
        &self,
        keyword: Option<&str>,
        count: usize,
    ) -> Result<Vec<String>, SummarizationError> {
        let summary = self.generate(&topics_prompt(keyword, count), 400, 0.9).await?;
        Ok(clean_topic_lines(&summary.text, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_keeps_last_twelve_texts() {
        let texts: Vec<String> = (0..20).map(|i| format!("giliran {i}")).collect();
        let prompt = summary_prompt(&texts);
        assert!(!prompt.contains("giliran 7\n"));
        assert!(prompt.contains("giliran 8\n---\n"));
        assert!(prompt.ends_with("giliran 19"));
    }

    #[test]
    fn cleans_numbering_bullets_and_duplicates() {
        let raw = "1. Pajak karbon untuk UMKM\n\
                   2) \"Sekolah empat hari\"\n\
                   - pajak karbon untuk umkm\n\
                   \n\
                   • **Mobil listrik wajib 2035**\n\
                   * Kerja jarak jauh permanen";
        let topics = clean_topic_lines(raw, 3);
        assert_eq!(
            topics,
            vec![
                "Pajak karbon untuk UMKM".to_string(),
                "Sekolah empat hari".to_string(),
                "Mobil listrik wajib 2035".to_string(),
            ]
        );
    }

    #[test]
    fn topics_prompt_mentions_keyword() {
        assert!(topics_prompt(Some(" energi "), 5).contains("seputar \"energi\""));
        assert!(!topics_prompt(None, 5).contains("seputar"));
    }

    #[test]
    fn parses_gemini_response_and_usage() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "- a"}, {"text": "\n- b"}], "role": "model"}}],
            "usageMetadata": {"promptTokenCount": 50, "candidatesTokenCount": 20, "totalTokenCount": 70}
        }))
        .unwrap();
        let usage: TokenUsage = resp.usage_metadata.unwrap().into();
        assert_eq!(usage.total(), 70);
        assert_eq!(resp.candidates.len(), 1);
    }
}
