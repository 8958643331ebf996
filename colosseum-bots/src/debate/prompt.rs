//! Prompt assembly and the fixed texts the engine posts.

use std::fmt::Display;

use super::{Participant, Stage, Utterance};
use crate::llm::ChatMessage;

/// Heading the judge posts under. Also used as a stop sequence so speakers
/// never write one themselves.
pub const JUDGE_HEADING: &str = "Ringkasan Juri";

const STYLE: &str = "Gaya: ringkas, 3-5 bullet poin. Jangan terlalu panjang.\n\
Bahasa: Indonesia.\n\
Jangan menulis namamu sendiri atau label pembicara di awal jawaban.\n\
Jangan meniru awalan nama peserta lain (misalnya 'Nama:') dan jangan menulis heading 'Ringkasan Juri'.";

/// System instruction for one speaker.
pub fn system_prompt(speaker: &Participant, topic_title: &str) -> String {
    format!("{}\n{STYLE}\nTopik: {topic_title}\n", speaker.system_prompt)
}

/// Render history as `Name: text` lines.
pub fn context_block(stage: &Stage, recent: &[Utterance]) -> String {
    recent
        .iter()
        .map(|u| format!("{}: {}", stage.display_name(&u.speaker), u.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Messages for the next turn: system, recent context, and the last judge summary.
pub fn turn_messages(
    stage: &Stage,
    speaker: &Participant,
    topic_title: &str,
    history: &[Utterance],
    judge_summary: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt(speaker, topic_title))];
    let start = history.len().saturating_sub(stage.config.context_turns);
    let recent = &history[start..];
    if !recent.is_empty() {
        messages.push(ChatMessage::user(context_block(stage, recent)));
    }
    if let Some(summary) = judge_summary {
        messages.push(ChatMessage::user(format!("{JUDGE_HEADING}: {summary}")));
    }
    messages
}

/// Keep the model from speaking for anyone else. The judge heading comes
/// first so it survives provider limits on the number of stop sequences.
pub fn stop_sequences(stage: &Stage) -> Vec<String> {
    std::iter::once(JUDGE_HEADING.to_string())
        .chain(stage.roster().iter().map(|p| format!("{}:", p.name)))
        .collect()
}

pub fn generation_failed(error: impl Display) -> String {
    format!("(gagal generate: {error})")
}

pub fn summary_failed(error: impl Display) -> String {
    format!("(Ringkasan juri gagal: {error})")
}

/// The judge's post as delivered.
pub fn judge_post(summary: &str) -> String {
    format!("[{JUDGE_HEADING}]\n{summary}")
}

pub fn daily_announcement(topic_title: &str) -> String {
    format!("Topik hari ini: {topic_title}")
}
