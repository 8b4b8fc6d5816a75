use async_trait::async_trait;
use serde::Deserialize;

use crate::models::Language;
use crate::services::ai::{LlmProvider, Message};

const SYSTEM_PROMPT: &str = r#"You summarize voicemail transcripts for a small business owner.

Return ONLY valid JSON (no markdown, no explanation) with this exact structure:
{
  "summary": "one or two sentences: who called and what they want",
  "caller_name": "name the caller gave, or null",
  "callback_requested": true
}

Rules:
- Write the summary in the same language as the transcript
- Never invent details that are not in the transcript
- Keep the summary under 200 characters
"#;

/// Generic summary stored until (or instead of) a real one.
pub fn placeholder(language: Language) -> &'static str {
    match language {
        Language::En => "New voicemail (transcript pending)",
        Language::Es => "Nuevo mensaje de voz",
    }
}

#[async_trait]
pub trait VoicemailSummarizer: Send + Sync {
    async fn summarize(&self, transcript: &str, language: Language) -> anyhow::Result<String>;
}

pub struct LlmSummarizer {
    llm: Box<dyn LlmProvider>,
}

impl LlmSummarizer {
    pub fn new(llm: Box<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[derive(Debug, Deserialize)]
struct Digest {
    summary: String,
    caller_name: Option<String>,
    #[serde(default)]
    callback_requested: bool,
}

impl Digest {
    fn render(&self) -> String {
        let mut out = match self.caller_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("{name}: {}", self.summary.trim()),
            _ => self.summary.trim().to_string(),
        };
        if self.callback_requested {
            out.push_str(" [callback requested]");
        }
        out
    }
}

#[async_trait]
impl VoicemailSummarizer for LlmSummarizer {
    async fn summarize(&self, transcript: &str, language: Language) -> anyhow::Result<String> {
        let transcript = transcript.trim();
        anyhow::ensure!(!transcript.is_empty(), "empty transcript");

        let messages = [Message {
            role: "user".to_string(),
            content: format!("Language: {}\nTranscript:\n{transcript}", language.as_str()),
        }];
        let response = self.llm.chat(SYSTEM_PROMPT, &messages).await?;
        parse_summary(&response)
    }
}

fn parse_summary(response: &str) -> anyhow::Result<String> {
    let trimmed = response.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    let json = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    };
    if let Ok(digest) = serde_json::from_str::<Digest>(json) {
        if !digest.summary.trim().is_empty() {
            return Ok(digest.render());
        }
    }

    // Plain prose is still a usable summary.
    if !cleaned.is_empty() && !cleaned.starts_with('{') {
        tracing::warn!("summary response was not JSON, storing it verbatim");
        return Ok(cleaned.chars().take(300).collect());
    }
    anyhow::bail!("unusable summary response: {response}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_json() {
        let json = r#"{"summary":"Wants to move Tuesday's cleaning.","caller_name":"Maria","callback_requested":true}"#;
        assert_eq!(
            parse_summary(json).unwrap(),
            "Maria: Wants to move Tuesday's cleaning. [callback requested]"
        );
    }

    #[test]
    fn test_parse_markdown_fenced_json() {
        let json = "```json\n{\"summary\":\"Asks about prices.\",\"caller_name\":null}\n```";
        assert_eq!(parse_summary(json).unwrap(), "Asks about prices.");
    }

    #[test]
    fn test_parse_prose_and_garbage() {
        assert_eq!(parse_summary("Caller asks for hours.").unwrap(), "Caller asks for hours.");
        assert!(parse_summary("{\"nope\": 1}").is_err());
        assert!(parse_summary("   ").is_err());
    }
}
