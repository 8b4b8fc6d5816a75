//! Speech synthesis. Synthesized audio is stored with a TTL and served from
//! `/audio/:id`; anything that cannot be synthesized in time is spoken by
//! the telephony provider's built-in voice instead.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::db::{self, queries, Db};
use crate::models::{AudioClip, Language};
use crate::services::voice::{Speech, VoiceResponse};

pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: Language) -> anyhow::Result<SynthesizedAudio>;

    /// False when synthesis is not configured and should not be attempted.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Always defers to the built-in voice.
pub struct BuiltinVoice;

#[async_trait]
impl SpeechSynthesizer for BuiltinVoice {
    async fn synthesize(&self, _text: &str, _language: Language) -> anyhow::Result<SynthesizedAudio> {
        anyhow::bail!("speech synthesis not configured")
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

pub struct ElevenLabsSynthesizer {
    api_key: String,
    voice_en: String,
    voice_es: String,
    client: reqwest::Client,
}

impl ElevenLabsSynthesizer {
    pub fn new(api_key: String, voice_en: String, voice_es: String) -> Self {
        Self {
            api_key,
            voice_en,
            voice_es,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str, language: Language) -> anyhow::Result<SynthesizedAudio> {
        let voice = match language {
            Language::En => &self.voice_en,
            Language::Es => &self.voice_es,
        };

        let resp = self
            .client
            .post(format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}"))
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&json!({
                "text": text,
                "model_id": "eleven_multilingual_v2",
            }))
            .send()
            .await
            .context("failed to call ElevenLabs API")?
            .error_for_status()
            .context("ElevenLabs API returned error")?;

        let bytes = resp
            .bytes()
            .await
            .context("failed to read ElevenLabs audio")?;

        Ok(SynthesizedAudio {
            bytes: bytes.to_vec(),
            content_type: "audio/mpeg".to_string(),
        })
    }
}

/// Replaces each `Say` in the document with a `Play` of synthesized audio.
/// The whole pass is bounded by `timeout`; on timeout or any failure the
/// affected speech stays as `Say`.
pub async fn voice_over(
    synth: &dyn SpeechSynthesizer,
    db: &Db,
    base_url: &str,
    ttl: Duration,
    timeout: Duration,
    resp: &mut VoiceResponse,
) {
    if !synth.is_enabled() {
        return;
    }

    let lines: Vec<(String, Language)> = resp
        .speech_mut()
        .into_iter()
        .filter_map(|speech| match speech {
            Speech::Say { text, language } => Some((text.clone(), *language)),
            Speech::Play { .. } => None,
        })
        .collect();

    let synthesized = tokio::time::timeout(timeout, async {
        let mut urls = Vec::with_capacity(lines.len());
        for (text, language) in &lines {
            urls.push(synthesize_clip(synth, db, base_url, ttl, text, *language).await);
        }
        urls
    })
    .await;

    let Ok(urls) = synthesized else {
        tracing::warn!(lines = lines.len(), "speech synthesis timed out, using built-in voice");
        return;
    };

    let mut urls = urls.into_iter();
    for speech in resp.speech_mut() {
        if let Speech::Say { .. } = speech {
            if let Some(Some(url)) = urls.next() {
                *speech = Speech::Play { url };
            }
        }
    }
}

async fn synthesize_clip(
    synth: &dyn SpeechSynthesizer,
    db: &Db,
    base_url: &str,
    ttl: Duration,
    text: &str,
    language: Language,
) -> Option<String> {
    let audio = match synth.synthesize(text, language).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(error = %e, "speech synthesis failed");
            return None;
        }
    };

    let clip = AudioClip {
        id: uuid::Uuid::new_v4().simple().to_string(),
        content_type: audio.content_type,
        bytes: audio.bytes,
    };
    let expires_at = Utc::now().naive_utc() + chrono::Duration::seconds(ttl.as_secs() as i64);

    let stored = db::lock(db).and_then(|conn| queries::insert_audio_clip(&conn, &clip, expires_at));
    match stored {
        Ok(()) => Some(format!("{base_url}/audio/{}", clip.id)),
        Err(e) => {
            tracing::error!(error = %e, "failed to store audio clip");
            None
        }
    }
}

/// Deletes expired clips every `every`, forever.
pub async fn sweep_expired_audio(db: Db, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let result = db::lock(&db)
            .and_then(|conn| queries::delete_expired_audio(&conn, Utc::now().naive_utc()));
        match result {
            Ok(0) => {}
            Ok(n) => tracing::debug!(deleted = n, "swept expired audio clips"),
            Err(e) => tracing::error!(error = %e, "audio sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSynth {
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl SpeechSynthesizer for FakeSynth {
        async fn synthesize(&self, text: &str, _: Language) -> anyhow::Result<SynthesizedAudio> {
            if self.fail_on == Some(text) {
                anyhow::bail!("voice unavailable");
            }
            Ok(SynthesizedAudio {
                bytes: text.as_bytes().to_vec(),
                content_type: "audio/mpeg".into(),
            })
        }
    }

    struct SlowSynth;

    #[async_trait]
    impl SpeechSynthesizer for SlowSynth {
        async fn synthesize(&self, _: &str, _: Language) -> anyhow::Result<SynthesizedAudio> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            anyhow::bail!("too slow")
        }
    }

    fn doc() -> VoiceResponse {
        VoiceResponse::new()
            .say("hello", Language::En)
            .say("hola", Language::Es)
            .hangup()
    }

    #[tokio::test]
    async fn test_voice_over_replaces_say_and_keeps_failures() {
        let db = db::shared(db::init_db(":memory:").unwrap());
        let mut resp = doc();
        let synth = FakeSynth { fail_on: Some("hola") };
        voice_over(
            &synth,
            &db,
            "https://x.test",
            Duration::from_secs(60),
            Duration::from_secs(2),
            &mut resp,
        )
        .await;

        let xml = resp.render();
        assert!(xml.contains("<Play>https://x.test/audio/"));
        assert!(xml.contains(r#"<Say voice="Polly.Lupe" language="es-MX">hola</Say>"#));

        let count: i64 = db::lock(&db)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM audio_clips", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_voice_over_timeout_keeps_say() {
        let db = db::shared(db::init_db(":memory:").unwrap());
        let mut resp = doc();
        voice_over(
            &SlowSynth,
            &db,
            "https://x.test",
            Duration::from_secs(60),
            Duration::from_millis(20),
            &mut resp,
        )
        .await;
        assert_eq!(resp, doc());
    }

    #[tokio::test]
    async fn test_builtin_voice_skips_synthesis() {
        let db = db::shared(db::init_db(":memory:").unwrap());
        let mut resp = doc();
        voice_over(
            &BuiltinVoice,
            &db,
            "https://x.test",
            Duration::from_secs(60),
            Duration::from_secs(1),
            &mut resp,
        )
        .await;
        assert_eq!(resp, doc());
    }
}
