use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admin_token: String,
    /// Externally reachable base URL used for callback and audio links.
    pub public_base_url: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_phone_number: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_voice_en: String,
    pub elevenlabs_voice_es: String,
    pub llm_provider: String,
    pub groq_api_key: String,
    pub groq_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub calendar_bridge_url: String,
    pub calendar_timeout: Duration,
    pub tts_timeout: Duration,
    pub audio_ttl: Duration,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn millis_or(key: &str, default: u64) -> Duration {
    Duration::from_millis(
        env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: var_or("DATABASE_URL", "voicedesk.db"),
            admin_token: var_or("ADMIN_TOKEN", "changeme"),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            twilio_phone_number: env::var("TWILIO_PHONE_NUMBER").unwrap_or_default(),
            elevenlabs_api_key: env::var("ELEVENLABS_API_KEY").unwrap_or_default(),
            elevenlabs_voice_en: var_or("ELEVENLABS_VOICE_EN", "21m00Tcm4TlvDq8ikWAM"),
            elevenlabs_voice_es: var_or("ELEVENLABS_VOICE_ES", "EXAVITQu4vr4xnSDxMaL"),
            llm_provider: var_or("LLM_PROVIDER", "ollama"),
            groq_api_key: env::var("GROQ_API_KEY").unwrap_or_default(),
            groq_model: var_or("GROQ_MODEL", "llama-3.1-8b-instant"),
            ollama_url: var_or("OLLAMA_URL", "http://localhost:11434"),
            ollama_model: var_or("OLLAMA_MODEL", "llama3.1"),
            calendar_bridge_url: env::var("CALENDAR_BRIDGE_URL").unwrap_or_default(),
            calendar_timeout: millis_or("CALENDAR_TIMEOUT_MS", 4000),
            tts_timeout: millis_or("TTS_TIMEOUT_MS", 3000),
            audio_ttl: Duration::from_secs(
                env::var("AUDIO_TTL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(900),
            ),
        }
    }

    /// Settings for tests and local tooling: no collaborators configured.
    pub fn local() -> Self {
        Self {
            port: 3000,
            database_url: ":memory:".to_string(),
            admin_token: "test-token".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            twilio_phone_number: String::new(),
            elevenlabs_api_key: String::new(),
            elevenlabs_voice_en: String::new(),
            elevenlabs_voice_es: String::new(),
            llm_provider: "ollama".to_string(),
            groq_api_key: String::new(),
            groq_model: String::new(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.1".to_string(),
            calendar_bridge_url: String::new(),
            calendar_timeout: Duration::from_millis(500),
            tts_timeout: Duration::from_millis(500),
            audio_ttl: Duration::from_secs(900),
        }
    }
}
