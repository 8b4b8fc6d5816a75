use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use voicedesk::config::AppConfig;
use voicedesk::db;
use voicedesk::handlers;
use voicedesk::services::ai::groq::GroqProvider;
use voicedesk::services::ai::ollama::OllamaProvider;
use voicedesk::services::ai::summarizer::LlmSummarizer;
use voicedesk::services::ai::LlmProvider;
use voicedesk::services::calendar::{CalendarOfRecord, HttpCalendarBridge, NoCalendar};
use voicedesk::services::messaging::twilio::TwilioSmsProvider;
use voicedesk::services::speech::{self, BuiltinVoice, ElevenLabsSynthesizer, SpeechSynthesizer};
use voicedesk::services::tenant::DbUsageGate;
use voicedesk::state::AppState;

const AUDIO_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();

    let db = db::shared(db::init_db(&config.database_url)?);

    let llm: Box<dyn LlmProvider> = match config.llm_provider.as_str() {
        "groq" => {
            anyhow::ensure!(!config.groq_api_key.is_empty(), "GROQ_API_KEY must be set when LLM_PROVIDER=groq");
            tracing::info!("using Groq LLM provider (model: {})", config.groq_model);
            Box::new(GroqProvider::new(config.groq_api_key.clone(), config.groq_model.clone()))
        }
        _ => {
            tracing::info!("using Ollama LLM provider (url: {})", config.ollama_url);
            Box::new(OllamaProvider::new(config.ollama_url.clone(), config.ollama_model.clone()))
        }
    };

    let speech: Box<dyn SpeechSynthesizer> = if config.elevenlabs_api_key.is_empty() {
        tracing::info!("no ElevenLabs key, using the telephony provider's built-in voices");
        Box::new(BuiltinVoice)
    } else {
        Box::new(ElevenLabsSynthesizer::new(
            config.elevenlabs_api_key.clone(),
            config.elevenlabs_voice_en.clone(),
            config.elevenlabs_voice_es.clone(),
        ))
    };

    let calendar: Box<dyn CalendarOfRecord> = if config.calendar_bridge_url.is_empty() {
        Box::new(NoCalendar)
    } else {
        tracing::info!("calendar bridge at {}", config.calendar_bridge_url);
        Box::new(HttpCalendarBridge::new(config.calendar_bridge_url.clone()))
    };

    let messaging = TwilioSmsProvider::new(
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_phone_number.clone(),
    );

    let state = Arc::new(AppState {
        db: db.clone(),
        config: config.clone(),
        summarizer: Box::new(LlmSummarizer::new(llm)),
        messaging: Box::new(messaging),
        calendar,
        speech,
        usage: Box::new(DbUsageGate::new(db.clone())),
    });

    tokio::spawn(speech::sweep_expired_audio(db, AUDIO_SWEEP_INTERVAL));

    let app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/voice/incoming", post(handlers::voice::incoming))
        .route("/voice/turn", post(handlers::voice::turn))
        .route("/voice/transcription", post(handlers::voice::transcription))
        .route("/voice/status", post(handlers::voice::status))
        .route("/audio/:id", get(handlers::voice::audio))
        .route("/api/admin/tenants", put(handlers::admin::upsert_tenant))
        .route("/api/admin/tenants/:id", get(handlers::admin::get_tenant))
        .route(
            "/api/admin/tenants/:id/transfer-check",
            get(handlers::admin::transfer_check),
        )
        .route(
            "/api/admin/tenants/:id/availability",
            get(handlers::admin::availability_preview),
        )
        .route(
            "/api/admin/tenants/:id/appointments",
            get(handlers::admin::list_appointments),
        )
        .route(
            "/api/admin/tenants/:id/appointments/:appointment_id/cancel",
            post(handlers::admin::cancel_appointment),
        )
        .route(
            "/api/admin/tenants/:id/messages",
            get(handlers::admin::list_messages),
        )
        .route(
            "/api/admin/tenants/:id/calls",
            get(handlers::admin::list_calls),
        )
        .route("/api/admin/tenants/:id/usage", put(handlers::admin::set_usage))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
