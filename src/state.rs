use crate::config::AppConfig;
use crate::db::Db;
use crate::services::ai::summarizer::VoicemailSummarizer;
use crate::services::calendar::CalendarOfRecord;
use crate::services::messaging::MessagingProvider;
use crate::services::speech::SpeechSynthesizer;
use crate::services::tenant::UsageGate;

pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub summarizer: Box<dyn VoicemailSummarizer>,
    pub messaging: Box<dyn MessagingProvider>,
    pub calendar: Box<dyn CalendarOfRecord>,
    pub speech: Box<dyn SpeechSynthesizer>,
    pub usage: Box<dyn UsageGate>,
}
