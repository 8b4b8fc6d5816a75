use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::tenant::Tenant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Es,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "en" | "en-us" | "english" => Some(Language::En),
            "es" | "es-mx" | "es-us" | "spanish" | "español" | "espanol" => Some(Language::Es),
            _ => None,
        }
    }

    /// Locale tag for speech recognition and synthesis.
    pub fn locale(&self) -> &'static str {
        match self {
            Language::En => "en-US",
            Language::Es => "es-MX",
        }
    }

    /// Voice used when the telephony provider speaks text itself.
    pub fn builtin_voice(&self) -> &'static str {
        match self {
            Language::En => "Polly.Joanna",
            Language::Es => "Polly.Lupe",
        }
    }

    /// Whether the telephony provider can transcribe recordings in this language.
    pub fn supports_transcription(&self) -> bool {
        matches!(self, Language::En)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Success,
    Failure,
    Hangup,
}

/// The step that is waiting for the caller's next input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    LanguageSelect,
    Greeting,
    IvrMenu,
    IntentClassify,
    CollectName,
    CollectPhone,
    CollectDate,
    OfferSlots,
    SelectSlot,
    ConfirmBooking,
    Voicemail,
    TransferToDepartment,
    TransferToSpecialist,
    Terminal(Terminal),
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::LanguageSelect => "language_select",
            Step::Greeting => "greeting",
            Step::IvrMenu => "ivr_menu",
            Step::IntentClassify => "intent_classify",
            Step::CollectName => "collect_name",
            Step::CollectPhone => "collect_phone",
            Step::CollectDate => "collect_date",
            Step::OfferSlots => "offer_slots",
            Step::SelectSlot => "select_slot",
            Step::ConfirmBooking => "confirm_booking",
            Step::Voicemail => "voicemail",
            Step::TransferToDepartment => "transfer_department",
            Step::TransferToSpecialist => "transfer_specialist",
            Step::Terminal(Terminal::Success) => "done_success",
            Step::Terminal(Terminal::Failure) => "done_failure",
            Step::Terminal(Terminal::Hangup) => "done_hangup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let step = match s {
            "language_select" => Step::LanguageSelect,
            "greeting" => Step::Greeting,
            "ivr_menu" => Step::IvrMenu,
            "intent_classify" => Step::IntentClassify,
            "collect_name" => Step::CollectName,
            "collect_phone" => Step::CollectPhone,
            "collect_date" => Step::CollectDate,
            "offer_slots" => Step::OfferSlots,
            "select_slot" => Step::SelectSlot,
            "confirm_booking" => Step::ConfirmBooking,
            "voicemail" => Step::Voicemail,
            "transfer_department" => Step::TransferToDepartment,
            "transfer_specialist" => Step::TransferToSpecialist,
            "done_success" => Step::Terminal(Terminal::Success),
            "done_failure" => Step::Terminal(Terminal::Failure),
            "done_hangup" => Step::Terminal(Terminal::Hangup),
            _ => return None,
        };
        Some(step)
    }
}

/// Everything the machine needs between two turns of one call. It travels in
/// the callback URL, so the server keeps no per-call memory. Slot times are
/// minute resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueContext {
    pub tenant_id: i64,
    pub language: Language,
    pub business_name: String,
    pub caller: String,
    pub call_id: String,
    pub step: Step,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub date: Option<NaiveDate>,
    /// Every open slot for `date`, captured once when the date was chosen.
    pub available: Vec<NaiveTime>,
    pub source: Option<String>,
    pub offered: Vec<NaiveTime>,
    pub offset: usize,
    pub has_more: bool,
    pub retries: u8,
    pub date_attempts: u8,
    pub department: Option<usize>,
    pub selected: Option<NaiveTime>,
}

impl DialogueContext {
    pub fn new(tenant: &Tenant, caller: &str, call_id: &str) -> Self {
        Self {
            tenant_id: tenant.id,
            language: tenant.default_language(),
            business_name: tenant.business_name.clone(),
            caller: caller.to_string(),
            call_id: call_id.to_string(),
            step: Step::Greeting,
            name: None,
            phone: None,
            date: None,
            available: Vec::new(),
            source: None,
            offered: Vec::new(),
            offset: 0,
            has_more: false,
            retries: 0,
            date_attempts: 0,
            department: None,
            selected: None,
        }
    }

    /// Moves to `step`, resetting the retry counter when the step changes.
    pub fn advance(&mut self, step: Step) {
        if self.step != step {
            self.retries = 0;
        }
        self.step = step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_names_round_trip() {
        let steps = [
            Step::LanguageSelect,
            Step::IvrMenu,
            Step::SelectSlot,
            Step::TransferToDepartment,
            Step::Terminal(Terminal::Hangup),
        ];
        for step in steps {
            assert_eq!(Step::parse(step.as_str()), Some(step));
        }
        assert_eq!(Step::parse("bogus"), None);
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("EN"), Some(Language::En));
        assert_eq!(Language::parse("español"), Some(Language::Es));
        assert_eq!(Language::parse("fr"), None);
        assert!(Language::En.supports_transcription());
        assert!(!Language::Es.supports_transcription());
    }
}
