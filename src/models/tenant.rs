use chrono::{NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::dialogue::Language;
use super::hours::BusinessHours;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IvrDepartment {
    pub name: String,
    pub phone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Where appointments of record live. Exactly one source is active per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum CalendarSource {
    Local,
    External(String),
}

impl CalendarSource {
    pub fn as_str(&self) -> &str {
        match self {
            CalendarSource::Local => "local",
            CalendarSource::External(provider) => provider,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "" | "local" | "none" => CalendarSource::Local,
            other => CalendarSource::External(other.to_string()),
        }
    }
}

impl From<String> for CalendarSource {
    fn from(s: String) -> Self {
        CalendarSource::parse(&s)
    }
}

impl From<CalendarSource> for String {
    fn from(source: CalendarSource) -> Self {
        source.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    #[serde(default)]
    pub id: i64,
    pub business_name: String,
    pub did: String,
    #[serde(default)]
    pub hours: BusinessHours,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_duration")]
    pub appointment_duration: u32,
    #[serde(default)]
    pub ivr_enabled: bool,
    #[serde(default)]
    pub ivr_options: Vec<IvrDepartment>,
    #[serde(default)]
    pub owner_phone: Option<String>,
    #[serde(default)]
    pub business_phone: Option<String>,
    #[serde(default = "default_calendar")]
    pub calendar_source: CalendarSource,
    #[serde(default = "default_true")]
    pub agent_enabled: bool,
    #[serde(default = "default_languages")]
    pub languages: Vec<Language>,
    #[serde(default)]
    pub greeting_en: Option<String>,
    #[serde(default)]
    pub greeting_es: Option<String>,
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

/// Accepted appointment lengths, in minutes.
pub const APPOINTMENT_DURATIONS: std::ops::RangeInclusive<u32> = 5..=480;

fn default_duration() -> u32 {
    30
}

fn default_calendar() -> CalendarSource {
    CalendarSource::Local
}

fn default_languages() -> Vec<Language> {
    vec![Language::En]
}

impl Tenant {
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or_else(|_| {
            tracing::warn!(tenant_id = self.id, timezone = %self.timezone, "unknown timezone, using America/New_York");
            chrono_tz::America::New_York
        })
    }

    pub fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.tz()).naive_local()
    }

    pub fn today(&self) -> NaiveDate {
        self.local_now().date()
    }

    pub fn default_language(&self) -> Language {
        self.languages.first().copied().unwrap_or(Language::En)
    }

    pub fn is_multilingual(&self) -> bool {
        self.languages.len() > 1
    }

    /// Enabled departments in menu order; the digit for entry `i` is `i + 2`.
    pub fn enabled_departments(&self) -> Vec<&IvrDepartment> {
        self.ivr_options.iter().filter(|d| d.enabled).collect()
    }

    pub fn uses_ivr(&self) -> bool {
        self.ivr_enabled && !self.enabled_departments().is_empty()
    }

    pub fn custom_greeting(&self, language: Language) -> Option<&str> {
        let greeting = match language {
            Language::En => self.greeting_en.as_deref(),
            Language::Es => self.greeting_es.as_deref(),
        };
        greeting.map(str::trim).filter(|g| !g.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> Tenant {
        serde_json::from_value(serde_json::json!({
            "business_name": "Bright Smiles",
            "did": "15550001111",
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults_from_minimal_json() {
        let t = tenant();
        assert_eq!(t.appointment_duration, 30);
        assert_eq!(t.calendar_source, CalendarSource::Local);
        assert_eq!(t.default_language(), Language::En);
        assert!(t.agent_enabled);
        assert!(!t.is_multilingual());
        assert_eq!(t.tz(), chrono_tz::America::New_York);
    }

    #[test]
    fn test_enabled_departments_skip_disabled() {
        let mut t = tenant();
        t.ivr_enabled = true;
        t.ivr_options = vec![
            IvrDepartment { name: "Billing".into(), phone: "15550002222".into(), enabled: false },
            IvrDepartment { name: "Front desk".into(), phone: "15550003333".into(), enabled: true },
        ];
        let enabled = t.enabled_departments();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "Front desk");
        assert!(t.uses_ivr());
    }

    #[test]
    fn test_calendar_source_parse() {
        assert_eq!(CalendarSource::parse("local"), CalendarSource::Local);
        assert_eq!(CalendarSource::parse(""), CalendarSource::Local);
        assert_eq!(
            CalendarSource::parse("HubSpot"),
            CalendarSource::External("hubspot".into())
        );
    }

    #[test]
    fn test_blank_greeting_is_ignored() {
        let mut t = tenant();
        t.greeting_en = Some("   ".into());
        t.greeting_es = Some("Hola, gracias por llamar".into());
        assert_eq!(t.custom_greeting(Language::En), None);
        assert_eq!(t.custom_greeting(Language::Es), Some("Hola, gracias por llamar"));
    }
}
