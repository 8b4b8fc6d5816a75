//! Carries a [`DialogueContext`] between turns as a URL query string.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use url::form_urlencoded;

use crate::db::queries::{DATE_FORMAT, TIME_FORMAT};
use crate::models::{DialogueContext, Language, Step};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ContextError {
    #[error("missing context field: {0}")]
    Missing(&'static str),

    #[error("invalid context field {field}: {value:?}")]
    Invalid { field: &'static str, value: String },
}

/// Serialises the context. Absent optionals and empty lists are omitted;
/// [`decode`] restores exactly the same value.
pub fn encode(ctx: &DialogueContext) -> String {
    let mut q = form_urlencoded::Serializer::new(String::new());
    q.append_pair("t", &ctx.tenant_id.to_string())
        .append_pair("l", ctx.language.as_str())
        .append_pair("b", &ctx.business_name)
        .append_pair("c", &ctx.caller)
        .append_pair("id", &ctx.call_id)
        .append_pair("s", ctx.step.as_str());

    if let Some(name) = &ctx.name {
        q.append_pair("n", name);
    }
    if let Some(phone) = &ctx.phone {
        q.append_pair("p", phone);
    }
    if let Some(date) = ctx.date {
        q.append_pair("d", &date.format(DATE_FORMAT).to_string());
    }
    if !ctx.available.is_empty() {
        q.append_pair("av", &join_times(&ctx.available));
    }
    if let Some(source) = &ctx.source {
        q.append_pair("src", source);
    }
    if !ctx.offered.is_empty() {
        q.append_pair("of", &join_times(&ctx.offered));
    }
    if ctx.offset > 0 {
        q.append_pair("o", &ctx.offset.to_string());
    }
    if ctx.has_more {
        q.append_pair("m", "1");
    }
    if ctx.retries > 0 {
        q.append_pair("r", &ctx.retries.to_string());
    }
    if ctx.date_attempts > 0 {
        q.append_pair("da", &ctx.date_attempts.to_string());
    }
    if let Some(dept) = ctx.department {
        q.append_pair("dp", &dept.to_string());
    }
    if let Some(selected) = ctx.selected {
        q.append_pair("sel", &selected.format(TIME_FORMAT).to_string());
    }
    q.finish()
}

pub fn decode(query: &str) -> Result<DialogueContext, ContextError> {
    let fields: HashMap<String, String> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let get = |key: &'static str| fields.get(key).map(String::as_str);
    let require = |key: &'static str| get(key).ok_or(ContextError::Missing(key));

    let tenant_id = parse_num::<i64>("t", require("t")?)?;
    let language = Language::parse(require("l")?).ok_or_else(|| invalid("l", get("l")))?;
    let step = Step::parse(require("s")?).ok_or_else(|| invalid("s", get("s")))?;

    Ok(DialogueContext {
        tenant_id,
        language,
        business_name: require("b")?.to_string(),
        caller: require("c")?.to_string(),
        call_id: require("id")?.to_string(),
        step,
        name: get("n").map(str::to_string),
        phone: get("p").map(str::to_string),
        date: get("d").map(|d| parse_date("d", d)).transpose()?,
        available: get("av").map(|v| split_times("av", v)).transpose()?.unwrap_or_default(),
        source: get("src").map(str::to_string),
        offered: get("of").map(|v| split_times("of", v)).transpose()?.unwrap_or_default(),
        offset: get("o").map(|v| parse_num("o", v)).transpose()?.unwrap_or(0),
        has_more: get("m") == Some("1"),
        retries: get("r").map(|v| parse_num("r", v)).transpose()?.unwrap_or(0),
        date_attempts: get("da").map(|v| parse_num("da", v)).transpose()?.unwrap_or(0),
        department: get("dp").map(|v| parse_num("dp", v)).transpose()?,
        selected: get("sel").map(|v| parse_time("sel", v)).transpose()?,
    })
}

fn invalid(field: &'static str, value: Option<&str>) -> ContextError {
    ContextError::Invalid {
        field,
        value: value.unwrap_or_default().to_string(),
    }
}

fn parse_num<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ContextError> {
    value.parse().map_err(|_| invalid(field, Some(value)))
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ContextError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| invalid(field, Some(value)))
}

fn parse_time(field: &'static str, value: &str) -> Result<NaiveTime, ContextError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT).map_err(|_| invalid(field, Some(value)))
}

fn join_times(times: &[NaiveTime]) -> String {
    times
        .iter()
        .map(|t| t.format(TIME_FORMAT).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn split_times(field: &'static str, value: &str) -> Result<Vec<NaiveTime>, ContextError> {
    value
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| parse_time(field, t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Terminal;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn base() -> DialogueContext {
        DialogueContext {
            tenant_id: 7,
            language: Language::Es,
            business_name: "Peluquería & Spa = Bella".into(),
            caller: "15551234567".into(),
            call_id: "CA123".into(),
            step: Step::SelectSlot,
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

    #[test]
    fn test_round_trip_minimal() {
        let ctx = base();
        assert_eq!(decode(&encode(&ctx)).unwrap(), ctx);
    }

    #[test]
    fn test_round_trip_full() {
        let ctx = DialogueContext {
            name: Some("José O'Neil + hijo".into()),
            phone: Some("15559876543".into()),
            date: NaiveDate::from_ymd_opt(2030, 3, 4),
            available: vec![t(9, 0), t(9, 30), t(10, 30), t(11, 0)],
            source: Some("hubspot".into()),
            offered: vec![t(9, 0), t(9, 30), t(10, 30)],
            offset: 3,
            has_more: true,
            retries: 1,
            date_attempts: 2,
            department: Some(1),
            selected: Some(t(9, 30)),
            ..base()
        };
        assert_eq!(decode(&encode(&ctx)).unwrap(), ctx);
    }

    #[test]
    fn test_round_trip_terminal_and_empty_caller() {
        let ctx = DialogueContext {
            caller: String::new(),
            step: Step::Terminal(Terminal::Failure),
            ..base()
        };
        assert_eq!(decode(&encode(&ctx)).unwrap(), ctx);
    }

    #[test]
    fn test_decode_missing_field() {
        assert_eq!(decode("t=1&l=en"), Err(ContextError::Missing("s")));
        assert_eq!(decode(""), Err(ContextError::Missing("t")));
    }

    #[test]
    fn test_decode_invalid_field() {
        let err = decode("t=x&l=en&s=greeting&b=A&c=1&id=CA").unwrap_err();
        assert!(matches!(err, ContextError::Invalid { field: "t", .. }));

        let err = decode("t=1&l=en&s=greeting&b=A&c=1&id=CA&of=9am").unwrap_err();
        assert!(matches!(err, ContextError::Invalid { field: "of", .. }));
    }
}
