use std::collections::BTreeMap;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayHours {
    pub open: String,
    pub close: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Opening hours for a tenant, either as a per-weekday table or in the
/// legacy compact form (one window applied to a range of days).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusinessHours {
    Weekly { days: BTreeMap<String, DayHours> },
    Compact {
        start: NaiveTime,
        end: NaiveTime,
        days: Vec<Weekday>,
    },
}

impl Default for BusinessHours {
    fn default() -> Self {
        BusinessHours::Compact {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
            days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
        }
    }
}

impl BusinessHours {
    /// Parses the weekly table, e.g.
    /// `{"monday":{"open":"09:00","close":"17:00","enabled":true}}`.
    pub fn weekly_from_json(s: &str) -> anyhow::Result<Self> {
        let days: BTreeMap<String, DayHours> = serde_json::from_str(s)?;
        for (day, hours) in &days {
            parse_weekday(day)?;
            parse_time(&hours.open)?;
            parse_time(&hours.close)?;
        }
        Ok(BusinessHours::Weekly { days })
    }

    pub fn compact(start: &str, end: &str, days: &str) -> anyhow::Result<Self> {
        Ok(BusinessHours::Compact {
            start: parse_time(start)?,
            end: parse_time(end)?,
            days: parse_day_range(days)?,
        })
    }

    /// Rejects hours that would never yield the window the owner meant:
    /// unknown day names, unparseable times, or opening at or after closing.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            BusinessHours::Weekly { days } => {
                for (day, hours) in days {
                    parse_weekday(day)?;
                    let open = parse_time(&hours.open)?;
                    let close = parse_time(&hours.close)?;
                    if hours.enabled && open >= close {
                        anyhow::bail!("{day} opens at or after it closes");
                    }
                }
            }
            BusinessHours::Compact { start, end, days } => {
                if start >= end {
                    anyhow::bail!("opening time must be before closing time");
                }
                if days.is_empty() {
                    anyhow::bail!("no business days");
                }
            }
        }
        Ok(())
    }

    /// The open/close window for a weekday, or `None` when closed.
    pub fn window(&self, weekday: Weekday) -> Option<(NaiveTime, NaiveTime)> {
        match self {
            BusinessHours::Weekly { days } => days
                .iter()
                .find(|(day, _)| parse_weekday(day).ok() == Some(weekday))
                .filter(|(_, hours)| hours.enabled)
                .and_then(|(_, hours)| {
                    let open = parse_time(&hours.open).ok()?;
                    let close = parse_time(&hours.close).ok()?;
                    (open < close).then_some((open, close))
                }),
            BusinessHours::Compact { start, end, days } => {
                (days.contains(&weekday) && start < end).then_some((*start, *end))
            }
        }
    }
}

pub fn parse_weekday(s: &str) -> anyhow::Result<Weekday> {
    let lower = s.trim().to_lowercase();
    let day = match lower.as_str() {
        "mon" | "monday" | "1" => Weekday::Mon,
        "tue" | "tues" | "tuesday" | "2" => Weekday::Tue,
        "wed" | "wednesday" | "3" => Weekday::Wed,
        "thu" | "thur" | "thurs" | "thursday" | "4" => Weekday::Thu,
        "fri" | "friday" | "5" => Weekday::Fri,
        "sat" | "saturday" | "6" => Weekday::Sat,
        "sun" | "sunday" | "0" | "7" => Weekday::Sun,
        _ => return Err(anyhow::anyhow!("invalid weekday: {s}")),
    };
    Ok(day)
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time(s: &str) -> anyhow::Result<NaiveTime> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 2 && parts.len() != 3 {
        return Err(anyhow::anyhow!("invalid time format: {s}"));
    }
    let hour: u32 = parts[0]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour in: {s}"))?;
    let minute: u32 = parts[1]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute in: {s}"))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| anyhow::anyhow!("time out of range: {s}"))
}

/// Parses day-range strings such as `mon-fri`, `Mon,Wed,Fri`,
/// `monday-saturday` or `fri-mon` (wrapping past Sunday).
pub fn parse_day_range(s: &str) -> anyhow::Result<Vec<Weekday>> {
    let mut days = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((from, to)) => {
                let from = parse_weekday(from)?;
                let to = parse_weekday(to)?;
                let mut day = from;
                loop {
                    if !days.contains(&day) {
                        days.push(day);
                    }
                    if day == to {
                        break;
                    }
                    day = day.succ();
                }
            }
            None => {
                let day = parse_weekday(part)?;
                if !days.contains(&day) {
                    days.push(day);
                }
            }
        }
    }
    if days.is_empty() {
        return Err(anyhow::anyhow!("empty day range: {s}"));
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    #[test]
    fn test_parse_weekly_json() {
        let json = r#"{"monday":{"open":"09:00","close":"17:00"},"saturday":{"open":"10:00","close":"14:00","enabled":true},"sunday":{"open":"00:00","close":"00:00","enabled":false}}"#;
        let hours = BusinessHours::weekly_from_json(json).unwrap();
        assert_eq!(hours.window(Weekday::Mon), Some((t("09:00"), t("17:00"))));
        assert_eq!(hours.window(Weekday::Sat), Some((t("10:00"), t("14:00"))));
        assert_eq!(hours.window(Weekday::Sun), None);
        assert_eq!(hours.window(Weekday::Tue), None);
    }

    #[test]
    fn test_parse_weekly_rejects_bad_day() {
        let json = r#"{"funday":{"open":"09:00","close":"17:00"}}"#;
        assert!(BusinessHours::weekly_from_json(json).is_err());
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(t("09:30"), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(t("17:00:00"), NaiveTime::from_hms_opt(17, 0, 0).unwrap());
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("nine").is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_hours() {
        let mut days = BTreeMap::new();
        days.insert(
            "monday".to_string(),
            DayHours { open: "9am".into(), close: "17:00".into(), enabled: true },
        );
        assert!(BusinessHours::Weekly { days: days.clone() }.validate().is_err());

        days.insert(
            "monday".to_string(),
            DayHours { open: "17:00".into(), close: "09:00".into(), enabled: true },
        );
        assert!(BusinessHours::Weekly { days: days.clone() }.validate().is_err());

        days.insert(
            "monday".to_string(),
            DayHours { open: "00:00".into(), close: "00:00".into(), enabled: false },
        );
        assert!(BusinessHours::Weekly { days }.validate().is_ok());
        assert!(BusinessHours::default().validate().is_ok());
        assert!(BusinessHours::Compact { start: t("17:00"), end: t("09:00"), days: vec![Weekday::Mon] }
            .validate()
            .is_err());
    }

    #[test]
    fn test_compact_range() {
        let hours = BusinessHours::compact("09:00", "17:00", "mon-fri").unwrap();
        assert!(hours.window(Weekday::Wed).is_some());
        assert!(hours.window(Weekday::Sat).is_none());
    }

    #[test]
    fn test_day_range_list_and_wrap() {
        assert_eq!(
            parse_day_range("Mon,Wed,Fri").unwrap(),
            vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]
        );
        assert_eq!(
            parse_day_range("fri-mon").unwrap(),
            vec![Weekday::Fri, Weekday::Sat, Weekday::Sun, Weekday::Mon]
        );
        assert!(parse_day_range("").is_err());
    }

    #[test]
    fn test_default_is_weekdays_nine_to_five() {
        let hours = BusinessHours::default();
        assert_eq!(hours.window(Weekday::Fri), Some((t("09:00"), t("17:00"))));
        assert_eq!(hours.window(Weekday::Sun), None);
    }
}
