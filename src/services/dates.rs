//! Spoken date expressions in English and Spanish.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::services::dialogue::intent::fold;

const WEEKDAYS: &[(&str, Weekday)] = &[
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
    ("lunes", Weekday::Mon),
    ("martes", Weekday::Tue),
    ("miercoles", Weekday::Wed),
    ("jueves", Weekday::Thu),
    ("viernes", Weekday::Fri),
    ("sabado", Weekday::Sat),
    ("domingo", Weekday::Sun),
];

const MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("jan", 1),
    ("enero", 1),
    ("february", 2),
    ("feb", 2),
    ("febrero", 2),
    ("march", 3),
    ("mar", 3),
    ("marzo", 3),
    ("april", 4),
    ("apr", 4),
    ("abril", 4),
    ("may", 5),
    ("mayo", 5),
    ("june", 6),
    ("jun", 6),
    ("junio", 6),
    ("july", 7),
    ("jul", 7),
    ("julio", 7),
    ("august", 8),
    ("aug", 8),
    ("agosto", 8),
    ("september", 9),
    ("sept", 9),
    ("sep", 9),
    ("septiembre", 9),
    ("setiembre", 9),
    ("october", 10),
    ("oct", 10),
    ("octubre", 10),
    ("november", 11),
    ("nov", 11),
    ("noviembre", 11),
    ("december", 12),
    ("dec", 12),
    ("diciembre", 12),
];

/// Parses a date relative to `today` (the tenant-local date). Returns `None`
/// when nothing date-like is found.
pub fn parse(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let folded = fold(text);
    let words: Vec<&str> = folded.split_whitespace().collect();
    let has = |w: &str| words.contains(&w);

    if folded.contains("day after tomorrow") || folded.contains("pasado manana") {
        return Some(today + Duration::days(2));
    }
    if has("tomorrow") || has("manana") {
        return Some(today + Duration::days(1));
    }
    if has("today") || has("hoy") {
        return Some(today);
    }

    if let Some(date) = month_and_day(&words, today) {
        return Some(date);
    }
    if let Some(date) = numeric(&words, today) {
        return Some(date);
    }

    // A weekday means its next occurrence after today.
    for &(name, weekday) in WEEKDAYS {
        if has(name) {
            let ahead = (weekday.num_days_from_monday() + 7
                - today.weekday().num_days_from_monday())
                % 7;
            let ahead = if ahead == 0 { 7 } else { ahead };
            return Some(today + Duration::days(ahead as i64));
        }
    }

    lone_day(&words, today)
}

/// Like [`parse`], defaulting to tomorrow.
pub fn resolve(text: &str, today: NaiveDate) -> NaiveDate {
    parse(text, today).unwrap_or(today + Duration::days(1))
}

fn day_number(word: &str) -> Option<u32> {
    let trimmed = word
        .trim_end_matches("st")
        .trim_end_matches("nd")
        .trim_end_matches("rd")
        .trim_end_matches("th");
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok().filter(|d| (1..=31).contains(d))
}

fn month_number(word: &str) -> Option<u32> {
    MONTHS.iter().find(|(name, _)| *name == word).map(|(_, m)| *m)
}

/// `March 5`, `5 of March`, `the 5th of March`, `5 de marzo`.
fn month_and_day(words: &[&str], today: NaiveDate) -> Option<NaiveDate> {
    let month_idx = words.iter().position(|w| month_number(w).is_some())?;
    let month = month_number(words[month_idx])?;

    let after = words.get(month_idx + 1).and_then(|w| day_number(w));
    let before = words[..month_idx]
        .iter()
        .rev()
        .take(3)
        .find_map(|w| day_number(w));
    let day = after.or(before)?;

    upcoming(today, month, day)
}

/// `3/15`.
fn numeric(words: &[&str], today: NaiveDate) -> Option<NaiveDate> {
    words.iter().find_map(|w| {
        let (m, d) = w.split_once('/')?;
        upcoming(today, m.parse().ok()?, d.parse().ok()?)
    })
}

/// `the 15th`: this month, or next month once passed.
fn lone_day(words: &[&str], today: NaiveDate) -> Option<NaiveDate> {
    let day = words.iter().find_map(|w| day_number(w))?;
    let this_month = NaiveDate::from_ymd_opt(today.year(), today.month(), day);
    match this_month {
        Some(date) if date >= today => Some(date),
        _ => {
            let (year, month) = if today.month() == 12 {
                (today.year() + 1, 1)
            } else {
                (today.year(), today.month() + 1)
            };
            NaiveDate::from_ymd_opt(year, month, day)
        }
    }
}

/// The next `month`/`day` on or after today.
fn upcoming(today: NaiveDate, month: u32, day: u32) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day);
    match this_year {
        Some(date) if date >= today => Some(date),
        _ => NaiveDate::from_ymd_opt(today.year() + 1, month, day),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Wednesday
    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 3, 6).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_relative_words() {
        assert_eq!(parse("today please", today()), Some(today()));
        assert_eq!(parse("Tomorrow", today()), Some(ymd(2030, 3, 7)));
        assert_eq!(parse("the day after tomorrow", today()), Some(ymd(2030, 3, 8)));
        assert_eq!(parse("mañana", today()), Some(ymd(2030, 3, 7)));
        assert_eq!(parse("pasado mañana", today()), Some(ymd(2030, 3, 8)));
        assert_eq!(parse("hoy", today()), Some(today()));
    }

    #[test]
    fn test_weekdays_next_occurrence() {
        assert_eq!(parse("on Friday", today()), Some(ymd(2030, 3, 8)));
        assert_eq!(parse("next monday", today()), Some(ymd(2030, 3, 11)));
        assert_eq!(parse("el miércoles", today()), Some(ymd(2030, 3, 13)));
        assert_eq!(parse("sábado", today()), Some(ymd(2030, 3, 9)));
    }

    #[test]
    fn test_month_and_day() {
        assert_eq!(parse("March 15th", today()), Some(ymd(2030, 3, 15)));
        assert_eq!(parse("the 2nd of April", today()), Some(ymd(2030, 4, 2)));
        assert_eq!(parse("el 20 de marzo", today()), Some(ymd(2030, 3, 20)));
        assert_eq!(parse("January 3", today()), Some(ymd(2031, 1, 3)));
    }

    #[test]
    fn test_numeric_and_lone_day() {
        assert_eq!(parse("3/20", today()), Some(ymd(2030, 3, 20)));
        assert_eq!(parse("the 10th", today()), Some(ymd(2030, 3, 10)));
        assert_eq!(parse("the 1st", today()), Some(ymd(2030, 4, 1)));
    }

    #[test]
    fn test_unparseable_defaults_to_tomorrow() {
        assert_eq!(parse("whenever works", today()), None);
        assert_eq!(resolve("whenever works", today()), ymd(2030, 3, 7));
        assert_eq!(resolve("no sé", today()), ymd(2030, 3, 7));
    }
}
