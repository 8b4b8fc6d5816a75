use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;

use crate::db::{self, queries, Db};
use crate::models::{BusinessHours, CalendarSource, Tenant};
use crate::services::calendar::CalendarOfRecord;

pub const PAGE_SIZE: usize = 3;
pub const LOCAL_SOURCE: &str = "local";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Availability {
    pub date: NaiveDate,
    pub slots: Vec<NaiveTime>,
    /// `local`, or the external provider tag the slots came from.
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub offered: Vec<NaiveTime>,
    pub has_more: bool,
}

/// Fixed-length slots across the day's opening window, skipping starts that
/// coincide with `booked` and starts earlier than `not_before`.
pub fn local_slots(
    hours: &BusinessHours,
    date: NaiveDate,
    duration_minutes: u32,
    booked: &[NaiveTime],
    not_before: Option<NaiveTime>,
) -> Vec<NaiveTime> {
    let Some((open, close)) = hours.window(date.weekday()) else {
        return Vec::new();
    };
    if duration_minutes == 0 {
        return Vec::new();
    }

    let step = Duration::minutes(duration_minutes as i64);
    let close = date.and_time(close);
    let mut start = date.and_time(open);
    let mut slots = Vec::new();

    while start + step <= close {
        let time = start.time();
        let is_past = not_before.is_some_and(|nb| time < nb);
        if !is_past && !booked.contains(&time) {
            slots.push(time);
        }
        start += step;
    }
    slots
}

/// Up to `size` slots starting at `offset`.
pub fn paginate(slots: &[NaiveTime], offset: usize, size: usize) -> Page {
    let start = offset.min(slots.len());
    let end = start.saturating_add(size).min(slots.len());
    Page {
        offered: slots[start..end].to_vec(),
        has_more: end < slots.len(),
    }
}

/// Earliest bookable start on `date` given the tenant-local `now`.
fn not_before(date: NaiveDate, now: NaiveDateTime) -> Option<NaiveTime> {
    (date == now.date()).then(|| now.time())
}

pub fn resolve_local(
    conn: &rusqlite::Connection,
    tenant: &Tenant,
    date: NaiveDate,
    now: NaiveDateTime,
) -> anyhow::Result<Vec<NaiveTime>> {
    if date < now.date() {
        return Ok(Vec::new());
    }
    let booked = queries::active_times_on(conn, tenant.id, date)?;
    Ok(local_slots(
        &tenant.hours,
        date,
        tenant.appointment_duration,
        &booked,
        not_before(date, now),
    ))
}

/// Open slots for `date`. Tenants with an external calendar are asked first,
/// bounded by `timeout`; failures fall back to local computation. External
/// answers are still filtered against local active appointments.
pub async fn resolve(
    db: &Db,
    calendar: &dyn CalendarOfRecord,
    tenant: &Tenant,
    date: NaiveDate,
    now: NaiveDateTime,
    timeout: std::time::Duration,
) -> anyhow::Result<Availability> {
    if let CalendarSource::External(provider) = &tenant.calendar_source {
        match tokio::time::timeout(timeout, calendar.available_slots(tenant, date)).await {
            Ok(Ok(mut slots)) => {
                let booked = {
                    let conn = db::lock(db)?;
                    queries::active_times_on(&conn, tenant.id, date)?
                };
                let cutoff = not_before(date, now);
                if date < now.date() {
                    slots.clear();
                }
                slots.retain(|t| !booked.contains(t) && cutoff.map_or(true, |nb| *t >= nb));
                slots.sort();
                slots.dedup();
                return Ok(Availability {
                    date,
                    slots,
                    source: provider.clone(),
                });
            }
            Ok(Err(e)) => {
                tracing::warn!(tenant_id = tenant.id, provider = %provider, error = %e, "external availability failed, using local hours");
            }
            Err(_) => {
                tracing::warn!(tenant_id = tenant.id, provider = %provider, "external availability timed out, using local hours");
            }
        }
    }

    let conn = db::lock(db)?;
    let slots = resolve_local(&conn, tenant, date, now)?;
    Ok(Availability {
        date,
        slots,
        source: LOCAL_SOURCE.to_string(),
    })
}
