use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::hours::{parse_day_range, parse_time};
use crate::models::{
    Appointment, AppointmentStatus, AudioClip, BusinessHours, CallLog, CalendarSource, InboundMessage,
    Language, Tenant, APPOINTMENT_DURATIONS,
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ── Tenants ──

const TENANT_COLUMNS: &str = "id, business_name, did, business_hours, hours_start, hours_end, business_days, timezone, appointment_duration, ivr_enabled, ivr_options, owner_phone, business_phone, calendar_source, agent_enabled, languages, greeting_en, greeting_es";

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let id: i64 = row.get(0)?;
    let hours_json: Option<String> = row.get(3)?;
    let hours_start: Option<String> = row.get(4)?;
    let hours_end: Option<String> = row.get(5)?;
    let business_days: Option<String> = row.get(6)?;
    let ivr_json: String = row.get(10)?;
    let languages: String = row.get(15)?;

    let hours = resolve_hours(id, hours_json, hours_start, hours_end, business_days);
    let ivr_options = serde_json::from_str(&ivr_json).unwrap_or_else(|e| {
        tracing::warn!(tenant_id = id, error = %e, "invalid ivr_options, ignoring");
        Vec::new()
    });
    let mut languages: Vec<Language> = languages
        .split(',')
        .filter_map(Language::parse)
        .collect();
    languages.dedup();
    if languages.is_empty() {
        languages.push(Language::En);
    }

    Ok(Tenant {
        id,
        business_name: row.get(1)?,
        did: row.get(2)?,
        hours,
        timezone: row.get(7)?,
        appointment_duration: row.get::<_, i64>(8)?.clamp(
            i64::from(*APPOINTMENT_DURATIONS.start()),
            i64::from(*APPOINTMENT_DURATIONS.end()),
        ) as u32,
        ivr_enabled: row.get(9)?,
        ivr_options,
        owner_phone: row.get(11)?,
        business_phone: row.get(12)?,
        calendar_source: CalendarSource::parse(&row.get::<_, String>(13)?),
        agent_enabled: row.get(14)?,
        languages,
        greeting_en: row.get(16)?,
        greeting_es: row.get(17)?,
    })
}

/// Weekly table first, then the compact columns, then the 09:00-17:00
/// Monday-to-Friday default.
fn resolve_hours(
    tenant_id: i64,
    weekly: Option<String>,
    start: Option<String>,
    end: Option<String>,
    days: Option<String>,
) -> BusinessHours {
    if let Some(json) = weekly.filter(|j| !j.trim().is_empty()) {
        match BusinessHours::weekly_from_json(&json) {
            Ok(hours) => return hours,
            Err(e) => tracing::warn!(tenant_id, error = %e, "invalid business_hours table"),
        }
    }
    if let (Some(start), Some(end)) = (start, end) {
        let days = days.unwrap_or_else(|| "mon-fri".to_string());
        match BusinessHours::compact(&start, &end, &days) {
            Ok(hours) => return hours,
            Err(e) => tracing::warn!(tenant_id, error = %e, "invalid compact business hours"),
        }
    }
    BusinessHours::default()
}

pub fn get_tenant_by_did(conn: &Connection, did: &str) -> anyhow::Result<Option<Tenant>> {
    let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE did = ?1");
    let tenant = conn.query_row(&sql, [did], tenant_from_row).optional()?;
    Ok(tenant)
}

pub fn get_tenant(conn: &Connection, id: i64) -> anyhow::Result<Option<Tenant>> {
    let sql = format!("SELECT {TENANT_COLUMNS} FROM tenants WHERE id = ?1");
    let tenant = conn.query_row(&sql, [id], tenant_from_row).optional()?;
    Ok(tenant)
}

/// Inserts or updates the tenant keyed by DID and returns its id.
pub fn upsert_tenant(conn: &Connection, tenant: &Tenant) -> anyhow::Result<i64> {
    let (weekly, start, end, days) = match &tenant.hours {
        BusinessHours::Weekly { days } => (Some(serde_json::to_string(days)?), None, None, None),
        BusinessHours::Compact { start, end, days } => (
            None,
            Some(start.format(TIME_FORMAT).to_string()),
            Some(end.format(TIME_FORMAT).to_string()),
            Some(
                days.iter()
                    .map(|d| d.to_string().to_lowercase())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        ),
    };
    let languages = tenant
        .languages
        .iter()
        .map(|l| l.as_str())
        .collect::<Vec<_>>()
        .join(",");

    conn.execute(
        "INSERT INTO tenants (business_name, did, business_hours, hours_start, hours_end, business_days, timezone, appointment_duration, ivr_enabled, ivr_options, owner_phone, business_phone, calendar_source, agent_enabled, languages, greeting_en, greeting_es)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
         ON CONFLICT(did) DO UPDATE SET
            business_name = excluded.business_name,
            business_hours = excluded.business_hours,
            hours_start = excluded.hours_start,
            hours_end = excluded.hours_end,
            business_days = excluded.business_days,
            timezone = excluded.timezone,
            appointment_duration = excluded.appointment_duration,
            ivr_enabled = excluded.ivr_enabled,
            ivr_options = excluded.ivr_options,
            owner_phone = excluded.owner_phone,
            business_phone = excluded.business_phone,
            calendar_source = excluded.calendar_source,
            agent_enabled = excluded.agent_enabled,
            languages = excluded.languages,
            greeting_en = excluded.greeting_en,
            greeting_es = excluded.greeting_es,
            updated_at = datetime('now')",
        params![
            tenant.business_name,
            tenant.did,
            weekly,
            start,
            end,
            days,
            tenant.timezone,
            tenant.appointment_duration,
            tenant.ivr_enabled,
            serde_json::to_string(&tenant.ivr_options)?,
            tenant.owner_phone,
            tenant.business_phone,
            tenant.calendar_source.as_str(),
            tenant.agent_enabled,
            languages,
            tenant.greeting_en,
            tenant.greeting_es,
        ],
    )?;

    let id = conn.query_row("SELECT id FROM tenants WHERE did = ?1", [&tenant.did], |row| {
        row.get(0)
    })?;
    Ok(id)
}

// ── Appointments ──

const APPOINTMENT_COLUMNS: &str = "id, tenant_id, customer_name, customer_phone, appointment_date, appointment_time, duration_minutes, status, confirmation_code, source, created_at";

fn appointment_from_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    let date_str: String = row.get(4)?;
    let time_str: String = row.get(5)?;
    let status_str: String = row.get(7)?;
    let conversion = |idx: usize, e: anyhow::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    };

    Ok(Appointment {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        customer_name: row.get(2)?,
        customer_phone: row.get(3)?,
        date: NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
            .map_err(|e| conversion(4, e.into()))?,
        time: parse_time(&time_str).map_err(|e| conversion(5, e))?,
        duration_minutes: row.get(6)?,
        status: AppointmentStatus::parse(&status_str),
        confirmation_code: row.get(8)?,
        source: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// Returns the raw driver error so callers can recognise unique-index
/// violations on the active-slot index.
pub fn insert_appointment(conn: &Connection, appt: &Appointment) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO appointments (id, tenant_id, customer_name, customer_phone, appointment_date, appointment_time, duration_minutes, status, confirmation_code, source)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            appt.id,
            appt.tenant_id,
            appt.customer_name,
            appt.customer_phone,
            appt.date.format(DATE_FORMAT).to_string(),
            appt.time.format(TIME_FORMAT).to_string(),
            appt.duration_minutes,
            appt.status.as_str(),
            appt.confirmation_code,
            appt.source,
        ],
    )?;
    Ok(())
}

/// Start times of pending and confirmed appointments on `date`.
pub fn active_times_on(
    conn: &Connection,
    tenant_id: i64,
    date: NaiveDate,
) -> anyhow::Result<Vec<NaiveTime>> {
    let mut stmt = conn.prepare(
        "SELECT appointment_time FROM appointments
         WHERE tenant_id = ?1 AND appointment_date = ?2 AND status IN ('pending', 'confirmed')
         ORDER BY appointment_time",
    )?;
    let rows = stmt.query_map(
        params![tenant_id, date.format(DATE_FORMAT).to_string()],
        |row| row.get::<_, String>(0),
    )?;

    let mut times = Vec::new();
    for row in rows {
        times.push(parse_time(&row?)?);
    }
    Ok(times)
}

pub fn slot_is_taken(
    conn: &Connection,
    tenant_id: i64,
    date: NaiveDate,
    time: NaiveTime,
) -> anyhow::Result<bool> {
    let taken = conn.query_row(
        "SELECT COUNT(*) > 0 FROM appointments
         WHERE tenant_id = ?1 AND appointment_date = ?2 AND appointment_time = ?3
           AND status IN ('pending', 'confirmed')",
        params![
            tenant_id,
            date.format(DATE_FORMAT).to_string(),
            time.format(TIME_FORMAT).to_string()
        ],
        |row| row.get(0),
    )?;
    Ok(taken)
}

pub fn get_appointment(conn: &Connection, id: &str) -> anyhow::Result<Option<Appointment>> {
    let sql = format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1");
    let appt = conn.query_row(&sql, [id], appointment_from_row).optional()?;
    Ok(appt)
}

pub fn list_appointments(
    conn: &Connection,
    tenant_id: i64,
    from: Option<NaiveDate>,
) -> anyhow::Result<Vec<Appointment>> {
    let from = from
        .map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default();
    let sql = format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE tenant_id = ?1 AND appointment_date >= ?2
         ORDER BY appointment_date, appointment_time"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![tenant_id, from], appointment_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Marks an active appointment cancelled. Returns false when no active
/// appointment with that id belongs to the tenant.
pub fn cancel_appointment(conn: &Connection, tenant_id: i64, id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE appointments SET status = 'cancelled', updated_at = datetime('now')
         WHERE id = ?1 AND tenant_id = ?2 AND status IN ('pending', 'confirmed')",
        params![id, tenant_id],
    )?;
    Ok(changed > 0)
}

// ── Messages ──

pub struct NewMessage<'a> {
    pub tenant_id: i64,
    pub call_id: &'a str,
    pub from_number: &'a str,
    pub recording_url: Option<&'a str>,
    pub recording_sid: Option<&'a str>,
    pub summary: &'a str,
    pub language: Language,
}

/// Stores a voicemail. A second write for the same recording only fills in a
/// missing recording URL, so callbacks may arrive in either order.
pub fn insert_message(conn: &Connection, msg: &NewMessage<'_>) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO messages (tenant_id, call_id, from_number, recording_url, recording_sid, summary, language)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(recording_sid) DO UPDATE SET
            recording_url = COALESCE(messages.recording_url, excluded.recording_url)",
        params![
            msg.tenant_id,
            msg.call_id,
            msg.from_number,
            msg.recording_url,
            msg.recording_sid,
            msg.summary,
            msg.language.as_str(),
        ],
    )?;
    Ok(())
}

pub fn update_message_summary(
    conn: &Connection,
    recording_sid: &str,
    summary: &str,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE messages SET summary = ?1 WHERE recording_sid = ?2",
        params![summary, recording_sid],
    )?;
    Ok(changed > 0)
}

pub fn list_messages(conn: &Connection, tenant_id: i64) -> anyhow::Result<Vec<InboundMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, tenant_id, call_id, from_number, recording_url, recording_sid, summary, language, created_at
         FROM messages WHERE tenant_id = ?1 ORDER BY created_at DESC, id DESC",
    )?;
    let rows = stmt.query_map([tenant_id], |row| {
        Ok(InboundMessage {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            call_id: row.get(2)?,
            from_number: row.get(3)?,
            recording_url: row.get(4)?,
            recording_sid: row.get(5)?,
            summary: row.get(6)?,
            language: row.get(7)?,
            created_at: row.get(8)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Usage ──

/// `None` when the tenant has no usage account (unmetered).
pub fn minutes_remaining(conn: &Connection, tenant_id: i64) -> anyhow::Result<Option<i64>> {
    let minutes = conn
        .query_row(
            "SELECT minutes_remaining FROM usage_accounts WHERE tenant_id = ?1",
            [tenant_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(minutes)
}

pub fn set_minutes_remaining(conn: &Connection, tenant_id: i64, minutes: i64) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO usage_accounts (tenant_id, minutes_remaining) VALUES (?1, ?2)
         ON CONFLICT(tenant_id) DO UPDATE SET minutes_remaining = excluded.minutes_remaining, updated_at = datetime('now')",
        params![tenant_id, minutes],
    )?;
    Ok(())
}

/// Subtracts `minutes` from a metered tenant's balance, never below zero.
/// Returns the new balance, or `None` for unmetered tenants.
pub fn charge_minutes(conn: &Connection, tenant_id: i64, minutes: i64) -> anyhow::Result<Option<i64>> {
    conn.execute(
        "UPDATE usage_accounts SET minutes_remaining = MAX(minutes_remaining - ?2, 0), updated_at = datetime('now')
         WHERE tenant_id = ?1",
        params![tenant_id, minutes],
    )?;
    minutes_remaining(conn, tenant_id)
}

// ── Call logs ──

/// Stores a finished call once; returns false when the call was already logged.
pub fn insert_call_log(conn: &Connection, call: &CallLog) -> anyhow::Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO call_logs (call_sid, tenant_id, from_number, status, duration_seconds, minutes_charged)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            call.call_sid,
            call.tenant_id,
            call.from_number,
            call.status,
            call.duration_seconds,
            call.minutes_charged,
        ],
    )?;
    Ok(inserted > 0)
}

pub fn list_call_logs(conn: &Connection, tenant_id: i64) -> anyhow::Result<Vec<CallLog>> {
    let mut stmt = conn.prepare(
        "SELECT call_sid, tenant_id, from_number, status, duration_seconds, minutes_charged, created_at
         FROM call_logs WHERE tenant_id = ?1 ORDER BY created_at DESC, call_sid",
    )?;
    let rows = stmt.query_map([tenant_id], |row| {
        Ok(CallLog {
            call_sid: row.get(0)?,
            tenant_id: row.get(1)?,
            from_number: row.get(2)?,
            status: row.get(3)?,
            duration_seconds: row.get(4)?,
            minutes_charged: row.get(5)?,
            created_at: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

// ── Audio clips ──

pub fn insert_audio_clip(
    conn: &Connection,
    clip: &AudioClip,
    expires_at: NaiveDateTime,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO audio_clips (id, content_type, bytes, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            clip.id,
            clip.content_type,
            clip.bytes,
            expires_at.format(TIMESTAMP_FORMAT).to_string()
        ],
    )?;
    Ok(())
}

pub fn get_audio_clip(
    conn: &Connection,
    id: &str,
    now: NaiveDateTime,
) -> anyhow::Result<Option<AudioClip>> {
    let clip = conn
        .query_row(
            "SELECT id, content_type, bytes FROM audio_clips WHERE id = ?1 AND expires_at > ?2",
            params![id, now.format(TIMESTAMP_FORMAT).to_string()],
            |row| {
                Ok(AudioClip {
                    id: row.get(0)?,
                    content_type: row.get(1)?,
                    bytes: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(clip)
}

pub fn delete_expired_audio(conn: &Connection, now: NaiveDateTime) -> anyhow::Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM audio_clips WHERE expires_at <= ?1",
        [now.format(TIMESTAMP_FORMAT).to_string()],
    )?;
    Ok(deleted)
}
