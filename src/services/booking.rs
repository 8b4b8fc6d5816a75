use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::Rng;
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Appointment, AppointmentStatus, Tenant};
use crate::services::{availability, phone};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;
const MAX_ALTERNATIVES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("invalid booking request: {0}")]
    InvalidRequest(String),

    #[error("requested time is in the past")]
    InPast,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub customer_name: String,
    pub customer_phone: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Channel the booking came from, e.g. `voice` or `admin`.
    pub source: String,
}

#[derive(Debug, Clone)]
pub enum BookingOutcome {
    Booked(Appointment),
    SlotTaken { alternatives: Vec<NaiveTime> },
}

pub fn confirmation_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Books one slot for the tenant. The partial unique index on active
/// appointments is the final arbiter: a concurrent booking that wins the
/// race surfaces here as `SlotTaken`, never as a second row. Alternatives
/// come from the tenant's local hours.
pub fn book(
    conn: &Connection,
    tenant: &Tenant,
    req: &BookingRequest,
    now: NaiveDateTime,
) -> Result<BookingOutcome, SchedulingError> {
    reserve(conn, tenant, req, now, None)
}

/// Like [`book`], for a caller holding availability already resolved for
/// `req.date` (possibly from an external calendar). Alternatives are drawn
/// from `open`, minus anything booked since.
pub fn book_within(
    conn: &Connection,
    tenant: &Tenant,
    req: &BookingRequest,
    now: NaiveDateTime,
    open: &[NaiveTime],
) -> Result<BookingOutcome, SchedulingError> {
    reserve(conn, tenant, req, now, Some(open))
}

fn reserve(
    conn: &Connection,
    tenant: &Tenant,
    req: &BookingRequest,
    now: NaiveDateTime,
    open: Option<&[NaiveTime]>,
) -> Result<BookingOutcome, SchedulingError> {
    let name = req.customer_name.trim();
    if name.is_empty() {
        return Err(SchedulingError::InvalidRequest("customer name is empty".into()));
    }
    let customer_phone = phone::normalize(&req.customer_phone).ok_or_else(|| {
        SchedulingError::InvalidRequest(format!("invalid phone: {}", req.customer_phone))
    })?;
    if req.date.and_time(req.time) < now {
        return Err(SchedulingError::InPast);
    }

    if queries::slot_is_taken(conn, tenant.id, req.date, req.time)? {
        return Ok(slot_taken(conn, tenant, req, now, open)?);
    }

    let appt = Appointment {
        id: uuid::Uuid::new_v4().to_string(),
        tenant_id: tenant.id,
        customer_name: name.to_string(),
        customer_phone,
        date: req.date,
        time: req.time,
        duration_minutes: tenant.appointment_duration,
        status: AppointmentStatus::Confirmed,
        confirmation_code: confirmation_code(),
        source: req.source.clone(),
        created_at: now.format(queries::TIMESTAMP_FORMAT).to_string(),
    };

    match queries::insert_appointment(conn, &appt) {
        Ok(()) => {
            tracing::info!(
                tenant_id = tenant.id,
                appointment_id = %appt.id,
                date = %appt.date,
                time = %appt.time.format(queries::TIME_FORMAT),
                "appointment booked"
            );
            Ok(BookingOutcome::Booked(appt))
        }
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            tracing::info!(tenant_id = tenant.id, date = %req.date, "slot taken by concurrent booking");
            Ok(slot_taken(conn, tenant, req, now, open)?)
        }
        Err(e) => Err(anyhow::Error::from(e).context("failed to insert appointment").into()),
    }
}

fn slot_taken(
    conn: &Connection,
    tenant: &Tenant,
    req: &BookingRequest,
    now: NaiveDateTime,
    open: Option<&[NaiveTime]>,
) -> anyhow::Result<BookingOutcome> {
    let open = match open {
        Some(open) => {
            let booked = queries::active_times_on(conn, tenant.id, req.date)?;
            open.iter()
                .copied()
                .filter(|t| !booked.contains(t) && req.date.and_time(*t) >= now)
                .collect()
        }
        None => availability::resolve_local(conn, tenant, req.date, now)?,
    };
    Ok(BookingOutcome::SlotTaken {
        alternatives: nearest(&open, req.time, MAX_ALTERNATIVES),
    })
}

/// The `n` slots closest to `target`, nearest first; earlier wins ties.
pub fn nearest(slots: &[NaiveTime], target: NaiveTime, n: usize) -> Vec<NaiveTime> {
    let mut ranked: Vec<NaiveTime> = slots.iter().copied().filter(|t| *t != target).collect();
    ranked.sort_by_key(|t| ((*t - target).num_minutes().abs(), *t));
    ranked.truncate(n);
    ranked
}

pub fn cancel(conn: &Connection, tenant_id: i64, appointment_id: &str) -> anyhow::Result<bool> {
    let cancelled = queries::cancel_appointment(conn, tenant_id, appointment_id)?;
    if cancelled {
        tracing::info!(tenant_id, appointment_id, "appointment cancelled");
    }
    Ok(cancelled)
}
