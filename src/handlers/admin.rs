use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::{self, queries};
use crate::errors::AppError;
use crate::models::{Appointment, CallLog, InboundMessage, Tenant, APPOINTMENT_DURATIONS};
use crate::services::availability::{self, Availability, Page, PAGE_SIZE};
use crate::services::transfer::{self, TransferReport};
use crate::services::{booking, phone};
use crate::state::AppState;

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token.is_empty() || token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

fn load_tenant(state: &AppState, tenant_id: i64) -> Result<Tenant, AppError> {
    let conn = db::lock(&state.db)?;
    queries::get_tenant(&conn, tenant_id)?
        .ok_or_else(|| AppError::NotFound(format!("tenant {tenant_id}")))
}

// PUT /api/admin/tenants
#[derive(Serialize)]
pub struct TenantSaved {
    id: i64,
    did: String,
    transfer: TransferReport,
}

pub async fn upsert_tenant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut tenant): Json<Tenant>,
) -> Result<Json<TenantSaved>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    if tenant.business_name.trim().is_empty() {
        return Err(AppError::BadRequest("business_name is required".into()));
    }
    tenant.did = phone::normalize(&tenant.did)
        .ok_or_else(|| AppError::BadRequest(format!("invalid did: {}", tenant.did)))?;
    if tenant.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(AppError::BadRequest(format!("unknown timezone: {}", tenant.timezone)));
    }
    tenant
        .hours
        .validate()
        .map_err(|e| AppError::BadRequest(format!("invalid hours: {e}")))?;
    if !APPOINTMENT_DURATIONS.contains(&tenant.appointment_duration) {
        return Err(AppError::BadRequest(format!(
            "appointment_duration must be between {} and {} minutes",
            APPOINTMENT_DURATIONS.start(),
            APPOINTMENT_DURATIONS.end()
        )));
    }
    for department in &mut tenant.ivr_options {
        department.phone = phone::normalize(&department.phone).ok_or_else(|| {
            AppError::BadRequest(format!(
                "invalid phone for {}: {}",
                department.name, department.phone
            ))
        })?;
    }
    for number in [&mut tenant.owner_phone, &mut tenant.business_phone] {
        if let Some(raw) = number.take() {
            *number = Some(
                phone::normalize(&raw)
                    .ok_or_else(|| AppError::BadRequest(format!("invalid phone: {raw}")))?,
            );
        }
    }

    let id = {
        let conn = db::lock(&state.db)?;
        queries::upsert_tenant(&conn, &tenant)?
    };
    tenant.id = id;

    let report = transfer::analyze_tenant(&tenant);
    if report.has_risk {
        tracing::warn!(tenant_id = id, "tenant saved with transfer loop risk");
    }
    tracing::info!(tenant_id = id, did = %tenant.did, "tenant saved");

    Ok(Json(TenantSaved {
        id,
        did: tenant.did,
        transfer: report,
    }))
}

// GET /api/admin/tenants/:id
pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
) -> Result<Json<Tenant>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(load_tenant(&state, tenant_id)?))
}

// GET /api/admin/tenants/:id/transfer-check
pub async fn transfer_check(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
) -> Result<Json<TransferReport>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let tenant = load_tenant(&state, tenant_id)?;
    Ok(Json(transfer::analyze_tenant(&tenant)))
}

// GET /api/admin/tenants/:id/availability?date=YYYY-MM-DD
#[derive(Deserialize)]
pub struct AvailabilityQuery {
    date: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct AvailabilityPreview {
    #[serde(flatten)]
    availability: Availability,
    first_page: Page,
}

pub async fn availability_preview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityPreview>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let tenant = load_tenant(&state, tenant_id)?;
    let now = tenant.local_now();
    let date = query.date.unwrap_or_else(|| now.date());

    let availability = availability::resolve(
        &state.db,
        state.calendar.as_ref(),
        &tenant,
        date,
        now,
        state.config.calendar_timeout,
    )
    .await?;
    let first_page = availability::paginate(&availability.slots, 0, PAGE_SIZE);

    Ok(Json(AvailabilityPreview {
        availability,
        first_page,
    }))
}

// GET /api/admin/tenants/:id/appointments?from=YYYY-MM-DD
#[derive(Deserialize)]
pub struct AppointmentsQuery {
    from: Option<NaiveDate>,
}

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
    Query(query): Query<AppointmentsQuery>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let conn = db::lock(&state.db)?;
    Ok(Json(queries::list_appointments(&conn, tenant_id, query.from)?))
}

// POST /api/admin/tenants/:id/appointments/:appointment_id/cancel
pub async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((tenant_id, appointment_id)): Path<(i64, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let cancelled = {
        let conn = db::lock(&state.db)?;
        booking::cancel(&conn, tenant_id, &appointment_id)?
    };
    if !cancelled {
        return Err(AppError::NotFound(format!("appointment {appointment_id}")));
    }
    tracing::info!(tenant_id, appointment_id = %appointment_id, "appointment cancelled by admin");
    Ok(Json(serde_json::json!({"ok": true})))
}

// GET /api/admin/tenants/:id/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
) -> Result<Json<Vec<InboundMessage>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let conn = db::lock(&state.db)?;
    Ok(Json(queries::list_messages(&conn, tenant_id)?))
}

// GET /api/admin/tenants/:id/calls
pub async fn list_calls(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
) -> Result<Json<Vec<CallLog>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    let conn = db::lock(&state.db)?;
    Ok(Json(queries::list_call_logs(&conn, tenant_id)?))
}

// PUT /api/admin/tenants/:id/usage
#[derive(Deserialize)]
pub struct UsageUpdate {
    minutes_remaining: i64,
}

pub async fn set_usage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(tenant_id): Path<i64>,
    Json(update): Json<UsageUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    load_tenant(&state, tenant_id)?;
    let conn = db::lock(&state.db)?;
    queries::set_minutes_remaining(&conn, tenant_id, update.minutes_remaining)?;
    Ok(Json(serde_json::json!({
        "tenant_id": tenant_id,
        "minutes_remaining": update.minutes_remaining,
    })))
}
