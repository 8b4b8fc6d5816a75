//! Calendar-of-record integration for tenants whose appointments live in an
//! external system (CRM or booking platform). Provider wire formats sit
//! behind an HTTP bridge; this service only speaks the bridge's JSON.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;

use crate::db::queries::{DATE_FORMAT, TIME_FORMAT};
use crate::models::hours::parse_time;
use crate::models::{Appointment, Tenant};

#[async_trait]
pub trait CalendarOfRecord: Send + Sync {
    /// Open slot start times on `date`, per the external provider.
    async fn available_slots(&self, tenant: &Tenant, date: NaiveDate)
        -> anyhow::Result<Vec<NaiveTime>>;

    async fn record_appointment(&self, tenant: &Tenant, appt: &Appointment) -> anyhow::Result<()>;
}

/// Used when no bridge is configured; every call fails so callers fall back
/// to local scheduling.
pub struct NoCalendar;

#[async_trait]
impl CalendarOfRecord for NoCalendar {
    async fn available_slots(&self, tenant: &Tenant, _date: NaiveDate) -> anyhow::Result<Vec<NaiveTime>> {
        anyhow::bail!(
            "no calendar bridge configured for provider {}",
            tenant.calendar_source.as_str()
        )
    }

    async fn record_appointment(&self, tenant: &Tenant, _appt: &Appointment) -> anyhow::Result<()> {
        anyhow::bail!(
            "no calendar bridge configured for provider {}",
            tenant.calendar_source.as_str()
        )
    }
}

pub struct HttpCalendarBridge {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCalendarBridge {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SlotsResponse {
    slots: Vec<String>,
}

#[async_trait]
impl CalendarOfRecord for HttpCalendarBridge {
    async fn available_slots(&self, tenant: &Tenant, date: NaiveDate) -> anyhow::Result<Vec<NaiveTime>> {
        let resp = self
            .client
            .get(format!("{}/tenants/{}/availability", self.base_url, tenant.id))
            .query(&[
                ("provider", tenant.calendar_source.as_str().to_string()),
                ("date", date.format(DATE_FORMAT).to_string()),
                ("duration", tenant.appointment_duration.to_string()),
                ("timezone", tenant.timezone.clone()),
            ])
            .send()
            .await
            .context("failed to call calendar bridge")?
            .error_for_status()
            .context("calendar bridge returned error")?;

        let body: SlotsResponse = resp
            .json()
            .await
            .context("failed to parse calendar bridge availability")?;

        body.slots.iter().map(|s| parse_time(s)).collect()
    }

    async fn record_appointment(&self, tenant: &Tenant, appt: &Appointment) -> anyhow::Result<()> {
        let body = json!({
            "provider": tenant.calendar_source.as_str(),
            "appointment_id": appt.id,
            "customer_name": appt.customer_name,
            "customer_phone": appt.customer_phone,
            "date": appt.date.format(DATE_FORMAT).to_string(),
            "time": appt.time.format(TIME_FORMAT).to_string(),
            "duration_minutes": appt.duration_minutes,
            "timezone": tenant.timezone,
            "confirmation_code": appt.confirmation_code,
        });

        self.client
            .post(format!("{}/tenants/{}/appointments", self.base_url, tenant.id))
            .json(&body)
            .send()
            .await
            .context("failed to call calendar bridge")?
            .error_for_status()
            .context("calendar bridge rejected appointment")?;

        Ok(())
    }
}
