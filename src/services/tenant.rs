use async_trait::async_trait;
use rusqlite::Connection;

use crate::db::{self, queries, Db};
use crate::models::{CallLog, Tenant};
use crate::services::phone;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageStatus {
    Allowed,
    Exhausted,
}

/// Decides whether a tenant may still take calls.
#[async_trait]
pub trait UsageGate: Send + Sync {
    async fn check(&self, tenant: &Tenant) -> anyhow::Result<UsageStatus>;
}

/// Reads `usage_accounts`. Tenants without an account are unmetered.
pub struct DbUsageGate {
    db: Db,
}

impl DbUsageGate {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UsageGate for DbUsageGate {
    async fn check(&self, tenant: &Tenant) -> anyhow::Result<UsageStatus> {
        let conn = db::lock(&self.db)?;
        let status = match queries::minutes_remaining(&conn, tenant.id)? {
            Some(minutes) if minutes <= 0 => UsageStatus::Exhausted,
            _ => UsageStatus::Allowed,
        };
        Ok(status)
    }
}

/// Call statuses after which the telephony provider sends no more updates.
pub const FINAL_CALL_STATUSES: &[&str] = &["completed", "busy", "failed", "no-answer", "canceled"];

/// Billable minutes: every started minute counts.
pub fn billable_minutes(duration_seconds: i64) -> i64 {
    if duration_seconds <= 0 {
        0
    } else {
        (duration_seconds + 59) / 60
    }
}

/// Logs a finished call and charges its minutes to a metered tenant. A
/// repeated callback for the same call is ignored. Returns the remaining
/// balance for metered tenants.
pub fn meter_call(
    conn: &Connection,
    tenant: &Tenant,
    call_sid: &str,
    from_number: &str,
    status: &str,
    duration_seconds: i64,
) -> anyhow::Result<Option<i64>> {
    let tx = conn.unchecked_transaction()?;
    let minutes = billable_minutes(duration_seconds);
    let call = CallLog {
        call_sid: call_sid.to_string(),
        tenant_id: tenant.id,
        from_number: phone::normalize(from_number).unwrap_or_else(|| from_number.to_string()),
        status: status.to_string(),
        duration_seconds: duration_seconds.max(0),
        minutes_charged: minutes,
        created_at: String::new(),
    };
    if !queries::insert_call_log(&tx, &call)? {
        tracing::debug!(tenant_id = tenant.id, call_sid, "call already metered");
        tx.commit()?;
        return queries::minutes_remaining(conn, tenant.id);
    }
    let remaining = queries::charge_minutes(&tx, tenant.id, minutes)?;
    tx.commit()?;

    tracing::info!(tenant_id = tenant.id, call_sid, minutes, ?remaining, "call metered");
    if remaining == Some(0) {
        tracing::warn!(tenant_id = tenant.id, "usage exhausted");
    }
    Ok(remaining)
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Ready(Tenant),
    /// The tenant switched its agent off; calls go straight to a person.
    AgentDisabled(Tenant),
    Exhausted(Tenant),
    NotFound,
}

/// Looks up the tenant owning the dialed number.
pub fn lookup(conn: &Connection, to_number: &str) -> anyhow::Result<Option<Tenant>> {
    let Some(did) = phone::normalize(to_number) else {
        return Ok(None);
    };
    queries::get_tenant_by_did(conn, &did)
}

/// Resolves the dialed number and applies the usage gate. Gate failures are
/// logged and the call is allowed through.
pub async fn resolve(db: &Db, gate: &dyn UsageGate, to_number: &str) -> anyhow::Result<Resolution> {
    let tenant = {
        let conn = db::lock(db)?;
        lookup(&conn, to_number)?
    };
    let Some(tenant) = tenant else {
        tracing::warn!(to = %to_number, "no tenant for dialed number");
        return Ok(Resolution::NotFound);
    };

    if !tenant.agent_enabled {
        return Ok(Resolution::AgentDisabled(tenant));
    }

    match gate.check(&tenant).await {
        Ok(UsageStatus::Allowed) => Ok(Resolution::Ready(tenant)),
        Ok(UsageStatus::Exhausted) => {
            tracing::info!(tenant_id = tenant.id, "usage exhausted, sending caller to voicemail");
            Ok(Resolution::Exhausted(tenant))
        }
        Err(e) => {
            tracing::error!(tenant_id = tenant.id, error = %e, "usage gate failed, allowing call");
            Ok(Resolution::Ready(tenant))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billable_minutes_round_up() {
        assert_eq!(billable_minutes(0), 0);
        assert_eq!(billable_minutes(1), 1);
        assert_eq!(billable_minutes(60), 1);
        assert_eq!(billable_minutes(61), 2);
        assert_eq!(billable_minutes(-5), 0);
    }

    #[tokio::test]
    async fn test_metering_exhausts_usage_once_per_call() {
        let (db, id) = setup(true);
        let gate = DbUsageGate::new(db.clone());
        let tenant = {
            let conn = db::lock(&db).unwrap();
            queries::set_minutes_remaining(&conn, id, 3).unwrap();
            queries::get_tenant(&conn, id).unwrap().unwrap()
        };

        {
            let conn = db::lock(&db).unwrap();
            let left = meter_call(&conn, &tenant, "CA1", "+15550001111", "completed", 61).unwrap();
            assert_eq!(left, Some(1));
            // the provider retries the same callback
            let left = meter_call(&conn, &tenant, "CA1", "+15550001111", "completed", 61).unwrap();
            assert_eq!(left, Some(1));
        }
        assert!(matches!(
            resolve(&db, &gate, "15551234567").await.unwrap(),
            Resolution::Ready(_)
        ));

        {
            let conn = db::lock(&db).unwrap();
            let left = meter_call(&conn, &tenant, "CA2", "+15550001111", "completed", 300).unwrap();
            assert_eq!(left, Some(0));
            let calls = queries::list_call_logs(&conn, id).unwrap();
            assert_eq!(calls.len(), 2);
            assert_eq!(calls.iter().map(|c| c.minutes_charged).sum::<i64>(), 7);
        }
        assert!(matches!(
            resolve(&db, &gate, "15551234567").await.unwrap(),
            Resolution::Exhausted(_)
        ));
    }

    #[test]
    fn test_unmetered_tenant_is_logged_not_charged() {
        let (db, id) = setup(true);
        let conn = db::lock(&db).unwrap();
        let tenant = queries::get_tenant(&conn, id).unwrap().unwrap();
        assert_eq!(meter_call(&conn, &tenant, "CA9", "anonymous", "no-answer", 0).unwrap(), None);
        let calls = queries::list_call_logs(&conn, id).unwrap();
        assert_eq!(calls[0].from_number, "anonymous");
        assert_eq!(calls[0].minutes_charged, 0);
    }

    struct BrokenGate;

    #[async_trait]
    impl UsageGate for BrokenGate {
        async fn check(&self, _: &Tenant) -> anyhow::Result<UsageStatus> {
            anyhow::bail!("billing service unreachable")
        }
    }

    fn setup(agent_enabled: bool) -> (Db, i64) {
        let conn = db::init_db(":memory:").unwrap();
        let tenant: Tenant = serde_json::from_value(serde_json::json!({
            "business_name": "Acme",
            "did": "15551234567",
            "agent_enabled": agent_enabled,
        }))
        .unwrap();
        let id = queries::upsert_tenant(&conn, &tenant).unwrap();
        (db::shared(conn), id)
    }

    #[tokio::test]
    async fn test_resolve_by_formatted_did() {
        let (db, id) = setup(true);
        let gate = DbUsageGate::new(db.clone());
        match resolve(&db, &gate, "+1 (555) 123-4567").await.unwrap() {
            Resolution::Ready(t) => assert_eq!(t.id, id),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            resolve(&db, &gate, "+15550000000").await.unwrap(),
            Resolution::NotFound
        ));
    }

    #[tokio::test]
    async fn test_usage_gate_exhausted_and_fail_open() {
        let (db, id) = setup(true);
        {
            let conn = db::lock(&db).unwrap();
            queries::set_minutes_remaining(&conn, id, 0).unwrap();
        }
        let gate = DbUsageGate::new(db.clone());
        assert!(matches!(
            resolve(&db, &gate, "15551234567").await.unwrap(),
            Resolution::Exhausted(_)
        ));
        assert!(matches!(
            resolve(&db, &BrokenGate, "15551234567").await.unwrap(),
            Resolution::Ready(_)
        ));
    }

    #[tokio::test]
    async fn test_agent_disabled() {
        let (db, _) = setup(false);
        let gate = DbUsageGate::new(db.clone());
        assert!(matches!(
            resolve(&db, &gate, "15551234567").await.unwrap(),
            Resolution::AgentDisabled(_)
        ));
    }
}
