//! Detects transfer targets that would ring straight back into this service.

use serde::Serialize;

use crate::models::{IvrDepartment, Tenant};
use crate::services::phone;

/// Suffix matches shorter than this are treated as different numbers.
const MIN_SUFFIX_DIGITS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopRisk {
    /// Dialing the target reaches the tenant's own inbound number.
    MatchesDid,
    /// The target is the business line that forwards to the inbound number.
    MatchesForwarding,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentCheck {
    pub name: String,
    pub phone: String,
    pub enabled: bool,
    pub risk: Option<LoopRisk>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub departments: Vec<DepartmentCheck>,
    /// Owner phone, when it is itself safe to dial.
    pub fallback: Option<String>,
    pub has_risk: bool,
}

/// Digit-only comparison. Equal digit strings match; otherwise the shorter
/// must be a suffix of the longer and at least seven digits long.
pub fn same_number(a: &str, b: &str) -> bool {
    let a = phone::digits(a);
    let b = phone::digits(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() < b.len() { (&a, &b) } else { (&b, &a) };
    short.len() >= MIN_SUFFIX_DIGITS && long.ends_with(short.as_str())
}

pub fn loop_risk(number: &str, did: &str, business_phone: Option<&str>) -> Option<LoopRisk> {
    if same_number(number, did) {
        return Some(LoopRisk::MatchesDid);
    }
    if business_phone.is_some_and(|bp| same_number(number, bp)) {
        return Some(LoopRisk::MatchesForwarding);
    }
    None
}

pub fn analyze(
    departments: &[IvrDepartment],
    did: &str,
    business_phone: Option<&str>,
    owner_phone: Option<&str>,
) -> TransferReport {
    let departments: Vec<DepartmentCheck> = departments
        .iter()
        .map(|d| DepartmentCheck {
            name: d.name.clone(),
            phone: d.phone.clone(),
            enabled: d.enabled,
            risk: loop_risk(&d.phone, did, business_phone),
        })
        .collect();
    let has_risk = departments.iter().any(|d| d.risk.is_some());

    TransferReport {
        departments,
        fallback: safe_owner(did, business_phone, owner_phone),
        has_risk,
    }
}

pub fn analyze_tenant(tenant: &Tenant) -> TransferReport {
    analyze(
        &tenant.ivr_options,
        &tenant.did,
        tenant.business_phone.as_deref(),
        tenant.owner_phone.as_deref(),
    )
}

fn safe_owner(did: &str, business_phone: Option<&str>, owner_phone: Option<&str>) -> Option<String> {
    owner_phone
        .filter(|owner| !phone::digits(owner).is_empty())
        .filter(|owner| loop_risk(owner, did, business_phone).is_none())
        .map(str::to_string)
}

/// The number to actually dial for `number`: itself when safe, else the
/// owner phone when that is safe, else nothing (send the caller to voicemail).
pub fn safe_destination(number: &str, tenant: &Tenant) -> Option<String> {
    let business_phone = tenant.business_phone.as_deref();
    match loop_risk(number, &tenant.did, business_phone) {
        None if !phone::digits(number).is_empty() => Some(number.to_string()),
        None => safe_owner(&tenant.did, business_phone, tenant.owner_phone.as_deref()),
        Some(risk) => {
            tracing::warn!(tenant_id = tenant.id, ?risk, "transfer target would loop back");
            safe_owner(&tenant.did, business_phone, tenant.owner_phone.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dept(name: &str, phone: &str) -> IvrDepartment {
        IvrDepartment {
            name: name.into(),
            phone: phone.into(),
            enabled: true,
        }
    }

    #[test]
    fn test_same_number() {
        assert!(same_number("15551234567", "+1 (555) 123-4567"));
        assert!(same_number("5551234567", "15551234567"));
        assert!(same_number("1234567", "15551234567"));
        assert!(!same_number("234567", "15551234567"));
        assert!(!same_number("", ""));
        assert!(!same_number("15559990000", "15551234567"));
    }

    #[test]
    fn test_analyze_flags_did_and_forwarding() {
        let departments = vec![
            dept("Exact", "15551234567"),
            dept("Leading one", "5551234567"),
            dept("Front desk", "15557654321"),
            dept("Unrelated", "15550009999"),
        ];
        let report = analyze(
            &departments,
            "15551234567",
            Some("+1 555 765 4321"),
            Some("15558887777"),
        );

        let risks: Vec<_> = report.departments.iter().map(|d| d.risk).collect();
        assert_eq!(
            risks,
            vec![
                Some(LoopRisk::MatchesDid),
                Some(LoopRisk::MatchesDid),
                Some(LoopRisk::MatchesForwarding),
                None,
            ]
        );
        assert!(report.has_risk);
        assert_eq!(report.fallback.as_deref(), Some("15558887777"));
    }

    #[test]
    fn test_risky_owner_is_not_a_fallback() {
        let report = analyze(&[], "15551234567", None, Some("5551234567"));
        assert!(!report.has_risk);
        assert_eq!(report.fallback, None);
    }

    #[test]
    fn test_safe_destination() {
        let tenant: Tenant = serde_json::from_value(serde_json::json!({
            "business_name": "Acme",
            "did": "15551234567",
            "business_phone": "15557654321",
            "owner_phone": "15558887777",
        }))
        .unwrap();

        assert_eq!(
            safe_destination("15550009999", &tenant).as_deref(),
            Some("15550009999")
        );
        assert_eq!(
            safe_destination("5551234567", &tenant).as_deref(),
            Some("15558887777")
        );

        let no_owner = Tenant { owner_phone: None, ..tenant };
        assert_eq!(safe_destination("15557654321", &no_owner), None);
    }
}
