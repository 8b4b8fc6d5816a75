use serde::{Deserialize, Serialize};

/// One finished call, as reported by the telephony status callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    pub call_sid: String,
    pub tenant_id: i64,
    pub from_number: String,
    pub status: String,
    pub duration_seconds: i64,
    pub minutes_charged: i64,
    #[serde(default)]
    pub created_at: String,
}
