use serde::{Deserialize, Serialize};

/// A voicemail left by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: i64,
    pub tenant_id: i64,
    pub call_id: String,
    pub from_number: String,
    pub recording_url: Option<String>,
    pub recording_sid: Option<String>,
    pub summary: String,
    pub language: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct AudioClip {
    pub id: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}
