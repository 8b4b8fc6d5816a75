use serde::{Deserialize, Serialize};

/// Caller intents in classification priority order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Book,
    Pricing,
    Voicemail,
    Support,
}

impl Intent {
    pub const ORDERED: [Intent; 4] = [
        Intent::Book,
        Intent::Pricing,
        Intent::Voicemail,
        Intent::Support,
    ];
}
