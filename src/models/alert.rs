use super::{deserialize_id, deserialize_optional_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification the backend sent for a system. Read-only in the console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub system_id: Option<String>,
    #[serde(default)]
    pub system_name: Option<String>,
    #[serde(default)]
    pub trigger_condition: String,
    #[serde(default)]
    pub notification_type: String,
    #[serde(default)]
    pub recipient: String,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn sent_at_display(&self) -> String {
        self.sent_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}
