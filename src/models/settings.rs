use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// A named block of site configuration (e.g. `general`, `social_links`).
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct SiteSetting {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}
