use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::OwnerId;

/// Provider name stored in `ImportedRecord::source`.
pub const GOOGLE_SOURCE: &str = "google";

/// A review persisted from the extraction API. Unique per
/// (`source`, `external_id`).
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportedRecord {
    pub source: String,
    pub external_id: String,
    pub owner_id: OwnerId,
    pub source_url: String,
    pub author_name: String,
    pub rating: f64,
    pub text: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub raw_payload: serde_json::Value,
    pub imported_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportedRecord {
    pub fn key(&self) -> (&str, &str) {
        (&self.source, &self.external_id)
    }
}
