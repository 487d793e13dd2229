//! Administrative unavailability windows (bloqueos).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    #[serde(rename = "areaId")]
    pub area_id: i64,
    #[serde(rename = "inicio")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "fin")]
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "motivo")]
    pub reason: Option<String>,
    #[serde(rename = "creadoEn")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewBlock {
    pub area_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockChanges {
    pub area_id: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl Block {
    pub fn apply(&mut self, changes: BlockChanges) {
        if let Some(area_id) = changes.area_id {
            self.area_id = area_id;
        }
        if let Some(starts_at) = changes.starts_at {
            self.starts_at = starts_at;
        }
        if let Some(ends_at) = changes.ends_at {
            self.ends_at = ends_at;
        }
        if let Some(reason) = changes.reason {
            self.reason = Some(reason);
        }
    }
}
