//! Reservable common areas.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Area {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
    #[serde(rename = "capacidad")]
    pub capacity: i32,
    #[serde(rename = "costoHora")]
    pub hourly_rate: Decimal,
    #[serde(rename = "activa")]
    pub active: bool,
    #[serde(rename = "creadoEn")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "actualizadoEn")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewArea {
    pub name: String,
    pub description: Option<String>,
    pub capacity: i32,
    pub hourly_rate: Decimal,
    pub active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AreaChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capacity: Option<i32>,
    pub hourly_rate: Option<Decimal>,
    pub active: Option<bool>,
}

impl Area {
    pub fn apply(&mut self, changes: AreaChanges) {
        if let Some(name) = changes.name {
            self.name = name;
        }
        if let Some(description) = changes.description {
            self.description = Some(description);
        }
        if let Some(capacity) = changes.capacity {
            self.capacity = capacity;
        }
        if let Some(rate) = changes.hourly_rate {
            self.hourly_rate = rate;
        }
        if let Some(active) = changes.active {
            self.active = active;
        }
        self.updated_at = Utc::now();
    }
}
