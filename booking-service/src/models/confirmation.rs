use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Pending,
    Accepted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: i64,
    #[serde(rename = "reservaId")]
    pub reservation_id: i64,
    #[serde(rename = "codigoQr")]
    pub qr_code: String,
    #[serde(rename = "fecha")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "verificada")]
    pub status: VerificationStatus,
}

#[derive(Debug, Clone)]
pub struct NewConfirmation {
    pub reservation_id: i64,
    pub qr_code: String,
    pub issued_at: DateTime<Utc>,
    pub status: VerificationStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ConfirmationChanges {
    pub qr_code: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub status: Option<VerificationStatus>,
}

impl Confirmation {
    pub fn apply(&mut self, changes: ConfirmationChanges) {
        if let Some(qr_code) = changes.qr_code {
            self.qr_code = qr_code;
        }
        if let Some(issued_at) = changes.issued_at {
            self.issued_at = issued_at;
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
    }
}
