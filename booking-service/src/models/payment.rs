//! Payments recorded against reservations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Payment lifecycle. A payment moves PENDING -> ACCEPTED once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Accepted,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    #[serde(rename = "reservaId")]
    pub reservation_id: i64,
    #[serde(rename = "metodo")]
    pub method: String,
    #[serde(rename = "monto")]
    pub amount: Decimal,
    #[serde(rename = "estado")]
    pub status: PaymentStatus,
    #[serde(rename = "fechaPago")]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(rename = "transaccionId")]
    pub transaction_id: Option<String>,
    #[serde(rename = "referencia")]
    pub reference: Option<String>,
    #[serde(rename = "codigoQr")]
    pub qr_code: Option<String>,
    #[serde(rename = "urlQr")]
    pub qr_url: Option<String>,
    #[serde(rename = "usuarioId")]
    pub user_id: Option<String>,
    #[serde(rename = "usuarioNombre")]
    pub user_name: Option<String>,
    #[serde(rename = "creadoEn")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reservation_id: i64,
    pub method: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub qr_code: Option<String>,
    pub qr_url: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
}

impl NewPayment {
    pub fn pending(reservation_id: i64, method: impl Into<String>, amount: Decimal) -> Self {
        Self {
            reservation_id,
            method: method.into(),
            amount,
            status: PaymentStatus::Pending,
            transaction_id: None,
            reference: None,
            qr_code: None,
            qr_url: None,
            user_id: None,
            user_name: None,
        }
    }
}

/// Editable fields. Status is not editable here; acceptance goes through the guarded transition.
#[derive(Debug, Clone, Default)]
pub struct PaymentChanges {
    pub method: Option<String>,
    pub amount: Option<Decimal>,
    pub reference: Option<String>,
    pub qr_code: Option<String>,
    pub qr_url: Option<String>,
    pub transaction_id: Option<String>,
}

impl Payment {
    pub fn is_accepted(&self) -> bool {
        self.status == PaymentStatus::Accepted
    }

    pub fn apply(&mut self, changes: PaymentChanges) {
        if let Some(method) = changes.method {
            self.method = method;
        }
        if let Some(amount) = changes.amount {
            self.amount = amount;
        }
        if let Some(reference) = changes.reference {
            self.reference = Some(reference);
        }
        if let Some(qr_code) = changes.qr_code {
            self.qr_code = Some(qr_code);
        }
        if let Some(qr_url) = changes.qr_url {
            self.qr_url = Some(qr_url);
        }
        if let Some(transaction_id) = changes.transaction_id {
            self.transaction_id = Some(transaction_id);
        }
    }
}

/// Acceptance data written by the PENDING -> ACCEPTED transition.
#[derive(Debug, Clone)]
pub struct PaymentAcceptance {
    pub paid_at: DateTime<Utc>,
    pub transaction_id: String,
    pub reference: Option<String>,
}

impl PaymentAcceptance {
    pub fn now(reference: Option<String>) -> Self {
        let paid_at = Utc::now();
        Self {
            transaction_id: format!("TXN-{}", paid_at.timestamp_millis()),
            paid_at,
            reference,
        }
    }
}
