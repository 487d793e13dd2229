//! Reservations and the dependents created alongside them.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Confirmation, Payment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    #[serde(rename = "areaId")]
    pub area_id: i64,
    #[serde(rename = "inicio")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "fin")]
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "costo")]
    pub cost: Decimal,
    #[serde(rename = "usuarioId")]
    pub user_id: Option<String>,
    #[serde(rename = "usuarioNombre")]
    pub user_name: Option<String>,
    #[serde(rename = "usuarioRol")]
    pub user_role: Option<String>,
    #[serde(rename = "estado")]
    pub status: ReservationStatus,
    #[serde(rename = "creadoEn")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "actualizadoEn")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub area_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub cost: Decimal,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_role: Option<String>,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationChanges {
    pub area_id: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub cost: Option<Decimal>,
    pub status: Option<ReservationStatus>,
}

impl Reservation {
    pub fn apply(&mut self, changes: ReservationChanges) {
        if let Some(area_id) = changes.area_id {
            self.area_id = area_id;
        }
        if let Some(starts_at) = changes.starts_at {
            self.starts_at = starts_at;
        }
        if let Some(ends_at) = changes.ends_at {
            self.ends_at = ends_at;
        }
        if let Some(cost) = changes.cost {
            self.cost = cost;
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        self.updated_at = Utc::now();
    }
}

/// A reservation together with the confirmation and payment created in the same transaction.
#[derive(Debug, Clone, Serialize)]
pub struct ReservationBundle {
    #[serde(rename = "reserva")]
    pub reservation: Reservation,
    #[serde(rename = "confirmacion")]
    pub confirmation: Confirmation,
    #[serde(rename = "pago")]
    pub payment: Payment,
}

/// Method recorded on the payment created with every reservation.
pub const DEFAULT_PAYMENT_METHOD: &str = "QR_CODE";

/// Verification code stored on the reservation's confirmation.
pub fn confirmation_code(reservation_id: i64, issued_at: DateTime<Utc>) -> String {
    format!("QR-{}-{}", reservation_id, issued_at.timestamp_millis())
}

/// Reference stored on the reservation's initial payment.
pub fn payment_reference(reservation_id: i64, issued_at: DateTime<Utc>) -> String {
    format!(
        "PAGO-RESERVA-{}-{}",
        reservation_id,
        issued_at.timestamp_millis()
    )
}

/// Reservation cost: hourly rate times the window length in hours, to the cent.
pub fn reservation_cost(
    hourly_rate: Decimal,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Decimal {
    let seconds = (ends_at - starts_at).num_seconds().max(0);
    let hours = Decimal::from(seconds) / Decimal::from(3600);
    (hourly_rate * hours).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn two_hours_at_fifty_costs_one_hundred() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(
            reservation_cost(Decimal::from(50), start, end),
            Decimal::from(100)
        );
    }

    #[test]
    fn partial_hours_round_to_cents() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 10, 20, 0).unwrap();
        // 20 minutes at 10/h
        assert_eq!(
            reservation_cost(Decimal::from(10), start, end),
            Decimal::new(333, 2)
        );
    }

    #[test]
    fn codes_embed_the_reservation_id() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(confirmation_code(7, at), "QR-7-1700000000123");
        assert_eq!(payment_reference(7, at), "PAGO-RESERVA-7-1700000000123");
    }
}
