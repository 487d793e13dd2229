//! Nested read views returned by the API (entity plus its relations).

use serde::Serialize;

use super::{Area, Block, Confirmation, Invoice, Payment, Reservation};

#[derive(Debug, Clone, Serialize)]
pub struct BlockDetail {
    #[serde(flatten)]
    pub block: Block,
    pub area: Option<Area>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationWithArea {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub area: Option<Area>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationDetail {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub area: Option<Area>,
    #[serde(rename = "confirmacion")]
    pub confirmation: Option<Confirmation>,
    #[serde(rename = "pagosReserva")]
    pub payments: Vec<PaymentWithInvoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentWithInvoice {
    #[serde(flatten)]
    pub payment: Payment,
    #[serde(rename = "factura")]
    pub invoice: Option<Invoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: Payment,
    #[serde(rename = "reserva")]
    pub reservation: Option<ReservationWithArea>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceDetail {
    #[serde(flatten)]
    pub invoice: Invoice,
    #[serde(rename = "pagoReserva")]
    pub payment: Option<PaymentDetail>,
}

impl InvoiceDetail {
    /// Name of the reserved area, when the relation chain is complete.
    pub fn area_name(&self) -> Option<&str> {
        self.payment
            .as_ref()
            .and_then(|p| p.reservation.as_ref())
            .and_then(|r| r.area.as_ref())
            .map(|a| a.name.as_str())
    }
}

/// Payment with its reservation (and area) and its invoice.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOverview {
    #[serde(flatten)]
    pub payment: Payment,
    #[serde(rename = "reserva")]
    pub reservation: Option<ReservationWithArea>,
    #[serde(rename = "factura")]
    pub invoice: Option<Invoice>,
}
