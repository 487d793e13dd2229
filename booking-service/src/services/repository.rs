//! Storage capability consumed by the business services.
//!
//! Implementations: [`PgRepository`](super::database::PgRepository) for Postgres and
//! [`InMemoryRepository`](super::memory::InMemoryRepository) for tests and local runs.

use async_trait::async_trait;
use service_core::error::AppError;

use crate::models::{
    Area, AreaChanges, AuditEntry, AuditFilter, Block, BlockChanges, ClientInfo, Confirmation,
    ConfirmationChanges, Invoice, InvoiceStatus, NewArea, NewAuditEntry, NewBlock,
    NewConfirmation, NewInvoice, NewPayment, NewReservation, Payment, PaymentAcceptance,
    PaymentChanges, Reservation, ReservationBundle, ReservationChanges, ReservationStatus,
    VerificationStatus,
};
use rust_decimal::Decimal;
use serde::Serialize;

/// Revenue of one area over accepted payments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaIncome {
    #[serde(rename = "areaId")]
    pub area_id: i64,
    #[serde(rename = "nombre")]
    pub area_name: String,
    #[serde(rename = "totalIngresos")]
    pub total_income: Decimal,
    #[serde(rename = "cantidadReservas")]
    pub reservation_count: i64,
    #[serde(rename = "ingresoPromedio")]
    pub average_income: Decimal,
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Areas
    async fn create_area(&self, input: NewArea) -> Result<Area, AppError>;
    async fn list_areas(&self) -> Result<Vec<Area>, AppError>;
    async fn find_area(&self, id: i64) -> Result<Option<Area>, AppError>;
    async fn update_area(&self, id: i64, changes: AreaChanges) -> Result<Option<Area>, AppError>;
    async fn delete_area(&self, id: i64) -> Result<bool, AppError>;

    // Blocks
    async fn create_block(&self, input: NewBlock) -> Result<Block, AppError>;
    async fn list_blocks(&self) -> Result<Vec<Block>, AppError>;
    async fn find_block(&self, id: i64) -> Result<Option<Block>, AppError>;
    async fn update_block(&self, id: i64, changes: BlockChanges)
        -> Result<Option<Block>, AppError>;
    async fn delete_block(&self, id: i64) -> Result<bool, AppError>;

    // Reservations
    /// Persists the reservation, its PENDING confirmation and its PENDING payment atomically.
    async fn create_reservation_bundle(
        &self,
        input: NewReservation,
        payment_method: &str,
    ) -> Result<ReservationBundle, AppError>;
    async fn list_reservations(&self, owner: Option<&str>) -> Result<Vec<Reservation>, AppError>;
    async fn find_reservation(&self, id: i64) -> Result<Option<Reservation>, AppError>;
    async fn update_reservation(
        &self,
        id: i64,
        changes: ReservationChanges,
    ) -> Result<Option<Reservation>, AppError>;
    async fn set_reservation_status(
        &self,
        id: i64,
        status: ReservationStatus,
    ) -> Result<Option<Reservation>, AppError>;
    /// Deletes invoices, payments, confirmation and the reservation in one atomic unit.
    /// Returns `false` when the reservation does not exist.
    async fn delete_reservation_cascade(&self, id: i64) -> Result<bool, AppError>;
    async fn income_by_area(&self) -> Result<Vec<AreaIncome>, AppError>;

    // Confirmations
    async fn create_confirmation(&self, input: NewConfirmation)
        -> Result<Confirmation, AppError>;
    async fn list_confirmations(&self) -> Result<Vec<Confirmation>, AppError>;
    async fn find_confirmation(&self, id: i64) -> Result<Option<Confirmation>, AppError>;
    async fn find_confirmation_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Confirmation>, AppError>;
    async fn update_confirmation(
        &self,
        id: i64,
        changes: ConfirmationChanges,
    ) -> Result<Option<Confirmation>, AppError>;
    async fn set_confirmation_status(
        &self,
        id: i64,
        status: VerificationStatus,
    ) -> Result<Option<Confirmation>, AppError>;
    async fn delete_confirmation(&self, id: i64) -> Result<bool, AppError>;

    // Payments
    async fn create_payment(&self, input: NewPayment) -> Result<Payment, AppError>;
    async fn list_payments(&self) -> Result<Vec<Payment>, AppError>;
    async fn find_payment(&self, id: i64) -> Result<Option<Payment>, AppError>;
    /// Payments of a reservation, newest first.
    async fn list_payments_by_reservation(
        &self,
        reservation_id: i64,
    ) -> Result<Vec<Payment>, AppError>;
    /// Oldest PENDING payment of a reservation.
    async fn first_pending_payment(
        &self,
        reservation_id: i64,
    ) -> Result<Option<Payment>, AppError>;
    async fn update_payment(
        &self,
        id: i64,
        changes: PaymentChanges,
    ) -> Result<Option<Payment>, AppError>;
    /// Guarded PENDING -> ACCEPTED transition. Returns `None` when the payment is missing
    /// or no longer PENDING.
    async fn accept_payment(
        &self,
        id: i64,
        acceptance: PaymentAcceptance,
    ) -> Result<Option<Payment>, AppError>;
    /// Deletes the payment and its invoice.
    async fn delete_payment(&self, id: i64) -> Result<bool, AppError>;

    // Invoices
    /// Highest issued invoice number, if any.
    async fn last_invoice_number(&self) -> Result<Option<String>, AppError>;
    /// Inserts a GENERADA invoice. A taken number or an already-invoiced payment is a Conflict.
    async fn insert_invoice(&self, input: NewInvoice) -> Result<Invoice, AppError>;
    async fn find_invoice(&self, id: i64) -> Result<Option<Invoice>, AppError>;
    async fn find_invoice_by_payment(&self, payment_id: i64)
        -> Result<Option<Invoice>, AppError>;
    /// Invoices ordered by emission date, newest first.
    async fn list_invoices(&self, skip: i64, take: i64) -> Result<Vec<Invoice>, AppError>;
    async fn set_invoice_qr(
        &self,
        id: i64,
        qr_data_url: &str,
        verification_url: &str,
    ) -> Result<Invoice, AppError>;
    async fn set_invoice_client(&self, id: i64, client: &ClientInfo) -> Result<Invoice, AppError>;
    async fn set_invoice_file(
        &self,
        id: i64,
        file_path: &str,
        file_hash: &str,
        status: InvoiceStatus,
    ) -> Result<Invoice, AppError>;

    // Audit
    async fn insert_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry, AppError>;
    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, AppError>;
}
