//! Domain models for booking-service.

mod area;
mod audit;
mod block;
mod confirmation;
mod detail;
mod invoice;
mod payment;
mod reservation;
mod user;

pub use area::{Area, AreaChanges, NewArea};
pub use audit::{AuditAction, AuditEntry, AuditFilter, NewAuditEntry};
pub use block::{Block, BlockChanges, NewBlock};
pub use confirmation::{Confirmation, ConfirmationChanges, NewConfirmation, VerificationStatus};
pub use detail::{
    BlockDetail, InvoiceDetail, PaymentDetail, PaymentOverview, PaymentWithInvoice,
    ReservationDetail, ReservationWithArea,
};
pub use invoice::{ClientInfo, Invoice, InvoiceStatus, IssuerInfo, NewInvoice};
pub use payment::{NewPayment, Payment, PaymentAcceptance, PaymentChanges, PaymentStatus};
pub use reservation::{
    confirmation_code, payment_reference, reservation_cost, NewReservation, Reservation,
    ReservationBundle, ReservationChanges, ReservationStatus, DEFAULT_PAYMENT_METHOD,
};
pub use user::{CurrentUser, ROLE_ADMIN, ROLE_CASUAL, ROLE_SUPER_USER};
