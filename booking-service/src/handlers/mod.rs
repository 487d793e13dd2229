//! HTTP handlers for booking-service, one module per resource.

pub mod areas;
pub mod audit;
pub mod blocks;
pub mod confirmations;
pub mod health;
pub mod invoices;
pub mod payments;
pub mod reservations;
pub mod stripe;

pub use health::{health_check, metrics_endpoint, readiness_check};
