pub mod audit;
pub mod checkout;
pub mod database;
pub mod fiscal;
pub mod invoice;
pub mod memory;
pub mod metrics;
pub mod numbering;
pub mod payment;
pub mod qr;
pub mod renderer;
pub mod repository;
pub mod reservation;
pub mod storage;
pub mod stripe;
pub mod words;

pub use audit::AuditService;
pub use checkout::CheckoutService;
pub use database::PgRepository;
pub use invoice::InvoiceService;
pub use memory::InMemoryRepository;
pub use payment::PaymentService;
pub use renderer::{DocumentRenderer, PdfInvoiceRenderer};
pub use repository::BookingRepository;
pub use reservation::ReservationService;
pub use storage::{LocalStorage, Storage};
pub use stripe::StripeClient;
pub use metrics::{get_metrics, init_metrics};
