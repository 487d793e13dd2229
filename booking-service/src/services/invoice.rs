//! Invoice pipeline: numbering, control code, QR, rendering and storage.

use anyhow::anyhow;
use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::IssuerConfig;
use crate::models::{
    ClientInfo, Invoice, InvoiceDetail, InvoiceStatus, IssuerInfo, NewInvoice, Payment,
    PaymentDetail, ReservationWithArea,
};
use crate::services::metrics::{INVOICES_TOTAL, INVOICE_RENDER_DURATION};
use crate::services::renderer::{DocumentRenderer, InvoiceDocument};
use crate::services::repository::BookingRepository;
use crate::services::storage::{Storage, StoredFile};
use crate::services::{fiscal, numbering, qr, words};

/// Attempts to allocate a free invoice number before giving up.
const MAX_NUMBERING_ATTEMPTS: usize = 5;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

const SYSTEM_USER: &str = "SISTEMA";
const DEFAULT_CURRENCY: &str = "BOB";

impl From<&IssuerConfig> for IssuerInfo {
    fn from(config: &IssuerConfig) -> Self {
        Self {
            nit: config.nit.clone(),
            legal_name: config.legal_name.clone(),
            authorization_number: config.authorization_number.clone(),
            address: config.address.clone(),
            phone: config.phone.clone(),
            branch: config.branch.clone(),
            municipality: config.municipality.clone(),
            economic_activity: config.economic_activity.clone(),
        }
    }
}

/// Debug view of an invoice and its stored file.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceFileInfo {
    pub id: i64,
    #[serde(rename = "numeroFactura")]
    pub number: String,
    #[serde(rename = "rutaPdf")]
    pub file_path: Option<String>,
    #[serde(rename = "archivoExiste")]
    pub file_exists: bool,
    #[serde(rename = "tamano")]
    pub size: Option<u64>,
    #[serde(rename = "estado")]
    pub status: InvoiceStatus,
    #[serde(rename = "fechaEmision")]
    pub issued_at: DateTime<Utc>,
}

/// Invoice fields shown next to a payment or checkout session.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceSummary {
    pub id: i64,
    #[serde(rename = "numeroFactura")]
    pub number: String,
    #[serde(rename = "estado")]
    pub status: InvoiceStatus,
    pub total: rust_decimal::Decimal,
    #[serde(rename = "fechaEmision")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "rutaPdf")]
    pub file_path: Option<String>,
    #[serde(rename = "archivoExiste")]
    pub file_exists: bool,
}

/// A rendered invoice ready to be sent to the client.
#[derive(Debug, Clone)]
pub struct InvoiceFile {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct InvoiceService {
    repo: Arc<dyn BookingRepository>,
    storage: Arc<dyn Storage>,
    renderer: Arc<dyn DocumentRenderer>,
    issuer: IssuerConfig,
    number_prefix: String,
}

impl InvoiceService {
    pub fn new(
        repo: Arc<dyn BookingRepository>,
        storage: Arc<dyn Storage>,
        renderer: Arc<dyn DocumentRenderer>,
        issuer: IssuerConfig,
        number_prefix: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            storage,
            renderer,
            issuer,
            number_prefix: number_prefix.into(),
        }
    }

    /// Issuer configured for this deployment.
    pub fn default_issuer(&self) -> IssuerInfo {
        IssuerInfo::from(&self.issuer)
    }

    /// Invoice for `payment_id` with the default client and issuer.
    pub async fn generate_default(&self, payment_id: i64) -> Result<InvoiceDetail, AppError> {
        self.generate(payment_id, ClientInfo::general_public(), self.default_issuer())
            .await
    }

    /// Creates the invoice of a payment, or finishes and returns the one that already exists.
    #[instrument(skip(self, client, issuer), fields(payment_id = %payment_id))]
    pub async fn generate(
        &self,
        payment_id: i64,
        client: ClientInfo,
        issuer: IssuerInfo,
    ) -> Result<InvoiceDetail, AppError> {
        let payment = self
            .repo
            .find_payment(payment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Pago no encontrado")))?;

        if let Some(existing) = self.repo.find_invoice_by_payment(payment_id).await? {
            info!(invoice_id = existing.id, "Invoice already exists for payment");
            INVOICES_TOTAL.with_label_values(&["reused"]).inc();
            let invoice = self.resume(existing).await?;
            return self.detail(invoice).await;
        }

        let invoice = match self.insert_numbered(&payment, client, issuer).await? {
            Inserted::Fresh(invoice) => {
                INVOICES_TOTAL.with_label_values(&["generated"]).inc();
                info!(invoice_id = invoice.id, number = %invoice.number, "Invoice generated");
                let invoice = self.attach_qr(invoice).await?;
                self.render_and_store(invoice).await?
            }
            Inserted::Concurrent(existing) => {
                INVOICES_TOTAL.with_label_values(&["reused"]).inc();
                self.resume(existing).await?
            }
        };

        self.detail(invoice).await
    }

    async fn insert_numbered(
        &self,
        payment: &Payment,
        client: ClientInfo,
        issuer: IssuerInfo,
    ) -> Result<Inserted, AppError> {
        let issued_at = Utc::now();
        let issue_deadline = issued_at
            .checked_add_months(Months::new(12))
            .unwrap_or(issued_at + chrono::Duration::days(365));

        for attempt in 1..=MAX_NUMBERING_ATTEMPTS {
            let last = self.repo.last_invoice_number().await?;
            let number = numbering::next_invoice_number(&self.number_prefix, last.as_deref())?;
            let control_code =
                fiscal::control_code(&number, &issuer.nit, issued_at.date_naive(), payment.amount);

            let input = NewInvoice {
                number: number.clone(),
                payment_id: payment.id,
                issuer: issuer.clone(),
                client: client.clone(),
                control_code,
                issued_at,
                issue_deadline,
                amount: payment.amount,
                currency: DEFAULT_CURRENCY.to_string(),
                legend: fiscal::legend_for(payment.amount).to_string(),
                created_by: SYSTEM_USER.to_string(),
            };

            match self.repo.insert_invoice(input).await {
                Ok(invoice) => return Ok(Inserted::Fresh(invoice)),
                Err(AppError::Conflict(reason)) => {
                    if let Some(existing) = self.repo.find_invoice_by_payment(payment.id).await? {
                        return Ok(Inserted::Concurrent(existing));
                    }
                    warn!(attempt, number = %number, reason = %reason, "Invoice number taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        INVOICES_TOTAL.with_label_values(&["failed"]).inc();
        Err(AppError::Conflict(anyhow!(
            "No se pudo asignar un número de factura"
        )))
    }

    /// Completes whatever an earlier run left undone.
    async fn resume(&self, invoice: Invoice) -> Result<Invoice, AppError> {
        let invoice = if invoice.qr_data_url.is_none() {
            self.attach_qr(invoice).await?
        } else {
            invoice
        };

        if self.needs_render(&invoice).await? {
            self.render_and_store(invoice).await
        } else {
            Ok(invoice)
        }
    }

    async fn needs_render(&self, invoice: &Invoice) -> Result<bool, AppError> {
        if invoice.status == InvoiceStatus::Generated {
            return Ok(true);
        }
        match invoice.file_name() {
            Some(name) => Ok(!self.storage.exists(name).await?),
            None => Ok(true),
        }
    }

    pub async fn file_exists(&self, invoice: &Invoice) -> Result<bool, AppError> {
        match invoice.file_name() {
            Some(name) => self.storage.exists(name).await,
            None => Ok(false),
        }
    }

    pub async fn summary(&self, invoice: Invoice) -> Result<InvoiceSummary, AppError> {
        let file_exists = self.file_exists(&invoice).await?;
        Ok(InvoiceSummary {
            id: invoice.id,
            number: invoice.number,
            status: invoice.status,
            total: invoice.total,
            issued_at: invoice.issued_at,
            file_path: invoice.file_path,
            file_exists,
        })
    }

    async fn attach_qr(&self, invoice: Invoice) -> Result<Invoice, AppError> {
        let payload = qr::fiscal_payload(&invoice);
        let data_url = qr::png_data_url(&payload)?;
        let verification =
            fiscal::verification_url(&invoice.issuer_nit, &invoice.control_code, &invoice.number);
        self.repo
            .set_invoice_qr(invoice.id, &data_url, &verification)
            .await
    }

    async fn area_name(&self, payment_id: i64) -> Result<Option<String>, AppError> {
        let Some(payment) = self.repo.find_payment(payment_id).await? else {
            return Ok(None);
        };
        let Some(reservation) = self.repo.find_reservation(payment.reservation_id).await? else {
            return Ok(None);
        };
        Ok(self
            .repo
            .find_area(reservation.area_id)
            .await?
            .map(|area| area.name))
    }

    #[instrument(skip(self, invoice), fields(invoice_id = invoice.id, number = %invoice.number))]
    async fn render_and_store(&self, invoice: Invoice) -> Result<Invoice, AppError> {
        let previous_file = invoice.file_name().map(str::to_string);
        let document = InvoiceDocument {
            brand: self.issuer.name.clone(),
            area_name: self.area_name(invoice.payment_id).await?,
            amount_in_words: words::amount_to_words(invoice.total),
            qr: Some(qr::qr_modules(&qr::fiscal_payload(&invoice))?),
            invoice,
        };
        let invoice_id = document.invoice.id;
        let file_name = format!(
            "factura_{}_{}.{}",
            document.invoice.number,
            Utc::now().timestamp_millis(),
            self.renderer.extension()
        );

        let renderer = Arc::clone(&self.renderer);
        let timer = INVOICE_RENDER_DURATION.start_timer();
        let rendered = tokio::task::spawn_blocking(move || renderer.render(&document))
            .await
            .map_err(|e| AppError::InternalError(anyhow!("Render task failed: {}", e)))?;
        timer.observe_duration();

        let bytes = rendered.map_err(|e| {
            INVOICES_TOTAL.with_label_values(&["failed"]).inc();
            AppError::from(e)
        })?;

        let hash = fiscal::content_hash(&bytes);
        let size = bytes.len();
        let path = self.storage.write(&file_name, bytes).await?;
        let invoice = self
            .repo
            .set_invoice_file(invoice_id, &path, &hash, InvoiceStatus::Sent)
            .await?;

        if let Some(previous) = previous_file.filter(|previous| *previous != file_name) {
            if let Err(e) = self.storage.remove(&previous).await {
                warn!(file = %previous, error = %e, "Failed to remove replaced invoice document");
            }
        }

        INVOICES_TOTAL.with_label_values(&["sent"]).inc();
        info!(file = %file_name, size, "Invoice document stored");
        Ok(invoice)
    }

    async fn find(&self, id: i64) -> Result<Invoice, AppError> {
        self.repo
            .find_invoice(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Factura no encontrada")))
    }

    /// Invoice with its payment, reservation and area.
    pub async fn detail(&self, invoice: Invoice) -> Result<InvoiceDetail, AppError> {
        let payment = match self.repo.find_payment(invoice.payment_id).await? {
            Some(payment) => {
                let reservation = match self.repo.find_reservation(payment.reservation_id).await? {
                    Some(reservation) => {
                        let area = self.repo.find_area(reservation.area_id).await?;
                        Some(ReservationWithArea { reservation, area })
                    }
                    None => None,
                };
                Some(PaymentDetail {
                    payment,
                    reservation,
                })
            }
            None => None,
        };

        Ok(InvoiceDetail { invoice, payment })
    }

    pub async fn get(&self, id: i64) -> Result<InvoiceDetail, AppError> {
        let invoice = self.find(id).await?;
        self.detail(invoice).await
    }

    pub async fn find_by_payment(&self, payment_id: i64) -> Result<Option<Invoice>, AppError> {
        self.repo.find_invoice_by_payment(payment_id).await
    }

    /// Newest emission first. `take` is clamped to `1..=100`.
    pub async fn list(
        &self,
        skip: Option<i64>,
        take: Option<i64>,
    ) -> Result<Vec<InvoiceDetail>, AppError> {
        let skip = skip.unwrap_or(0).max(0);
        let take = take.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

        let invoices = self.repo.list_invoices(skip, take).await?;
        let mut details = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            details.push(self.detail(invoice).await?);
        }
        Ok(details)
    }

    /// Replaces the non-empty client fields and renders a fresh document.
    #[instrument(skip(self, client), fields(invoice_id = %invoice_id))]
    pub async fn regenerate_with_client_info(
        &self,
        invoice_id: i64,
        client: &ClientInfo,
    ) -> Result<InvoiceDetail, AppError> {
        let invoice = self.find(invoice_id).await?;
        let merged = invoice.client().overlay(client);

        let invoice = if merged != invoice.client() {
            self.repo.set_invoice_client(invoice_id, &merged).await?
        } else {
            invoice
        };

        let invoice = self.attach_qr(invoice).await?;
        let invoice = self.render_and_store(invoice).await?;
        self.detail(invoice).await
    }

    /// Renders the document again from the stored fields.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn rerender(&self, invoice_id: i64) -> Result<InvoiceDetail, AppError> {
        let invoice = self.find(invoice_id).await?;
        let invoice = if invoice.qr_data_url.is_none() {
            self.attach_qr(invoice).await?
        } else {
            invoice
        };
        let invoice = self.render_and_store(invoice).await?;
        self.detail(invoice).await
    }

    /// Personalizes the invoice for the requesting client and returns the rendered file.
    pub async fn download(
        &self,
        invoice_id: i64,
        client: &ClientInfo,
    ) -> Result<InvoiceFile, AppError> {
        let detail = self.regenerate_with_client_info(invoice_id, client).await?;
        let file_name = detail
            .invoice
            .file_name()
            .ok_or_else(|| AppError::NotFound(anyhow!("Archivo PDF no disponible")))?
            .to_string();

        if !self.storage.wait_until_ready(&file_name).await? {
            return Err(AppError::InternalError(anyhow!(
                "Invoice document {} is incomplete",
                file_name
            )));
        }

        let bytes = self.storage.read(&file_name).await?;
        Ok(InvoiceFile {
            file_name: format!("factura_{}.{}", detail.invoice.number, self.renderer.extension()),
            content_type: self.renderer.content_type(),
            bytes,
        })
    }

    /// Raw stored file by name.
    pub async fn stored_file(&self, name: &str) -> Result<InvoiceFile, AppError> {
        let bytes = self.storage.read(name).await?;
        Ok(InvoiceFile {
            file_name: name.to_string(),
            content_type: self.renderer.content_type(),
            bytes,
        })
    }

    pub async fn file_report(&self) -> Result<Vec<StoredFile>, AppError> {
        self.storage.list().await
    }

    pub async fn invoice_report(&self) -> Result<Vec<InvoiceFileInfo>, AppError> {
        let invoices = self.repo.list_invoices(0, i64::from(u16::MAX)).await?;
        let mut report = Vec::with_capacity(invoices.len());
        for invoice in invoices {
            let size = match invoice.file_name() {
                Some(name) => self.storage.size(name).await?,
                None => None,
            };
            report.push(InvoiceFileInfo {
                id: invoice.id,
                number: invoice.number,
                file_path: invoice.file_path,
                file_exists: size.is_some(),
                size,
                status: invoice.status,
                issued_at: invoice.issued_at,
            });
        }
        Ok(report)
    }
}

enum Inserted {
    Fresh(Invoice),
    Concurrent(Invoice),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        NewArea, NewPayment, NewReservation, ReservationBundle, ReservationStatus,
        DEFAULT_PAYMENT_METHOD,
    };
    use crate::services::memory::InMemoryRepository;
    use crate::services::renderer::PdfInvoiceRenderer;
    use crate::services::storage::LocalStorage;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        storage: Arc<LocalStorage>,
        service: InvoiceService,
        bundle: ReservationBundle,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(InMemoryRepository::new());
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let service = InvoiceService::new(
            repo.clone(),
            storage.clone(),
            Arc::new(PdfInvoiceRenderer::new()),
            IssuerConfig::default(),
            "FAC",
        );

        let area = repo
            .create_area(NewArea {
                name: "Salón de eventos".to_string(),
                description: None,
                capacity: 80,
                hourly_rate: Decimal::from(40),
                active: true,
            })
            .await
            .unwrap();
        let bundle = repo
            .create_reservation_bundle(
                NewReservation {
                    area_id: area.id,
                    starts_at: Utc.with_ymd_and_hms(2024, 3, 2, 18, 0, 0).unwrap(),
                    ends_at: Utc.with_ymd_and_hms(2024, 3, 2, 21, 0, 0).unwrap(),
                    cost: Decimal::from(120),
                    user_id: Some("7".to_string()),
                    user_name: Some("Luis".to_string()),
                    user_role: Some("USER_CASUAL".to_string()),
                    status: ReservationStatus::Pending,
                },
                DEFAULT_PAYMENT_METHOD,
            )
            .await
            .unwrap();

        Fixture {
            repo,
            storage,
            service,
            bundle,
            _dir: dir,
        }
    }

    impl Fixture {
        async fn extra_payment(&self, amount: i64) -> Payment {
            self.repo
                .create_payment(NewPayment::pending(
                    self.bundle.reservation.id,
                    DEFAULT_PAYMENT_METHOD,
                    Decimal::from(amount),
                ))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn numbers_are_sequential_across_payments() {
        let f = fixture().await;
        let mut payment_ids = vec![f.bundle.payment.id];
        for amount in [10, 20, 30] {
            payment_ids.push(f.extra_payment(amount).await.id);
        }

        let mut numbers = Vec::new();
        for payment_id in &payment_ids {
            let detail = f.service.generate_default(*payment_id).await.unwrap();
            assert_eq!(detail.invoice.status, InvoiceStatus::Sent);
            numbers.push(detail.invoice.number);
        }
        assert_eq!(
            numbers,
            ["FAC-00000001", "FAC-00000002", "FAC-00000003", "FAC-00000004"]
        );

        let again = f.service.generate_default(payment_ids[0]).await.unwrap();
        assert_eq!(again.invoice.number, "FAC-00000001");
        assert_eq!(f.repo.list_invoices(0, 100).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn generated_invoice_without_file_is_completed() {
        let f = fixture().await;
        let payment_id = f.bundle.payment.id;
        let partial = f
            .repo
            .insert_invoice(NewInvoice {
                number: "FAC-00000001".to_string(),
                payment_id,
                issuer: f.service.default_issuer(),
                client: ClientInfo::general_public(),
                control_code: "0123456789ABCDEF".to_string(),
                issued_at: Utc::now(),
                issue_deadline: Utc::now() + chrono::Duration::days(365),
                amount: Decimal::from(120),
                currency: DEFAULT_CURRENCY.to_string(),
                legend: fiscal::legend_for(Decimal::from(120)).to_string(),
                created_by: SYSTEM_USER.to_string(),
            })
            .await
            .unwrap();
        assert_eq!(partial.status, InvoiceStatus::Generated);
        assert!(partial.file_path.is_none());

        let detail = f.service.generate_default(payment_id).await.unwrap();

        assert_eq!(detail.invoice.id, partial.id);
        assert_eq!(detail.invoice.number, "FAC-00000001");
        assert_eq!(detail.invoice.status, InvoiceStatus::Sent);
        assert!(detail.invoice.qr_data_url.is_some());
        assert!(detail.invoice.file_hash.is_some());
        assert!(f.service.file_exists(&detail.invoice).await.unwrap());
    }

    #[tokio::test]
    async fn taken_number_is_retried_with_the_next_one() {
        let f = fixture().await;
        let first = f.service.generate_default(f.bundle.payment.id).await.unwrap();
        assert_eq!(first.invoice.number, "FAC-00000001");

        let second_payment = f.extra_payment(45).await;
        f.repo.stale_invoice_number_reads(1);

        let second = f.service.generate_default(second_payment.id).await.unwrap();
        assert_eq!(second.invoice.number, "FAC-00000002");
        assert_eq!(second.invoice.status, InvoiceStatus::Sent);
    }

    #[tokio::test]
    async fn concurrent_insert_for_same_payment_returns_existing_invoice() {
        let f = fixture().await;
        let payment_id = f.bundle.payment.id;
        let first = f.service.generate_default(payment_id).await.unwrap();

        f.repo.hide_invoice_lookups(1);
        let second = f.service.generate_default(payment_id).await.unwrap();

        assert_eq!(second.invoice.id, first.invoice.id);
        assert_eq!(second.invoice.number, first.invoice.number);
        assert_eq!(f.repo.list_invoices(0, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_downloads_keep_a_single_document() {
        let f = fixture().await;
        let detail = f.service.generate_default(f.bundle.payment.id).await.unwrap();

        let client = ClientInfo {
            name: "Maria Quispe".to_string(),
            email: "maria@example.com".to_string(),
            document: "4455667".to_string(),
            complement: String::new(),
        };
        for _ in 0..5 {
            let file = f.service.download(detail.invoice.id, &client).await.unwrap();
            assert!(file.bytes.starts_with(b"%PDF"));
        }

        let files = f.storage.list().await.unwrap();
        assert_eq!(files.len(), 1);
        let current = f.service.get(detail.invoice.id).await.unwrap().invoice;
        assert_eq!(current.file_name(), Some(files[0].name.as_str()));
        assert_eq!(current.client_name, "Maria Quispe");
    }

    #[tokio::test]
    async fn unknown_payment_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.service.generate_default(9_999).await,
            Err(AppError::NotFound(_))
        ));
    }
}
