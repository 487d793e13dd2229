//! Reservation payments: CRUD, confirmation with lazy invoicing and the QR payment flow.

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::QrPaymentConfig;
use crate::models::{
    CurrentUser, NewPayment, Payment, PaymentAcceptance, PaymentChanges, PaymentOverview,
    PaymentStatus, ReservationStatus, ReservationWithArea, DEFAULT_PAYMENT_METHOD,
};
use crate::services::invoice::{InvoiceService, InvoiceSummary};
use crate::services::metrics::PAYMENTS_CONFIRMED_TOTAL;
use crate::services::repository::BookingRepository;

pub const AUTOMATIC_METHOD: &str = "AUTOMATICO";

const QR_INSTRUCTIONS: [&str; 4] = [
    "1. Escanea el código QR con tu app bancaria",
    "2. Verifica el monto y concepto",
    "3. Confirma el pago",
    "4. Usa la referencia para confirmar aquí",
];

/// Payment state with its reservation and invoice summary.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusReport {
    #[serde(rename = "pago")]
    pub payment: Payment,
    #[serde(rename = "reserva")]
    pub reservation: Option<ReservationWithArea>,
    #[serde(rename = "factura")]
    pub invoice: Option<InvoiceSummary>,
}

/// Everything the client needs to pay a reservation by bank QR.
#[derive(Debug, Clone, Serialize)]
pub struct QrPaymentInstructions {
    #[serde(rename = "pagoId")]
    pub payment_id: i64,
    #[serde(rename = "reservaId")]
    pub reservation_id: i64,
    #[serde(rename = "monto")]
    pub amount: Decimal,
    #[serde(rename = "codigoQr")]
    pub qr_code: Option<String>,
    #[serde(rename = "urlQr")]
    pub qr_url: Option<String>,
    #[serde(rename = "referenciaPago")]
    pub reference: Option<String>,
    #[serde(rename = "transaccionId")]
    pub transaction_id: Option<String>,
    #[serde(rename = "banco")]
    pub bank_name: String,
    #[serde(rename = "numeroCuenta")]
    pub account_number: String,
    #[serde(rename = "titular")]
    pub account_holder: String,
    pub nit: String,
    #[serde(rename = "instrucciones")]
    pub instructions: Vec<String>,
    #[serde(rename = "fechaLimite")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "estado")]
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct QrPaymentConfirmation {
    #[serde(rename = "pagoId")]
    pub payment_id: i64,
    #[serde(rename = "reservaId")]
    pub reservation_id: i64,
    #[serde(rename = "estado")]
    pub status: PaymentStatus,
    #[serde(rename = "referenciaPago")]
    pub reference: Option<String>,
    #[serde(rename = "monto")]
    pub amount: Decimal,
    #[serde(rename = "fechaConfirmacion")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(rename = "factura")]
    pub invoice: Option<InvoiceSummary>,
}

#[derive(Clone)]
pub struct PaymentService {
    repo: Arc<dyn BookingRepository>,
    invoices: InvoiceService,
    qr: QrPaymentConfig,
}

impl PaymentService {
    pub fn new(
        repo: Arc<dyn BookingRepository>,
        invoices: InvoiceService,
        qr: QrPaymentConfig,
    ) -> Self {
        Self { repo, invoices, qr }
    }

    async fn find(&self, id: i64) -> Result<Payment, AppError> {
        self.repo
            .find_payment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Pago no encontrado")))
    }

    async fn reservation_with_area(
        &self,
        reservation_id: i64,
    ) -> Result<Option<ReservationWithArea>, AppError> {
        let Some(reservation) = self.repo.find_reservation(reservation_id).await? else {
            return Ok(None);
        };
        let area = self.repo.find_area(reservation.area_id).await?;
        Ok(Some(ReservationWithArea { reservation, area }))
    }

    async fn overview(&self, payment: Payment) -> Result<PaymentOverview, AppError> {
        let reservation = self.reservation_with_area(payment.reservation_id).await?;
        let invoice = self.repo.find_invoice_by_payment(payment.id).await?;
        Ok(PaymentOverview {
            payment,
            reservation,
            invoice,
        })
    }

    /// Records a payment for an existing reservation, owned by the caller.
    #[instrument(skip(self, input, user), fields(reservation_id = %input.reservation_id))]
    pub async fn create(
        &self,
        mut input: NewPayment,
        user: Option<&CurrentUser>,
    ) -> Result<Payment, AppError> {
        if self.repo.find_reservation(input.reservation_id).await?.is_none() {
            return Err(AppError::NotFound(anyhow!("Reserva no encontrada")));
        }
        if let Some(user) = user {
            input.user_id = Some(user.id.clone());
            input.user_name = Some(user.name.clone());
        }
        let payment = self.repo.create_payment(input).await?;
        info!(payment_id = payment.id, "Payment created");
        Ok(payment)
    }

    /// PENDING payment created by the system for a reservation.
    pub async fn create_automatic(
        &self,
        reservation_id: i64,
        amount: Decimal,
    ) -> Result<Payment, AppError> {
        if amount <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow!("El monto debe ser positivo")));
        }
        let mut input = NewPayment::pending(reservation_id, AUTOMATIC_METHOD, amount);
        input.reference = Some(format!(
            "RESERVA-{}-{}",
            reservation_id,
            Utc::now().timestamp_millis()
        ));
        self.create(input, None).await
    }

    pub async fn list(&self) -> Result<Vec<PaymentOverview>, AppError> {
        let payments = self.repo.list_payments().await?;
        let mut items = Vec::with_capacity(payments.len());
        for payment in payments {
            items.push(self.overview(payment).await?);
        }
        Ok(items)
    }

    pub async fn get(&self, id: i64) -> Result<PaymentOverview, AppError> {
        let payment = self.find(id).await?;
        self.overview(payment).await
    }

    pub async fn update(&self, id: i64, changes: PaymentChanges) -> Result<Payment, AppError> {
        self.repo
            .update_payment(id, changes)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Pago no encontrado")))
    }

    pub async fn delete(&self, id: i64) -> Result<Payment, AppError> {
        let payment = self.find(id).await?;
        if !self.repo.delete_payment(id).await? {
            return Err(AppError::NotFound(anyhow!("Pago no encontrado")));
        }
        info!(payment_id = id, "Payment deleted");
        Ok(payment)
    }

    /// Most recent payment of a reservation.
    pub async fn by_reservation(&self, reservation_id: i64) -> Result<PaymentOverview, AppError> {
        let payment = self
            .repo
            .list_payments_by_reservation(reservation_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(anyhow!("No hay pagos para la reserva")))?;
        self.overview(payment).await
    }

    pub async fn status(&self, id: i64) -> Result<PaymentStatusReport, AppError> {
        let payment = self.find(id).await?;
        let reservation = self.reservation_with_area(payment.reservation_id).await?;
        let invoice = match self.repo.find_invoice_by_payment(id).await? {
            Some(invoice) => Some(self.invoices.summary(invoice).await?),
            None => None,
        };
        Ok(PaymentStatusReport {
            payment,
            reservation,
            invoice,
        })
    }

    /// Accepts the payment once, confirms its reservation and makes sure it is invoiced.
    ///
    /// Confirming an ACCEPTED payment returns it unchanged.
    #[instrument(skip(self), fields(payment_id = %id))]
    pub async fn confirm(&self, id: i64) -> Result<PaymentOverview, AppError> {
        self.accept(id, None).await?;
        let payment = self.find(id).await?;
        self.overview(payment).await
    }

    async fn accept(&self, id: i64, reference: Option<String>) -> Result<Payment, AppError> {
        let payment = self.find(id).await?;
        if payment.is_accepted() {
            info!("Payment already confirmed");
            return Ok(payment);
        }

        let payment = match self
            .repo
            .accept_payment(id, PaymentAcceptance::now(reference))
            .await?
        {
            Some(accepted) => {
                PAYMENTS_CONFIRMED_TOTAL
                    .with_label_values(&[accepted.method.as_str()])
                    .inc();
                info!(method = %accepted.method, "Payment confirmed");
                accepted
            }
            // Another request accepted it first.
            None => self.find(id).await?,
        };

        self.repo
            .set_reservation_status(payment.reservation_id, ReservationStatus::Confirmed)
            .await?;

        if self.repo.find_invoice_by_payment(id).await?.is_none() {
            match self.invoices.generate_default(id).await {
                Ok(detail) => info!(invoice_id = detail.invoice.id, "Invoice generated"),
                Err(e) => error!(error = %e, "Invoice generation failed after confirmation"),
            }
        }

        Ok(payment)
    }

    /// Creates a PENDING QR payment for the reservation and returns the bank instructions.
    #[instrument(skip(self, user), fields(reservation_id = %reservation_id))]
    pub async fn generate_qr_payment(
        &self,
        reservation_id: i64,
        user: &CurrentUser,
    ) -> Result<QrPaymentInstructions, AppError> {
        let reservation = self
            .repo
            .find_reservation(reservation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Reserva no encontrada")))?;

        let now = Utc::now();
        let millis = now.timestamp_millis().to_string();
        let short = &millis[millis.len().saturating_sub(6)..];
        let token = Uuid::new_v4().simple().to_string();

        let mut input =
            NewPayment::pending(reservation_id, DEFAULT_PAYMENT_METHOD, reservation.cost);
        input.qr_code = Some(format!("QR-{}-{}", reservation_id, millis));
        input.qr_url = Some(format!(
            "{}/pago/{}",
            self.qr.base_url.trim_end_matches('/'),
            reservation_id
        ));
        input.reference = Some(format!("REF-{}-{}", reservation_id, short));
        input.transaction_id = Some(format!("TXN-{}", token[..9].to_uppercase()));
        input.user_id = Some(user.id.clone());
        input.user_name = Some(user.name.clone());

        let payment = self.repo.create_payment(input).await?;
        info!(payment_id = payment.id, "QR payment generated");

        Ok(QrPaymentInstructions {
            payment_id: payment.id,
            reservation_id,
            amount: payment.amount,
            qr_code: payment.qr_code,
            qr_url: payment.qr_url,
            reference: payment.reference,
            transaction_id: payment.transaction_id,
            bank_name: self.qr.bank_name.clone(),
            account_number: self.qr.account_number.clone(),
            account_holder: self.qr.account_holder.clone(),
            nit: self.invoices.default_issuer().nit,
            instructions: QR_INSTRUCTIONS.iter().map(|s| s.to_string()).collect(),
            expires_at: now + Duration::minutes(self.qr.expiry_minutes),
            status: payment.status,
        })
    }

    /// Confirms a PENDING QR payment with the bank reference the client reported.
    #[instrument(skip(self, reference), fields(payment_id = %id))]
    pub async fn confirm_qr_payment(
        &self,
        id: i64,
        reference: Option<&str>,
    ) -> Result<QrPaymentConfirmation, AppError> {
        let payment = self.find(id).await?;
        if payment.status != PaymentStatus::Pending {
            return Err(AppError::BadRequest(anyhow!("El pago {} ya fue procesado", id)));
        }

        let reference = reference
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or(payment.reference)
            .unwrap_or_else(|| format!("AUTO-QR-{}", Utc::now().timestamp_millis()));

        let payment = self.accept(id, Some(reference)).await?;
        let invoice = match self.repo.find_invoice_by_payment(id).await? {
            Some(invoice) => Some(self.invoices.summary(invoice).await?),
            None => None,
        };

        Ok(QrPaymentConfirmation {
            payment_id: payment.id,
            reservation_id: payment.reservation_id,
            status: payment.status,
            reference: payment.reference,
            amount: payment.amount,
            confirmed_at: payment.paid_at,
            invoice,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IssuerConfig;
    use crate::models::{NewArea, NewReservation, ReservationBundle};
    use crate::services::memory::InMemoryRepository;
    use crate::services::renderer::PdfInvoiceRenderer;
    use crate::services::storage::LocalStorage;
    use chrono::TimeZone;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        service: PaymentService,
        bundle: ReservationBundle,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(InMemoryRepository::new());
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let invoices = InvoiceService::new(
            repo.clone(),
            storage,
            Arc::new(PdfInvoiceRenderer::new()),
            IssuerConfig::default(),
            "FAC",
        );
        let service = PaymentService::new(repo.clone(), invoices, QrPaymentConfig::default());

        let area = repo
            .create_area(NewArea {
                name: "Piscina".to_string(),
                description: None,
                capacity: 20,
                hourly_rate: Decimal::from(50),
                active: true,
            })
            .await
            .unwrap();
        let bundle = repo
            .create_reservation_bundle(
                NewReservation {
                    area_id: area.id,
                    starts_at: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
                    ends_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
                    cost: Decimal::from(100),
                    user_id: Some("42".to_string()),
                    user_name: Some("Ana".to_string()),
                    user_role: Some("USER_CASUAL".to_string()),
                    status: ReservationStatus::Pending,
                },
                DEFAULT_PAYMENT_METHOD,
            )
            .await
            .unwrap();

        Fixture {
            repo,
            service,
            bundle,
            _dir: dir,
        }
    }

    fn user() -> CurrentUser {
        CurrentUser {
            id: "42".to_string(),
            name: "Ana".to_string(),
            email: Some("ana@example.com".to_string()),
            role: "USER_CASUAL".to_string(),
        }
    }

    #[tokio::test]
    async fn confirm_accepts_confirms_reservation_and_invoices_once() {
        let f = fixture().await;
        let payment_id = f.bundle.payment.id;

        let first = f.service.confirm(payment_id).await.unwrap();
        assert!(first.payment.is_accepted());
        assert!(first.payment.transaction_id.as_deref().unwrap().starts_with("TXN-"));
        let invoice = first.invoice.expect("invoice generated");
        assert_eq!(invoice.total, Decimal::from(100));
        assert_eq!(
            first.reservation.unwrap().reservation.status,
            ReservationStatus::Confirmed
        );

        let second = f.service.confirm(payment_id).await.unwrap();
        assert_eq!(second.payment.paid_at, first.payment.paid_at);
        assert_eq!(second.invoice.unwrap().id, invoice.id);
        assert_eq!(f.repo.list_invoices(0, 100).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn confirm_unknown_payment_is_not_found() {
        let f = fixture().await;
        assert!(matches!(
            f.service.confirm(9_999).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn qr_payment_carries_reference_and_bank_data() {
        let f = fixture().await;
        let qr = f
            .service
            .generate_qr_payment(f.bundle.reservation.id, &user())
            .await
            .unwrap();

        assert_eq!(qr.amount, Decimal::from(100));
        assert_eq!(qr.instructions.len(), 4);
        assert!(qr
            .reference
            .as_deref()
            .unwrap()
            .starts_with(&format!("REF-{}-", f.bundle.reservation.id)));
        assert!(qr.qr_url.as_deref().unwrap().ends_with(&format!(
            "/pago/{}",
            f.bundle.reservation.id
        )));
        assert_eq!(qr.status, PaymentStatus::Pending);
        assert!(qr.expires_at > Utc::now() + Duration::minutes(29));

        let confirmed = f
            .service
            .confirm_qr_payment(qr.payment_id, Some("BNB-778899"))
            .await
            .unwrap();
        assert_eq!(confirmed.status, PaymentStatus::Accepted);
        assert_eq!(confirmed.reference.as_deref(), Some("BNB-778899"));
        assert!(confirmed.invoice.is_some());

        assert!(matches!(
            f.service.confirm_qr_payment(qr.payment_id, None).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn latest_payment_by_reservation() {
        let f = fixture().await;
        let automatic = f
            .service
            .create_automatic(f.bundle.reservation.id, Decimal::from(25))
            .await
            .unwrap();
        assert_eq!(automatic.method, AUTOMATIC_METHOD);

        let latest = f
            .service
            .by_reservation(f.bundle.reservation.id)
            .await
            .unwrap();
        assert_eq!(latest.payment.id, automatic.id);
    }

    #[tokio::test]
    async fn status_reports_invoice_file() {
        let f = fixture().await;
        f.service.confirm(f.bundle.payment.id).await.unwrap();

        let report = f.service.status(f.bundle.payment.id).await.unwrap();
        let invoice = report.invoice.unwrap();
        assert!(invoice.file_exists);
        assert!(invoice.number.starts_with("FAC-"));
    }
}
