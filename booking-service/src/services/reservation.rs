//! Reservation lifecycle: creation with its confirmation and payment, role-filtered
//! listing, updates, cascade deletion and income reporting.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::models::{
    reservation_cost, Area, CurrentUser, Invoice, NewReservation, PaymentWithInvoice,
    Reservation, ReservationBundle, ReservationChanges, ReservationDetail, ReservationStatus,
    DEFAULT_PAYMENT_METHOD,
};
use crate::services::checkout::CheckoutService;
use crate::services::metrics::RESERVATIONS_TOTAL;
use crate::services::repository::{AreaIncome, BookingRepository};

/// Caller-supplied reservation fields.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub area_id: i64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Computed from the area's hourly rate when absent.
    pub cost: Option<Decimal>,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationUpdate {
    pub area_id: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub cost: Option<Decimal>,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationWithInvoice {
    #[serde(flatten)]
    pub detail: ReservationDetail,
    #[serde(rename = "factura")]
    pub invoice: Option<Invoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StripeReservation {
    #[serde(flatten)]
    pub bundle: ReservationBundle,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "checkoutUrl")]
    pub checkout_url: Option<String>,
}

fn validate_window(starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) -> Result<(), AppError> {
    if ends_at <= starts_at {
        return Err(AppError::BadRequest(anyhow!(
            "La fecha de fin debe ser posterior a la de inicio"
        )));
    }
    Ok(())
}

fn validate_cost(cost: Decimal) -> Result<(), AppError> {
    if cost.is_sign_negative() {
        return Err(AppError::BadRequest(anyhow!("El costo no puede ser negativo")));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ReservationService {
    repo: Arc<dyn BookingRepository>,
    checkout: CheckoutService,
}

impl ReservationService {
    pub fn new(repo: Arc<dyn BookingRepository>, checkout: CheckoutService) -> Self {
        Self { repo, checkout }
    }

    async fn area(&self, id: i64) -> Result<Area, AppError> {
        self.repo
            .find_area(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Área no encontrada")))
    }

    async fn find(&self, id: i64) -> Result<Reservation, AppError> {
        self.repo
            .find_reservation(id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Reserva no encontrada")))
    }

    /// Persists the reservation with its PENDING confirmation and PENDING payment.
    #[instrument(skip(self, request, user), fields(area_id = %request.area_id, user_id = %user.id))]
    pub async fn create(
        &self,
        request: ReservationRequest,
        user: &CurrentUser,
    ) -> Result<ReservationBundle, AppError> {
        let bundle = self.create_bundle(request, user).await?;
        RESERVATIONS_TOTAL.with_label_values(&["direct"]).inc();
        Ok(bundle)
    }

    async fn create_bundle(
        &self,
        request: ReservationRequest,
        user: &CurrentUser,
    ) -> Result<ReservationBundle, AppError> {
        validate_window(request.starts_at, request.ends_at)?;
        let area = self.area(request.area_id).await?;

        let cost = match request.cost {
            Some(cost) => {
                validate_cost(cost)?;
                cost
            }
            None => reservation_cost(area.hourly_rate, request.starts_at, request.ends_at),
        };

        let input = NewReservation {
            area_id: area.id,
            starts_at: request.starts_at,
            ends_at: request.ends_at,
            cost,
            user_id: Some(user.id.clone()),
            user_name: Some(user.name.clone()),
            user_role: Some(user.role.clone()),
            status: request.status.unwrap_or(ReservationStatus::Pending),
        };

        let bundle = self
            .repo
            .create_reservation_bundle(input, DEFAULT_PAYMENT_METHOD)
            .await?;
        info!(
            reservation_id = bundle.reservation.id,
            confirmation_id = bundle.confirmation.id,
            payment_id = bundle.payment.id,
            "Reservation created"
        );
        Ok(bundle)
    }

    /// Creates the reservation and opens a Stripe checkout session for its payment.
    pub async fn create_with_stripe(
        &self,
        request: ReservationRequest,
        user: &CurrentUser,
    ) -> Result<StripeReservation, AppError> {
        if !self.checkout.is_configured() {
            return Err(AppError::ServiceUnavailable);
        }
        let bundle = self.create_bundle(request, user).await?;
        RESERVATIONS_TOTAL.with_label_values(&["stripe"]).inc();

        let area_name = self
            .repo
            .find_area(bundle.reservation.area_id)
            .await?
            .map(|area| area.name)
            .unwrap_or_else(|| "Área Común".to_string());
        let description = format!(
            "Reserva de {} ({} - {})",
            area_name,
            bundle.reservation.starts_at.format("%d/%m/%Y %H:%M"),
            bundle.reservation.ends_at.format("%H:%M")
        );

        let started = self
            .checkout
            .create_session(
                bundle.reservation.id,
                Some(bundle.payment.amount),
                &description,
                user,
            )
            .await?;

        Ok(StripeReservation {
            bundle,
            session_id: started.session_id,
            checkout_url: started.checkout_url,
        })
    }

    async fn detail(&self, reservation: Reservation) -> Result<ReservationDetail, AppError> {
        let area = self.repo.find_area(reservation.area_id).await?;
        let confirmation = self
            .repo
            .find_confirmation_by_reservation(reservation.id)
            .await?;

        let mut payments = Vec::new();
        for payment in self
            .repo
            .list_payments_by_reservation(reservation.id)
            .await?
        {
            let invoice = self.repo.find_invoice_by_payment(payment.id).await?;
            payments.push(PaymentWithInvoice { payment, invoice });
        }

        Ok(ReservationDetail {
            reservation,
            area,
            confirmation,
            payments,
        })
    }

    /// Casual users see their own reservations; every other role sees all of them.
    pub async fn list(&self, user: &CurrentUser) -> Result<Vec<ReservationDetail>, AppError> {
        let owner = user.is_casual().then_some(user.id.as_str());
        let reservations = self.repo.list_reservations(owner).await?;

        let mut items = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            items.push(self.detail(reservation).await?);
        }
        Ok(items)
    }

    pub async fn get(&self, id: i64) -> Result<ReservationDetail, AppError> {
        let reservation = self.find(id).await?;
        self.detail(reservation).await
    }

    /// Reservation with its invoices, visible to its owner and to super users.
    pub async fn get_with_invoice(
        &self,
        id: i64,
        user: &CurrentUser,
    ) -> Result<ReservationWithInvoice, AppError> {
        let reservation = self.find(id).await?;
        if !user.owns(reservation.user_id.as_deref()) && !user.is_super_user() {
            return Err(AppError::Forbidden(anyhow!(
                "No tienes permisos para acceder a esta reserva"
            )));
        }

        let detail = self.detail(reservation).await?;
        let invoice = detail.payments.iter().find_map(|p| p.invoice.clone());
        Ok(ReservationWithInvoice { detail, invoice })
    }

    /// Applies the update; the cost follows a changed window or area unless given explicitly.
    #[instrument(skip(self, update), fields(reservation_id = %id))]
    pub async fn update(&self, id: i64, update: ReservationUpdate) -> Result<Reservation, AppError> {
        let current = self.find(id).await?;

        let area_id = update.area_id.unwrap_or(current.area_id);
        let starts_at = update.starts_at.unwrap_or(current.starts_at);
        let ends_at = update.ends_at.unwrap_or(current.ends_at);
        validate_window(starts_at, ends_at)?;

        if area_id != current.area_id {
            self.area(area_id).await?;
        }

        let rescheduled = area_id != current.area_id
            || starts_at != current.starts_at
            || ends_at != current.ends_at;

        let cost = match update.cost {
            Some(cost) => {
                validate_cost(cost)?;
                Some(cost)
            }
            None if rescheduled => {
                let area = self.area(area_id).await?;
                Some(reservation_cost(area.hourly_rate, starts_at, ends_at))
            }
            None => None,
        };

        let changes = ReservationChanges {
            area_id: update.area_id,
            starts_at: update.starts_at,
            ends_at: update.ends_at,
            cost,
            status: update.status,
        };

        self.repo
            .update_reservation(id, changes)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Reserva no encontrada")))
    }

    /// Deletes the reservation with its invoices, payments and confirmation atomically.
    #[instrument(skip(self), fields(reservation_id = %id))]
    pub async fn remove_with_cascade(&self, id: i64) -> Result<Reservation, AppError> {
        let reservation = self.find(id).await?;
        if !self.repo.delete_reservation_cascade(id).await? {
            return Err(AppError::NotFound(anyhow!("Reserva no encontrada")));
        }
        info!("Reservation deleted with dependents");
        Ok(reservation)
    }

    pub async fn income_report(&self) -> Result<Vec<AreaIncome>, AppError> {
        self.repo.income_by_area().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IssuerConfig, QrPaymentConfig, StripeConfig};
    use crate::models::{NewArea, PaymentStatus, VerificationStatus};
    use crate::services::invoice::InvoiceService;
    use crate::services::memory::InMemoryRepository;
    use crate::services::payment::PaymentService;
    use crate::services::renderer::PdfInvoiceRenderer;
    use crate::services::storage::LocalStorage;
    use crate::services::stripe::StripeClient;
    use chrono::TimeZone;
    use secrecy::Secret;

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        reservations: ReservationService,
        payments: PaymentService,
        area: Area,
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
        let payments = PaymentService::new(repo.clone(), invoices.clone(), QrPaymentConfig::default());
        let stripe = StripeClient::new(StripeConfig {
            secret_key: Secret::new(String::new()),
            webhook_secret: Secret::new(String::new()),
            api_base_url: "http://127.0.0.1:9".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            currency: "usd".to_string(),
            webhook_tolerance_secs: 300,
        });
        let checkout = CheckoutService::new(repo.clone(), stripe, payments.clone(), invoices);
        let reservations = ReservationService::new(repo.clone(), checkout);

        let area = repo
            .create_area(NewArea {
                name: "Salón de Eventos".to_string(),
                description: None,
                capacity: 80,
                hourly_rate: Decimal::from(50),
                active: true,
            })
            .await
            .unwrap();

        Fixture {
            repo,
            reservations,
            payments,
            area,
            _dir: dir,
        }
    }

    fn user(id: &str, role: &str) -> CurrentUser {
        CurrentUser {
            id: id.to_string(),
            name: format!("Usuario {}", id),
            email: None,
            role: role.to_string(),
        }
    }

    fn request(area_id: i64, hours: u32) -> ReservationRequest {
        ReservationRequest {
            area_id,
            starts_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2024, 3, 1, 10 + hours, 0, 0).unwrap(),
            cost: None,
            status: None,
        }
    }

    #[tokio::test]
    async fn create_builds_the_bundle_with_computed_cost() {
        let f = fixture().await;
        let bundle = f
            .reservations
            .create(request(f.area.id, 2), &user("7", "USER_CASUAL"))
            .await
            .unwrap();

        assert_eq!(bundle.reservation.cost, Decimal::from(100));
        assert_eq!(bundle.reservation.user_id.as_deref(), Some("7"));
        assert_eq!(bundle.reservation.status, ReservationStatus::Pending);
        assert_eq!(bundle.confirmation.status, VerificationStatus::Pending);
        assert!(bundle
            .confirmation
            .qr_code
            .starts_with(&format!("QR-{}-", bundle.reservation.id)));
        assert_eq!(bundle.payment.amount, Decimal::from(100));
        assert_eq!(bundle.payment.status, PaymentStatus::Pending);
        assert_eq!(bundle.payment.method, DEFAULT_PAYMENT_METHOD);
    }

    #[tokio::test]
    async fn invalid_window_and_unknown_area_are_rejected() {
        let f = fixture().await;
        let mut backwards = request(f.area.id, 2);
        std::mem::swap(&mut backwards.starts_at, &mut backwards.ends_at);
        assert!(matches!(
            f.reservations.create(backwards, &user("7", "USER_CASUAL")).await,
            Err(AppError::BadRequest(_))
        ));

        assert!(matches!(
            f.reservations
                .create(request(999, 1), &user("7", "USER_CASUAL"))
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(f.repo.list_reservations(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn casual_users_only_list_their_own() {
        let f = fixture().await;
        f.reservations
            .create(request(f.area.id, 1), &user("1", "USER_CASUAL"))
            .await
            .unwrap();
        f.reservations
            .create(request(f.area.id, 1), &user("2", "USER_CASUAL"))
            .await
            .unwrap();

        let own = f.reservations.list(&user("1", "USER_CASUAL")).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].reservation.user_id.as_deref(), Some("1"));
        assert_eq!(own[0].payments.len(), 1);
        assert!(own[0].confirmation.is_some());

        let all = f.reservations.list(&user("9", "SUPER_USER")).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn with_invoice_requires_owner_or_super_user() {
        let f = fixture().await;
        let bundle = f
            .reservations
            .create(request(f.area.id, 2), &user("1", "USER_CASUAL"))
            .await
            .unwrap();
        f.payments.confirm(bundle.payment.id).await.unwrap();

        let own = f
            .reservations
            .get_with_invoice(bundle.reservation.id, &user("1", "USER_CASUAL"))
            .await
            .unwrap();
        assert!(own.invoice.is_some());
        assert_eq!(own.detail.reservation.status, ReservationStatus::Confirmed);

        assert!(f
            .reservations
            .get_with_invoice(bundle.reservation.id, &user("9", "SUPER_USER"))
            .await
            .is_ok());
        assert!(matches!(
            f.reservations
                .get_with_invoice(bundle.reservation.id, &user("2", "USER_CASUAL"))
                .await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn rescheduling_recomputes_cost_unless_given() {
        let f = fixture().await;
        let bundle = f
            .reservations
            .create(request(f.area.id, 2), &user("1", "USER_CASUAL"))
            .await
            .unwrap();

        let longer = f
            .reservations
            .update(
                bundle.reservation.id,
                ReservationUpdate {
                    ends_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(longer.cost, Decimal::from(150));

        let fixed = f
            .reservations
            .update(
                bundle.reservation.id,
                ReservationUpdate {
                    ends_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()),
                    cost: Some(Decimal::from(10)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(fixed.cost, Decimal::from(10));
    }

    #[tokio::test]
    async fn cascade_removes_every_dependent() {
        let f = fixture().await;
        let bundle = f
            .reservations
            .create(request(f.area.id, 2), &user("1", "USER_CASUAL"))
            .await
            .unwrap();
        f.payments.confirm(bundle.payment.id).await.unwrap();

        f.reservations
            .remove_with_cascade(bundle.reservation.id)
            .await
            .unwrap();

        assert!(f.repo.find_reservation(bundle.reservation.id).await.unwrap().is_none());
        assert!(f.repo.find_payment(bundle.payment.id).await.unwrap().is_none());
        assert!(f
            .repo
            .find_confirmation_by_reservation(bundle.reservation.id)
            .await
            .unwrap()
            .is_none());
        assert!(f.repo.list_invoices(0, 10).await.unwrap().is_empty());
        assert!(matches!(
            f.reservations.remove_with_cascade(bundle.reservation.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stripe_checkout_needs_configured_keys() {
        let f = fixture().await;
        assert!(matches!(
            f.reservations
                .create_with_stripe(request(f.area.id, 1), &user("1", "USER_CASUAL"))
                .await,
            Err(AppError::ServiceUnavailable)
        ));
        assert!(f.repo.list_reservations(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn income_counts_accepted_payments_only() {
        let f = fixture().await;
        let paid = f
            .reservations
            .create(request(f.area.id, 2), &user("1", "USER_CASUAL"))
            .await
            .unwrap();
        f.reservations
            .create(request(f.area.id, 4), &user("2", "USER_CASUAL"))
            .await
            .unwrap();
        f.payments.confirm(paid.payment.id).await.unwrap();

        let report = f.reservations.income_report().await.unwrap();
        let row = report.iter().find(|r| r.area_id == f.area.id).unwrap();
        assert_eq!(row.total_income, Decimal::from(100));
        assert_eq!(row.reservation_count, 1);
        assert_eq!(row.average_income, Decimal::from(100));
    }
}
