//! Stripe Checkout workflow: session creation, verification, webhook handling and
//! invoice-on-demand for completed sessions.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::models::{CurrentUser, NewPayment, Payment, PaymentChanges, ReservationStatus};
use crate::services::invoice::{InvoiceService, InvoiceSummary};
use crate::services::metrics::WEBHOOK_EVENTS_TOTAL;
use crate::services::payment::PaymentService;
use crate::services::repository::BookingRepository;
use crate::services::stripe::{CheckoutRequest, CheckoutSession, StripeClient, WebhookEvent};

pub const STRIPE_METHOD: &str = "STRIPE";

const EVENT_SESSION_COMPLETED: &str = "checkout.session.completed";
const EVENT_INTENT_SUCCEEDED: &str = "payment_intent.succeeded";

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutStarted {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "checkoutUrl")]
    pub checkout_url: Option<String>,
    #[serde(rename = "pagoId")]
    pub payment_id: i64,
    #[serde(rename = "reservaId")]
    pub reservation_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReservation {
    pub id: i64,
    #[serde(rename = "areaComun")]
    pub area_name: Option<String>,
    #[serde(rename = "inicio")]
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "fin")]
    pub ends_at: DateTime<Utc>,
    #[serde(rename = "costo")]
    pub cost: Decimal,
    #[serde(rename = "estado")]
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionVerification {
    pub session: CheckoutSession,
    #[serde(rename = "reserva")]
    pub reservation: Option<SessionReservation>,
    #[serde(rename = "factura")]
    pub invoice: Option<InvoiceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInvoice {
    /// False when the invoice already existed.
    #[serde(rename = "generada")]
    pub created: bool,
    #[serde(rename = "factura")]
    pub invoice: Option<InvoiceSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Confirmed { payment_id: i64 },
    Unmatched,
    Logged,
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed { .. } => "confirmed",
            Self::Unmatched => "unmatched",
            Self::Logged => "logged",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    repo: Arc<dyn BookingRepository>,
    stripe: StripeClient,
    payments: PaymentService,
    invoices: InvoiceService,
}

impl CheckoutService {
    pub fn new(
        repo: Arc<dyn BookingRepository>,
        stripe: StripeClient,
        payments: PaymentService,
        invoices: InvoiceService,
    ) -> Self {
        Self {
            repo,
            stripe,
            payments,
            invoices,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.stripe.is_configured()
    }

    /// Opens a checkout session for the reservation's pending payment, creating a STRIPE
    /// payment when none is pending.
    #[instrument(skip(self, description, user), fields(reservation_id = %reservation_id))]
    pub async fn create_session(
        &self,
        reservation_id: i64,
        amount: Option<Decimal>,
        description: &str,
        user: &CurrentUser,
    ) -> Result<CheckoutStarted, AppError> {
        if !self.is_configured() {
            return Err(AppError::ServiceUnavailable);
        }

        let reservation = self
            .repo
            .find_reservation(reservation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("Reserva no encontrada")))?;

        let payment = match self.repo.first_pending_payment(reservation_id).await? {
            Some(payment) => match amount.filter(|amount| *amount != payment.amount) {
                Some(amount) => {
                    info!(payment_id = payment.id, %amount, "Updating pending payment amount for checkout");
                    self.payments
                        .update(
                            payment.id,
                            PaymentChanges {
                                amount: Some(amount),
                                ..Default::default()
                            },
                        )
                        .await?
                }
                None => payment,
            },
            None => {
                let input = NewPayment::pending(
                    reservation_id,
                    STRIPE_METHOD,
                    amount.unwrap_or(reservation.cost),
                );
                self.payments.create(input, Some(user)).await?
            }
        };

        let request = CheckoutRequest {
            reservation_id,
            payment_id: payment.id,
            amount: payment.amount,
            description: description.to_string(),
            customer_email: user.email.clone(),
        };
        let session = self.stripe.create_checkout_session(&request).await?;

        Ok(CheckoutStarted {
            session_id: session.id,
            checkout_url: session.url,
            payment_id: payment.id,
            reservation_id,
        })
    }

    /// Payment a session refers to: the carried payment id, else the latest payment of the
    /// carried reservation.
    async fn session_payment(&self, session: &CheckoutSession) -> Result<Option<Payment>, AppError> {
        if let Some(payment_id) = session.payment_id() {
            if let Some(payment) = self.repo.find_payment(payment_id).await? {
                return Ok(Some(payment));
            }
        }
        match session.reservation_id() {
            Some(reservation_id) => Ok(self
                .repo
                .list_payments_by_reservation(reservation_id)
                .await?
                .into_iter()
                .next()),
            None => Ok(None),
        }
    }

    async fn invoice_summary(&self, payment_id: i64) -> Result<Option<InvoiceSummary>, AppError> {
        match self.invoices.find_by_payment(payment_id).await? {
            Some(invoice) => Ok(Some(self.invoices.summary(invoice).await?)),
            None => Ok(None),
        }
    }

    pub async fn verify_session(&self, session_id: &str) -> Result<SessionVerification, AppError> {
        let session = self.stripe.retrieve_checkout_session(session_id).await?;
        info!(session_id, payment_status = ?session.payment_status, "Checkout session retrieved");

        let Some(payment) = self.session_payment(&session).await? else {
            return Ok(SessionVerification {
                session,
                reservation: None,
                invoice: None,
            });
        };

        let reservation = match self.repo.find_reservation(payment.reservation_id).await? {
            Some(reservation) => {
                let area_name = self
                    .repo
                    .find_area(reservation.area_id)
                    .await?
                    .map(|area| area.name);
                Some(SessionReservation {
                    id: reservation.id,
                    area_name,
                    starts_at: reservation.starts_at,
                    ends_at: reservation.ends_at,
                    cost: reservation.cost,
                    status: reservation.status,
                })
            }
            None => None,
        };
        let invoice = self.invoice_summary(payment.id).await?;

        Ok(SessionVerification {
            session,
            reservation,
            invoice,
        })
    }

    /// Verifies and dispatches a webhook delivery.
    #[instrument(skip_all)]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, AppError> {
        let signature = signature.ok_or_else(|| {
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&["unknown", "rejected"])
                .inc();
            AppError::BadRequest(anyhow!("Missing Stripe-Signature header"))
        })?;

        if let Err(e) =
            self.stripe
                .verify_webhook_signature(payload, signature, Utc::now().timestamp())
        {
            WEBHOOK_EVENTS_TOTAL
                .with_label_values(&["unknown", "rejected"])
                .inc();
            return Err(e.into());
        }

        let event = self.stripe.parse_webhook_event(payload)?;
        info!(event_id = %event.id, event_type = %event.event_type, "Webhook received");

        let result = match event.event_type.as_str() {
            EVENT_SESSION_COMPLETED => self.complete_session(&event).await,
            EVENT_INTENT_SUCCEEDED => {
                let intent_id = event.data.object.get("id").and_then(|v| v.as_str());
                info!(payment_intent = ?intent_id, "Payment intent succeeded");
                Ok(WebhookOutcome::Logged)
            }
            other => {
                info!(event_type = other, "Unhandled webhook event");
                Ok(WebhookOutcome::Ignored)
            }
        };

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "failed",
        };
        WEBHOOK_EVENTS_TOTAL
            .with_label_values(&[event.event_type.as_str(), outcome])
            .inc();
        result
    }

    async fn complete_session(&self, event: &WebhookEvent) -> Result<WebhookOutcome, AppError> {
        let session = event.checkout_session()?;

        let payment = match session.payment_id() {
            Some(payment_id) => self.repo.find_payment(payment_id).await?,
            None => match session.reservation_id() {
                Some(reservation_id) => self.repo.first_pending_payment(reservation_id).await?,
                None => {
                    return Err(AppError::BadRequest(anyhow!(
                        "reservaId no encontrado en metadata de la sesión"
                    )))
                }
            },
        };

        let Some(payment) = payment else {
            warn!(session_id = %session.id, "No payment found for completed session");
            return Ok(WebhookOutcome::Unmatched);
        };

        self.payments.confirm(payment.id).await?;
        info!(payment_id = payment.id, session_id = %session.id, "Checkout session completed");
        Ok(WebhookOutcome::Confirmed {
            payment_id: payment.id,
        })
    }

    /// Returns the session's invoice, confirming its payment first when none exists yet.
    #[instrument(skip(self))]
    pub async fn ensure_invoice(&self, session_id: &str) -> Result<SessionInvoice, AppError> {
        let session = self.stripe.retrieve_checkout_session(session_id).await?;
        if session.payment_id().is_none() && session.reservation_id().is_none() {
            return Err(AppError::BadRequest(anyhow!(
                "No se encontró información de reserva en la sesión"
            )));
        }

        let payment = self
            .session_payment(&session)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow!("No se encontró pago para esta reserva")))?;

        if let Some(invoice) = self.invoice_summary(payment.id).await? {
            return Ok(SessionInvoice {
                created: false,
                invoice: Some(invoice),
            });
        }

        self.payments.confirm(payment.id).await?;
        Ok(SessionInvoice {
            created: true,
            invoice: self.invoice_summary(payment.id).await?,
        })
    }
}
