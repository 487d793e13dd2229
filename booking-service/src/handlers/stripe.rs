//! Stripe Checkout endpoints (`/api/stripe`).
//!
//! The webhook is authenticated by its `Stripe-Signature` header, not by a caller identity,
//! so it reads the raw body before any JSON parsing.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CreateCheckoutRequest, Envelope};
use crate::middleware::RequestMeta;
use crate::models::{AuditAction, CurrentUser};
use crate::services::checkout::{CheckoutStarted, SessionInvoice, SessionVerification};
use crate::startup::AppState;

const TABLE: &str = "StripeCheckout";
const SIGNATURE_HEADER: &str = "stripe-signature";

pub async fn create_checkout_session(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Json(payload): Json<CreateCheckoutRequest>,
) -> Result<(StatusCode, Json<Envelope<CheckoutStarted>>), AppError> {
    payload.validate()?;
    tracing::info!(
        reservation_id = payload.reservation_id,
        user_id = %user.id,
        "Creating Stripe checkout session"
    );

    let started = state
        .checkout
        .create_session(
            payload.reservation_id,
            payload.monto,
            &payload.descripcion,
            &user,
        )
        .await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::CreateCheckoutSession, TABLE, Some(&user))
                .record(&started.session_id)
                .after(&started),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok("Sesión de pago creada exitosamente", started)),
    ))
}

pub async fn verify_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    _user: CurrentUser,
) -> Result<Json<Envelope<SessionVerification>>, AppError> {
    let verification = state.checkout.verify_session(&session_id).await?;
    Ok(Json(Envelope::ok("Sesión verificada", verification)))
}

/// Signed webhook. Responds 2xx only once the event is handled, so Stripe retries failures.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.checkout.handle_webhook(&body, signature).await?;
    tracing::debug!(outcome = outcome.as_str(), "Webhook handled");

    Ok(Json(json!({ "received": true })))
}

pub async fn generate_session_invoice(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    user: CurrentUser,
    meta: RequestMeta,
) -> Result<Json<Envelope<SessionInvoice>>, AppError> {
    let result = state.checkout.ensure_invoice(&session_id).await?;

    if result.created {
        state
            .audit
            .record(
                meta.audit(AuditAction::Create, "Factura", Some(&user))
                    .record(&session_id)
                    .after(&result),
            )
            .await;
    }

    let message = if result.created {
        "Factura generada exitosamente"
    } else {
        "La factura ya existía"
    };
    Ok(Json(Envelope::ok(message, result)))
}
