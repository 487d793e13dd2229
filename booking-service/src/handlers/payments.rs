//! Reservation payments (`/api/pago-reserva`).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::str::FromStr;
use validator::Validate;

use crate::dtos::{
    ConfirmQrPaymentRequest, CreatePaymentRequest, Data, Envelope, UpdatePaymentRequest,
};
use crate::middleware::RequestMeta;
use crate::models::{AuditAction, CurrentUser, Payment, PaymentOverview};
use crate::services::payment::{PaymentStatusReport, QrPaymentConfirmation, QrPaymentInstructions};
use crate::startup::AppState;

const TABLE: &str = "PagoReserva";

pub async fn create_payment(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    payload.validate()?;

    let payment = state.payments.create(payload.into(), Some(&user)).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, Some(&user))
                .record(payment.id)
                .after(&payment),
        )
        .await;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_payments(
    State(state): State<AppState>,
) -> Result<Json<Vec<PaymentOverview>>, AppError> {
    Ok(Json(state.payments.list().await?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PaymentOverview>, AppError> {
    Ok(Json(state.payments.get(id).await?))
}

pub async fn update_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<UpdatePaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    payload.validate()?;

    let previous = state.payments.get(id).await?.payment;
    let payment = state.payments.update(id, payload.into()).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Update, TABLE, user.as_ref())
                .record(id)
                .before(&previous)
                .after(&payment),
        )
        .await;

    Ok(Json(payment))
}

pub async fn delete_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
) -> Result<Json<Payment>, AppError> {
    let payment = state.payments.delete(id).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Delete, TABLE, user.as_ref())
                .record(id)
                .before(&payment),
        )
        .await;

    Ok(Json(payment))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PaymentStatusReport>, AppError> {
    Ok(Json(state.payments.status(id).await?))
}

pub async fn payment_by_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<i64>,
) -> Result<Json<PaymentOverview>, AppError> {
    Ok(Json(state.payments.by_reservation(reservation_id).await?))
}

pub async fn create_automatic_payment(
    State(state): State<AppState>,
    Path((reservation_id, amount)): Path<(i64, String)>,
    meta: RequestMeta,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let amount = Decimal::from_str(amount.trim())
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Monto inválido: {}", e)))?;

    let payment = state
        .payments
        .create_automatic(reservation_id, amount)
        .await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, None)
                .record(payment.id)
                .after(&payment),
        )
        .await;

    Ok((StatusCode::CREATED, Json(payment)))
}

/// Accepts the payment and issues its invoice.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: CurrentUser,
    meta: RequestMeta,
) -> Result<Json<Envelope<Data<PaymentOverview>>>, AppError> {
    tracing::info!(payment_id = id, user_id = %user.id, "Confirming payment");
    let overview = state.payments.confirm(id).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Confirm, TABLE, Some(&user))
                .record(id)
                .after(&overview.payment),
        )
        .await;

    Ok(Json(Envelope::ok(
        "Pago confirmado exitosamente",
        Data { data: overview },
    )))
}

pub async fn generate_qr_payment(
    State(state): State<AppState>,
    Path(reservation_id): Path<i64>,
    user: CurrentUser,
    meta: RequestMeta,
) -> Result<(StatusCode, Json<Envelope<Data<QrPaymentInstructions>>>), AppError> {
    let instructions = state
        .payments
        .generate_qr_payment(reservation_id, &user)
        .await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, Some(&user))
                .record(instructions.payment_id)
                .after(&instructions),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(
            "Pago QR generado exitosamente",
            Data { data: instructions },
        )),
    ))
}

pub async fn confirm_qr_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
    user: CurrentUser,
    meta: RequestMeta,
    payload: Option<Json<ConfirmQrPaymentRequest>>,
) -> Result<Json<Envelope<Data<QrPaymentConfirmation>>>, AppError> {
    let Json(payload) = payload.unwrap_or_default();
    payload.validate()?;

    let confirmation = state
        .payments
        .confirm_qr_payment(payment_id, payload.referencia_pago.as_deref())
        .await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Confirm, TABLE, Some(&user))
                .record(payment_id)
                .after(&confirmation),
        )
        .await;

    Ok(Json(Envelope::ok(
        "Pago QR confirmado exitosamente",
        Data { data: confirmation },
    )))
}
