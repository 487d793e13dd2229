//! Reservations (`/api/reserva`).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CreateReservationRequest, Envelope, UpdateReservationRequest};
use crate::middleware::RequestMeta;
use crate::models::{AuditAction, CurrentUser, Reservation, ReservationBundle, ReservationDetail};
use crate::services::repository::AreaIncome;
use crate::services::reservation::{ReservationWithInvoice, StripeReservation};
use crate::startup::AppState;

const TABLE: &str = "Reserva";

/// Creates the reservation with its pending confirmation and payment.
pub async fn create_reservation(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Json(payload): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationBundle>), AppError> {
    payload.validate()?;
    tracing::info!(user_id = %user.id, area_id = payload.area_id, "Creating reservation");

    let bundle = state.reservations.create(payload.into(), &user).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, Some(&user))
                .record(bundle.reservation.id)
                .after(&bundle),
        )
        .await;

    Ok((StatusCode::CREATED, Json(bundle)))
}

pub async fn create_reservation_with_stripe(
    State(state): State<AppState>,
    user: CurrentUser,
    meta: RequestMeta,
    Json(payload): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<Envelope<StripeReservation>>), AppError> {
    payload.validate()?;

    let created = state
        .reservations
        .create_with_stripe(payload.into(), &user)
        .await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::CreateCheckoutSession, TABLE, Some(&user))
                .record(created.bundle.reservation.id)
                .after(&created),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(
            "Reserva creada. Complete el pago en Stripe",
            created,
        )),
    ))
}

pub async fn list_reservations(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<ReservationDetail>>, AppError> {
    Ok(Json(state.reservations.list(&user).await?))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ReservationDetail>, AppError> {
    Ok(Json(state.reservations.get(id).await?))
}

pub async fn get_reservation_with_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: CurrentUser,
) -> Result<Json<ReservationWithInvoice>, AppError> {
    Ok(Json(state.reservations.get_with_invoice(id, &user).await?))
}

pub async fn update_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<UpdateReservationRequest>,
) -> Result<Json<Reservation>, AppError> {
    payload.validate()?;

    let previous = state.reservations.get(id).await?.reservation;
    let reservation = state.reservations.update(id, payload.into()).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Update, TABLE, user.as_ref())
                .record(id)
                .before(&previous)
                .after(&reservation),
        )
        .await;

    Ok(Json(reservation))
}

/// Removes the reservation with its confirmation, payments and invoices.
pub async fn delete_reservation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: CurrentUser,
    meta: RequestMeta,
) -> Result<Json<Reservation>, AppError> {
    let reservation = state.reservations.remove_with_cascade(id).await?;
    tracing::info!(reservation_id = id, user_id = %user.id, "Reservation deleted");

    state
        .audit
        .record(
            meta.audit(AuditAction::Delete, TABLE, Some(&user))
                .record(id)
                .before(&reservation),
        )
        .await;

    Ok(Json(reservation))
}

pub async fn income_report(
    State(state): State<AppState>,
) -> Result<Json<Vec<AreaIncome>>, AppError> {
    Ok(Json(state.reservations.income_report().await?))
}
