//! Reservation confirmations (`/api/confirmacion`).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CreateConfirmationRequest, UpdateConfirmationRequest};
use crate::middleware::RequestMeta;
use crate::models::{AuditAction, Confirmation, CurrentUser, NewConfirmation, VerificationStatus};
use crate::startup::AppState;

const TABLE: &str = "Confirmacion";

fn not_found(id: i64) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Confirmación {} no encontrada", id))
}

async fn find(state: &AppState, id: i64) -> Result<Confirmation, AppError> {
    state
        .repo
        .find_confirmation(id)
        .await?
        .ok_or_else(|| not_found(id))
}

pub async fn create_confirmation(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<CreateConfirmationRequest>,
) -> Result<(StatusCode, Json<Confirmation>), AppError> {
    payload.validate()?;

    if state
        .repo
        .find_reservation(payload.reservation_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Reserva {} no encontrada",
            payload.reservation_id
        )));
    }

    let confirmation = state
        .repo
        .create_confirmation(NewConfirmation {
            reservation_id: payload.reservation_id,
            qr_code: payload.codigo_qr,
            issued_at: payload.fecha.unwrap_or_else(Utc::now),
            status: payload.verificada.unwrap_or(VerificationStatus::Pending),
        })
        .await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, user.as_ref())
                .record(confirmation.id)
                .after(&confirmation),
        )
        .await;

    Ok((StatusCode::CREATED, Json(confirmation)))
}

pub async fn list_confirmations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Confirmation>>, AppError> {
    Ok(Json(state.repo.list_confirmations().await?))
}

pub async fn get_confirmation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Confirmation>, AppError> {
    Ok(Json(find(&state, id).await?))
}

pub async fn update_confirmation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<UpdateConfirmationRequest>,
) -> Result<Json<Confirmation>, AppError> {
    payload.validate()?;

    let previous = find(&state, id).await?;
    let confirmation = state
        .repo
        .update_confirmation(id, payload.into())
        .await?
        .ok_or_else(|| not_found(id))?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Update, TABLE, user.as_ref())
                .record(id)
                .before(&previous)
                .after(&confirmation),
        )
        .await;

    Ok(Json(confirmation))
}

pub async fn delete_confirmation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
) -> Result<Json<Confirmation>, AppError> {
    let confirmation = find(&state, id).await?;
    if !state.repo.delete_confirmation(id).await? {
        return Err(not_found(id));
    }

    state
        .audit
        .record(
            meta.audit(AuditAction::Delete, TABLE, user.as_ref())
                .record(id)
                .before(&confirmation),
        )
        .await;

    Ok(Json(confirmation))
}

async fn set_status(
    state: &AppState,
    id: i64,
    status: VerificationStatus,
    user: Option<&CurrentUser>,
    meta: &RequestMeta,
) -> Result<Confirmation, AppError> {
    let previous = find(state, id).await?;
    let confirmation = state
        .repo
        .set_confirmation_status(id, status)
        .await?
        .ok_or_else(|| not_found(id))?;
    tracing::info!(confirmation_id = id, status = ?status, "Confirmation status changed");

    state
        .audit
        .record(
            meta.audit(AuditAction::Update, TABLE, user)
                .record(id)
                .before(&previous)
                .after(&confirmation),
        )
        .await;

    Ok(confirmation)
}

pub async fn verify_confirmation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
) -> Result<Json<Confirmation>, AppError> {
    let confirmation =
        set_status(&state, id, VerificationStatus::Accepted, user.as_ref(), &meta).await?;
    Ok(Json(confirmation))
}

pub async fn cancel_confirmation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
) -> Result<Json<Confirmation>, AppError> {
    let confirmation =
        set_status(&state, id, VerificationStatus::Cancelled, user.as_ref(), &meta).await?;
    Ok(Json(confirmation))
}
