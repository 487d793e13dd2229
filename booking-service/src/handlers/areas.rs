//! Common areas (`/api/booking`).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CreateAreaRequest, UpdateAreaRequest};
use crate::middleware::RequestMeta;
use crate::models::{Area, AuditAction, CurrentUser};
use crate::startup::AppState;

const TABLE: &str = "AreaComun";

async fn find(state: &AppState, id: i64) -> Result<Area, AppError> {
    state
        .repo
        .find_area(id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Área común {} no encontrada", id)))
}

pub async fn create_area(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<CreateAreaRequest>,
) -> Result<(StatusCode, Json<Area>), AppError> {
    payload.validate()?;

    let area = state.repo.create_area(payload.into()).await?;
    tracing::info!(area_id = area.id, name = %area.name, "Area created");

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, user.as_ref())
                .record(area.id)
                .after(&area),
        )
        .await;

    Ok((StatusCode::CREATED, Json(area)))
}

pub async fn list_areas(State(state): State<AppState>) -> Result<Json<Vec<Area>>, AppError> {
    Ok(Json(state.repo.list_areas().await?))
}

pub async fn get_area(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Area>, AppError> {
    Ok(Json(find(&state, id).await?))
}

pub async fn update_area(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<UpdateAreaRequest>,
) -> Result<Json<Area>, AppError> {
    payload.validate()?;

    let previous = find(&state, id).await?;
    let area = state
        .repo
        .update_area(id, payload.into())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Área común {} no encontrada", id)))?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Update, TABLE, user.as_ref())
                .record(id)
                .before(&previous)
                .after(&area),
        )
        .await;

    Ok(Json(area))
}

pub async fn delete_area(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
) -> Result<Json<Area>, AppError> {
    let area = find(&state, id).await?;
    if !state.repo.delete_area(id).await? {
        return Err(AppError::NotFound(anyhow::anyhow!(
            "Área común {} no encontrada",
            id
        )));
    }
    tracing::info!(area_id = id, "Area deleted");

    state
        .audit
        .record(
            meta.audit(AuditAction::Delete, TABLE, user.as_ref())
                .record(id)
                .before(&area),
        )
        .await;

    Ok(Json(area))
}
