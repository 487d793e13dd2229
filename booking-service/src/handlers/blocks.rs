//! Area blocks (`/api/bloqueo`).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CreateBlockRequest, UpdateBlockRequest};
use crate::middleware::RequestMeta;
use crate::models::{AuditAction, Block, BlockChanges, BlockDetail, CurrentUser};
use crate::startup::AppState;

const TABLE: &str = "Bloqueo";

fn not_found(id: i64) -> AppError {
    AppError::NotFound(anyhow::anyhow!("Bloqueo {} no encontrado", id))
}

async fn ensure_area(state: &AppState, area_id: i64) -> Result<(), AppError> {
    match state.repo.find_area(area_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(anyhow::anyhow!(
            "Área común {} no encontrada",
            area_id
        ))),
    }
}

async fn detail(state: &AppState, block: Block) -> Result<BlockDetail, AppError> {
    let area = state.repo.find_area(block.area_id).await?;
    Ok(BlockDetail { block, area })
}

pub async fn create_block(
    State(state): State<AppState>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<CreateBlockRequest>,
) -> Result<(StatusCode, Json<Block>), AppError> {
    payload.validate()?;
    ensure_area(&state, payload.area_id).await?;

    let block = state.repo.create_block(payload.into()).await?;
    tracing::info!(block_id = block.id, area_id = block.area_id, "Block created");

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, user.as_ref())
                .record(block.id)
                .after(&block),
        )
        .await;

    Ok((StatusCode::CREATED, Json(block)))
}

pub async fn list_blocks(
    State(state): State<AppState>,
) -> Result<Json<Vec<BlockDetail>>, AppError> {
    let blocks = state.repo.list_blocks().await?;
    let mut details = Vec::with_capacity(blocks.len());
    for block in blocks {
        details.push(detail(&state, block).await?);
    }
    Ok(Json(details))
}

pub async fn get_block(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BlockDetail>, AppError> {
    let block = state.repo.find_block(id).await?.ok_or_else(|| not_found(id))?;
    Ok(Json(detail(&state, block).await?))
}

pub async fn update_block(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<UpdateBlockRequest>,
) -> Result<Json<Block>, AppError> {
    payload.validate()?;

    let previous = state.repo.find_block(id).await?.ok_or_else(|| not_found(id))?;
    if let Some(area_id) = payload.area_id {
        ensure_area(&state, area_id).await?;
    }

    let mut candidate = previous.clone();
    let changes: BlockChanges = payload.into();
    candidate.apply(changes.clone());
    if candidate.ends_at <= candidate.starts_at {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "La fecha de fin debe ser posterior a la de inicio"
        )));
    }

    let block = state
        .repo
        .update_block(id, changes)
        .await?
        .ok_or_else(|| not_found(id))?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Update, TABLE, user.as_ref())
                .record(id)
                .before(&previous)
                .after(&block),
        )
        .await;

    Ok(Json(block))
}

pub async fn delete_block(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
) -> Result<Json<Block>, AppError> {
    let block = state.repo.find_block(id).await?.ok_or_else(|| not_found(id))?;
    if !state.repo.delete_block(id).await? {
        return Err(not_found(id));
    }

    state
        .audit
        .record(
            meta.audit(AuditAction::Delete, TABLE, user.as_ref())
                .record(id)
                .before(&block),
        )
        .await;

    Ok(Json(block))
}
