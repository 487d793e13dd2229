//! Audit trail query (`/api/auditoria/logs`), restricted to administrators by a route layer.

use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::models::{AuditEntry, AuditFilter};
use crate::startup::AppState;

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    Ok(Json(state.audit.logs(&filter).await?))
}
