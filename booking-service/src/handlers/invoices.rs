//! Invoices (`/api/factura`).

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{download_client, Data, Envelope, GenerateInvoiceRequest, InvoiceListParams};
use crate::middleware::RequestMeta;
use crate::models::{AuditAction, CurrentUser, InvoiceDetail};
use crate::services::invoice::{InvoiceFile, InvoiceFileInfo};
use crate::services::storage::StoredFile;
use crate::startup::AppState;

const TABLE: &str = "Factura";

fn file_response(file: InvoiceFile) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.file_name),
            ),
        ],
        file.bytes,
    )
        .into_response()
}

/// Issues the invoice of a payment for the given client and issuer.
pub async fn generate_invoice(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
    Json(payload): Json<GenerateInvoiceRequest>,
) -> Result<(StatusCode, Json<Envelope<Data<InvoiceDetail>>>), AppError> {
    payload.validate()?;

    let issuer = payload
        .datos_empresa
        .map(Into::into)
        .unwrap_or_else(|| state.invoices.default_issuer());
    let detail = state
        .invoices
        .generate(payment_id, payload.datos_cliente.into(), issuer)
        .await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, user.as_ref())
                .record(detail.invoice.id)
                .after(&detail.invoice),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(
            "Factura generada exitosamente",
            Data { data: detail },
        )),
    ))
}

/// Issues the invoice of a payment for the general public and the configured issuer.
pub async fn generate_automatic_invoice(
    State(state): State<AppState>,
    Path(payment_id): Path<i64>,
    meta: RequestMeta,
) -> Result<(StatusCode, Json<Envelope<Data<InvoiceDetail>>>), AppError> {
    let detail = state.invoices.generate_default(payment_id).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Create, TABLE, None)
                .record(detail.invoice.id)
                .after(&detail.invoice),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::ok(
            "Factura automática generada exitosamente",
            Data { data: detail },
        )),
    ))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<InvoiceListParams>,
) -> Result<Json<Vec<InvoiceDetail>>, AppError> {
    Ok(Json(state.invoices.list(params.skip, params.take).await?))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<InvoiceDetail>, AppError> {
    Ok(Json(state.invoices.get(id).await?))
}

/// Personalizes the invoice for the caller and streams the rendered document.
pub async fn download_invoice(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
) -> Result<Response, AppError> {
    let client = download_client(user.as_ref());
    tracing::info!(
        invoice_id = id,
        user_id = user.as_ref().map(|u| u.id.as_str()).unwrap_or("N/A"),
        "Downloading invoice"
    );

    let file = state.invoices.download(id, &client).await?;
    Ok(file_response(file))
}

pub async fn regenerate_invoice_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    user: Option<CurrentUser>,
    meta: RequestMeta,
) -> Result<Json<Envelope<Data<InvoiceDetail>>>, AppError> {
    let detail = state.invoices.rerender(id).await?;

    state
        .audit
        .record(
            meta.audit(AuditAction::Update, TABLE, user.as_ref())
                .record(id)
                .after(&detail.invoice),
        )
        .await;

    Ok(Json(Envelope::ok(
        "PDF regenerado exitosamente",
        Data { data: detail },
    )))
}

pub async fn list_stored_files(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredFile>>, AppError> {
    Ok(Json(state.invoices.file_report().await?))
}

pub async fn invoice_file_report(
    State(state): State<AppState>,
) -> Result<Json<Vec<InvoiceFileInfo>>, AppError> {
    Ok(Json(state.invoices.invoice_report().await?))
}

pub async fn download_stored_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let file = state.invoices.stored_file(&name).await?;
    Ok(file_response(file))
}
