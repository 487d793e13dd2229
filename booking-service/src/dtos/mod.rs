//! Request bodies and query parameters, validated with `validator` before they reach the
//! services.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{
    AreaChanges, BlockChanges, ClientInfo, ConfirmationChanges, CurrentUser, IssuerInfo, NewArea,
    NewBlock, NewPayment, PaymentChanges, PaymentStatus, ReservationStatus, VerificationStatus,
};
use crate::services::reservation::{ReservationRequest, ReservationUpdate};

fn non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() {
        return Err(ValidationError::new("non_negative")
            .with_message("El valor no puede ser negativo".into()));
    }
    Ok(())
}

fn positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("positive")
            .with_message("El monto debe ser mayor a cero".into()));
    }
    Ok(())
}

fn ordered_window(
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    match (starts_at, ends_at) {
        (Some(start), Some(end)) if end <= start => Err(ValidationError::new("window")
            .with_message("La fecha de fin debe ser posterior a la de inicio".into())),
        _ => Ok(()),
    }
}

// Areas

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAreaRequest {
    #[validate(length(min = 1, max = 120, message = "El nombre es requerido"))]
    pub nombre: String,
    #[validate(length(max = 1000))]
    pub descripcion: Option<String>,
    #[validate(range(min = 1, message = "La capacidad debe ser al menos 1"))]
    pub capacidad: i32,
    #[serde(rename = "costoHora")]
    #[validate(custom(function = "non_negative"))]
    pub costo_hora: Decimal,
    pub activa: Option<bool>,
}

impl From<CreateAreaRequest> for NewArea {
    fn from(req: CreateAreaRequest) -> Self {
        Self {
            name: req.nombre,
            description: req.descripcion,
            capacity: req.capacidad,
            hourly_rate: req.costo_hora,
            active: req.activa.unwrap_or(true),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAreaRequest {
    #[validate(length(min = 1, max = 120))]
    pub nombre: Option<String>,
    #[validate(length(max = 1000))]
    pub descripcion: Option<String>,
    #[validate(range(min = 1))]
    pub capacidad: Option<i32>,
    #[serde(rename = "costoHora")]
    #[validate(custom(function = "non_negative"))]
    pub costo_hora: Option<Decimal>,
    pub activa: Option<bool>,
}

impl From<UpdateAreaRequest> for AreaChanges {
    fn from(req: UpdateAreaRequest) -> Self {
        Self {
            name: req.nombre,
            description: req.descripcion,
            capacity: req.capacidad,
            hourly_rate: req.costo_hora,
            active: req.activa,
        }
    }
}

// Blocks

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_block_window"))]
pub struct CreateBlockRequest {
    #[serde(rename = "areaId")]
    #[validate(range(min = 1))]
    pub area_id: i64,
    pub inicio: DateTime<Utc>,
    pub fin: DateTime<Utc>,
    #[validate(length(max = 500))]
    pub motivo: Option<String>,
}

fn validate_block_window(req: &CreateBlockRequest) -> Result<(), ValidationError> {
    ordered_window(Some(req.inicio), Some(req.fin))
}

impl From<CreateBlockRequest> for NewBlock {
    fn from(req: CreateBlockRequest) -> Self {
        Self {
            area_id: req.area_id,
            starts_at: req.inicio,
            ends_at: req.fin,
            reason: req.motivo,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_block_update_window"))]
pub struct UpdateBlockRequest {
    #[serde(rename = "areaId")]
    #[validate(range(min = 1))]
    pub area_id: Option<i64>,
    pub inicio: Option<DateTime<Utc>>,
    pub fin: Option<DateTime<Utc>>,
    #[validate(length(max = 500))]
    pub motivo: Option<String>,
}

fn validate_block_update_window(req: &UpdateBlockRequest) -> Result<(), ValidationError> {
    ordered_window(req.inicio, req.fin)
}

impl From<UpdateBlockRequest> for BlockChanges {
    fn from(req: UpdateBlockRequest) -> Self {
        Self {
            area_id: req.area_id,
            starts_at: req.inicio,
            ends_at: req.fin,
            reason: req.motivo,
        }
    }
}

// Confirmations

#[derive(Debug, Deserialize, Validate)]
pub struct CreateConfirmationRequest {
    #[serde(rename = "reservaId")]
    #[validate(range(min = 1))]
    pub reservation_id: i64,
    #[serde(rename = "codigoQr")]
    #[validate(length(min = 1, max = 255, message = "El código QR es requerido"))]
    pub codigo_qr: String,
    pub fecha: Option<DateTime<Utc>>,
    pub verificada: Option<VerificationStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateConfirmationRequest {
    #[serde(rename = "codigoQr")]
    #[validate(length(min = 1, max = 255))]
    pub codigo_qr: Option<String>,
    pub fecha: Option<DateTime<Utc>>,
    pub verificada: Option<VerificationStatus>,
}

impl From<UpdateConfirmationRequest> for ConfirmationChanges {
    fn from(req: UpdateConfirmationRequest) -> Self {
        Self {
            qr_code: req.codigo_qr,
            issued_at: req.fecha,
            status: req.verificada,
        }
    }
}

// Reservations

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_reservation_window"))]
pub struct CreateReservationRequest {
    #[serde(rename = "areaId")]
    #[validate(range(min = 1))]
    pub area_id: i64,
    pub inicio: DateTime<Utc>,
    pub fin: DateTime<Utc>,
    #[validate(custom(function = "non_negative"))]
    pub costo: Option<Decimal>,
    pub estado: Option<ReservationStatus>,
}

fn validate_reservation_window(req: &CreateReservationRequest) -> Result<(), ValidationError> {
    ordered_window(Some(req.inicio), Some(req.fin))
}

impl From<CreateReservationRequest> for ReservationRequest {
    fn from(req: CreateReservationRequest) -> Self {
        Self {
            area_id: req.area_id,
            starts_at: req.inicio,
            ends_at: req.fin,
            cost: req.costo,
            status: req.estado,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_reservation_update_window"))]
pub struct UpdateReservationRequest {
    #[serde(rename = "areaId")]
    #[validate(range(min = 1))]
    pub area_id: Option<i64>,
    pub inicio: Option<DateTime<Utc>>,
    pub fin: Option<DateTime<Utc>>,
    #[validate(custom(function = "non_negative"))]
    pub costo: Option<Decimal>,
    pub estado: Option<ReservationStatus>,
}

fn validate_reservation_update_window(
    req: &UpdateReservationRequest,
) -> Result<(), ValidationError> {
    ordered_window(req.inicio, req.fin)
}

impl From<UpdateReservationRequest> for ReservationUpdate {
    fn from(req: UpdateReservationRequest) -> Self {
        Self {
            area_id: req.area_id,
            starts_at: req.inicio,
            ends_at: req.fin,
            cost: req.costo,
            status: req.estado,
        }
    }
}

// Payments

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[serde(rename = "reservaId")]
    #[validate(range(min = 1))]
    pub reservation_id: i64,
    #[serde(rename = "metodo", alias = "metodoPago")]
    #[validate(length(min = 1, max = 50, message = "El método de pago es requerido"))]
    pub metodo: String,
    #[validate(custom(function = "positive"))]
    pub monto: Decimal,
    #[validate(length(max = 255))]
    pub referencia: Option<String>,
    #[serde(rename = "codigoQr")]
    pub codigo_qr: Option<String>,
    #[serde(rename = "urlQr")]
    pub url_qr: Option<String>,
}

impl From<CreatePaymentRequest> for NewPayment {
    fn from(req: CreatePaymentRequest) -> Self {
        Self {
            reservation_id: req.reservation_id,
            method: req.metodo,
            amount: req.monto,
            status: PaymentStatus::Pending,
            transaction_id: None,
            reference: req.referencia,
            qr_code: req.codigo_qr,
            qr_url: req.url_qr,
            user_id: None,
            user_name: None,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePaymentRequest {
    #[serde(rename = "metodo", alias = "metodoPago")]
    #[validate(length(min = 1, max = 50))]
    pub metodo: Option<String>,
    #[validate(custom(function = "positive"))]
    pub monto: Option<Decimal>,
    #[validate(length(max = 255))]
    pub referencia: Option<String>,
    #[serde(rename = "codigoQr")]
    pub codigo_qr: Option<String>,
    #[serde(rename = "urlQr")]
    pub url_qr: Option<String>,
    #[serde(rename = "transaccionId")]
    pub transaccion_id: Option<String>,
}

impl From<UpdatePaymentRequest> for PaymentChanges {
    fn from(req: UpdatePaymentRequest) -> Self {
        Self {
            method: req.metodo,
            amount: req.monto,
            reference: req.referencia,
            qr_code: req.codigo_qr,
            qr_url: req.url_qr,
            transaction_id: req.transaccion_id,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ConfirmQrPaymentRequest {
    #[serde(rename = "referenciaPago")]
    #[validate(length(max = 255))]
    pub referencia_pago: Option<String>,
}

// Invoices

#[derive(Debug, Deserialize, Validate)]
pub struct ClientData {
    #[validate(length(min = 1, max = 200, message = "El nombre del cliente es requerido"))]
    pub nombre: String,
    #[validate(email(message = "Email inválido"))]
    pub email: Option<String>,
    #[validate(length(max = 20))]
    pub documento: Option<String>,
    #[validate(length(max = 10))]
    pub complemento: Option<String>,
}

impl From<ClientData> for ClientInfo {
    fn from(data: ClientData) -> Self {
        let defaults = ClientInfo::general_public();
        Self {
            name: data.nombre,
            email: data.email.unwrap_or(defaults.email),
            document: data.documento.unwrap_or(defaults.document),
            complement: data.complemento.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct IssuerData {
    #[validate(length(min = 1, max = 20))]
    pub nit: String,
    #[serde(rename = "razonSocial")]
    #[validate(length(min = 1, max = 200))]
    pub razon_social: String,
    #[serde(rename = "numeroAutorizacion")]
    #[validate(length(min = 1, max = 50))]
    pub numero_autorizacion: String,
    pub direccion: String,
    pub telefono: Option<String>,
    pub sucursal: Option<String>,
    pub municipio: String,
    #[serde(rename = "actividadEconomica")]
    pub actividad_economica: String,
}

impl From<IssuerData> for IssuerInfo {
    fn from(data: IssuerData) -> Self {
        Self {
            nit: data.nit,
            legal_name: data.razon_social,
            authorization_number: data.numero_autorizacion,
            address: data.direccion,
            phone: data.telefono.unwrap_or_default(),
            branch: data.sucursal.unwrap_or_else(|| "Casa Matriz".to_string()),
            municipality: data.municipio,
            economic_activity: data.actividad_economica,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateInvoiceRequest {
    #[serde(rename = "datosCliente")]
    #[validate(nested)]
    pub datos_cliente: ClientData,
    /// Configured issuer when absent.
    #[serde(rename = "datosEmpresa")]
    #[validate(nested)]
    pub datos_empresa: Option<IssuerData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListParams {
    pub skip: Option<i64>,
    pub take: Option<i64>,
}

/// Client identity printed on a downloaded invoice: the caller when known, else the
/// general public.
pub fn download_client(user: Option<&CurrentUser>) -> ClientInfo {
    let defaults = ClientInfo::general_public();
    match user {
        Some(user) => ClientInfo {
            name: if user.name.trim().is_empty() {
                defaults.name
            } else {
                user.name.clone()
            },
            email: user.email.clone().unwrap_or(defaults.email),
            document: String::new(),
            complement: String::new(),
        },
        None => ClientInfo {
            name: defaults.name,
            email: defaults.email,
            document: String::new(),
            complement: String::new(),
        },
    }
}

// Stripe

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCheckoutRequest {
    #[serde(rename = "reservaId")]
    #[validate(range(min = 1))]
    pub reservation_id: i64,
    #[validate(custom(function = "positive"))]
    pub monto: Option<Decimal>,
    #[validate(length(min = 1, max = 500, message = "La descripción es requerida"))]
    pub descripcion: String,
}

// Audit

/// Workflow responses: `{ "success": true, "message": ..., <data> }`.
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

/// Wraps a payload under a `data` key inside an [`Envelope`].
#[derive(Debug, Serialize)]
pub struct Data<T: Serialize> {
    pub data: T,
}
