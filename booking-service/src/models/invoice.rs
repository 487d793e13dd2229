//! Bolivian fiscal invoices (facturas).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// GENERADA: row persisted, file not yet rendered. ENVIADA: file rendered and hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum InvoiceStatus {
    #[sqlx(rename = "GENERADA")]
    #[serde(rename = "GENERADA")]
    Generated,
    #[sqlx(rename = "ENVIADA")]
    #[serde(rename = "ENVIADA")]
    Sent,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generated => "GENERADA",
            Self::Sent => "ENVIADA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    #[serde(rename = "numeroFactura")]
    pub number: String,
    #[serde(rename = "pagoReservaId")]
    pub payment_id: i64,

    #[serde(rename = "nitEmisor")]
    pub issuer_nit: String,
    #[serde(rename = "razonSocialEmisor")]
    pub issuer_legal_name: String,
    #[serde(rename = "numeroAutorizacion")]
    pub authorization_number: String,
    #[serde(rename = "direccionEmisor")]
    pub issuer_address: String,
    #[serde(rename = "telefonoEmisor")]
    pub issuer_phone: String,
    #[serde(rename = "sucursal")]
    pub branch: String,
    #[serde(rename = "municipio")]
    pub municipality: String,
    #[serde(rename = "actividadEconomica")]
    pub economic_activity: String,

    #[serde(rename = "nombreCliente")]
    pub client_name: String,
    #[serde(rename = "emailCliente")]
    pub client_email: String,
    #[serde(rename = "documentoCliente")]
    pub client_document: String,
    #[serde(rename = "complementoCliente")]
    pub client_complement: String,

    #[serde(rename = "codigoControl")]
    pub control_code: String,
    #[serde(rename = "fechaEmision")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "fechaLimiteEmision")]
    pub issue_deadline: DateTime<Utc>,

    pub subtotal: Decimal,
    #[serde(rename = "descuento")]
    pub discount: Decimal,
    #[serde(rename = "montoGiftCard")]
    pub gift_card_amount: Decimal,
    pub total: Decimal,
    #[serde(rename = "moneda")]
    pub currency: String,
    #[serde(rename = "tipoCambio")]
    pub exchange_rate: Decimal,
    #[serde(rename = "leyenda")]
    pub legend: String,

    #[serde(rename = "qrFiscal")]
    pub qr_data_url: Option<String>,
    #[serde(rename = "urlVerificacion")]
    pub verification_url: Option<String>,
    #[serde(rename = "rutaPdf")]
    pub file_path: Option<String>,
    #[serde(rename = "hashArchivo")]
    pub file_hash: Option<String>,

    #[serde(rename = "usuario")]
    pub created_by: String,
    #[serde(rename = "estado")]
    pub status: InvoiceStatus,
    #[serde(rename = "creadoEn")]
    pub created_at: DateTime<Utc>,
}

/// Columns written when the invoice row is first inserted.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub number: String,
    pub payment_id: i64,
    pub issuer: IssuerInfo,
    pub client: ClientInfo,
    pub control_code: String,
    pub issued_at: DateTime<Utc>,
    pub issue_deadline: DateTime<Utc>,
    pub amount: Decimal,
    pub currency: String,
    pub legend: String,
    pub created_by: String,
}

/// Identity of the buyer printed on the invoice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "documento", default)]
    pub document: String,
    #[serde(rename = "complemento", default)]
    pub complement: String,
}

impl ClientInfo {
    /// Placeholder buyer used when an invoice is generated without a known requester.
    pub fn general_public() -> Self {
        Self {
            name: "Cliente General".to_string(),
            email: "cliente@citylights.com".to_string(),
            document: "0000000".to_string(),
            complement: String::new(),
        }
    }

    /// Fields present and non-blank in `fresh` replace the current ones.
    pub fn overlay(&self, fresh: &ClientInfo) -> ClientInfo {
        fn pick(fresh: &str, current: &str) -> String {
            if fresh.trim().is_empty() {
                current.to_string()
            } else {
                fresh.trim().to_string()
            }
        }

        ClientInfo {
            name: pick(&fresh.name, &self.name),
            email: pick(&fresh.email, &self.email),
            document: pick(&fresh.document, &self.document),
            complement: pick(&fresh.complement, &self.complement),
        }
    }
}

/// Fiscal identity of the issuing company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerInfo {
    #[serde(rename = "nit")]
    pub nit: String,
    #[serde(rename = "razonSocial")]
    pub legal_name: String,
    #[serde(rename = "numeroAutorizacion")]
    pub authorization_number: String,
    #[serde(rename = "direccion", default)]
    pub address: String,
    #[serde(rename = "telefono", default)]
    pub phone: String,
    #[serde(rename = "sucursal", default)]
    pub branch: String,
    #[serde(rename = "municipio", default)]
    pub municipality: String,
    #[serde(rename = "actividadEconomica", default)]
    pub economic_activity: String,
}

impl Invoice {
    pub fn client(&self) -> ClientInfo {
        ClientInfo {
            name: self.client_name.clone(),
            email: self.client_email.clone(),
            document: self.client_document.clone(),
            complement: self.client_complement.clone(),
        }
    }

    pub fn set_client(&mut self, client: &ClientInfo) {
        self.client_name = client.name.clone();
        self.client_email = client.email.clone();
        self.client_document = client.document.clone();
        self.client_complement = client.complement.clone();
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .and_then(|p| std::path::Path::new(p).file_name())
            .and_then(|n| n.to_str())
    }
}
