//! Fiscal QR payloads and their encodings.

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, Luma};
use qrcode::{Color, EcLevel, QrCode};
use std::io::Cursor;

use crate::models::Invoice;

/// Minimum rendered width of the PNG, in pixels.
const QR_MIN_WIDTH: u32 = 200;

/// `nit|numero|autorizacion|YYYY-MM-DD|total|codigoControl`.
pub fn fiscal_payload(invoice: &Invoice) -> String {
    [
        invoice.issuer_nit.clone(),
        invoice.number.clone(),
        invoice.authorization_number.clone(),
        invoice.issued_at.format("%Y-%m-%d").to_string(),
        format!("{:.2}", invoice.total),
        invoice.control_code.clone(),
    ]
    .join("|")
}

fn encode(data: &str) -> Result<QrCode> {
    Ok(QrCode::with_error_correction_level(data, EcLevel::M)?)
}

/// QR code as a `data:image/png;base64,...` URL.
pub fn png_data_url(data: &str) -> Result<String> {
    let code = encode(data)?;
    let image = code
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(QR_MIN_WIDTH, QR_MIN_WIDTH)
        .build();

    let dynamic_image = DynamicImage::ImageLuma8(image);
    let mut buffer = Cursor::new(Vec::new());
    dynamic_image.write_to(&mut buffer, image::ImageOutputFormat::Png)?;

    Ok(format!(
        "data:image/png;base64,{}",
        general_purpose::STANDARD.encode(buffer.get_ref())
    ))
}

/// Square module matrix (true = dark), row-major, without quiet zone.
#[derive(Debug, Clone)]
pub struct QrModules {
    pub width: usize,
    pub dark: Vec<bool>,
}

impl QrModules {
    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.dark[y * self.width + x]
    }
}

pub fn qr_modules(data: &str) -> Result<QrModules> {
    let code = encode(data)?;
    let width = code.width();
    let dark = code
        .to_colors()
        .into_iter()
        .map(|c| c == Color::Dark)
        .collect();
    Ok(QrModules { width, dark })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::InvoiceStatus;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    pub(crate) fn sample_invoice() -> Invoice {
        let issued = Utc.with_ymd_and_hms(2024, 1, 1, 15, 30, 0).unwrap();
        Invoice {
            id: 1,
            number: "FAC-00000001".to_string(),
            payment_id: 1,
            issuer_nit: "1234567890123".to_string(),
            issuer_legal_name: "CITYLIGHTS S.R.L.".to_string(),
            authorization_number: "29040011007".to_string(),
            issuer_address: "Av. Principal #123".to_string(),
            issuer_phone: "+591 2 2345678".to_string(),
            branch: "Casa Matriz".to_string(),
            municipality: "La Paz".to_string(),
            economic_activity: "631200".to_string(),
            client_name: "Cliente General".to_string(),
            client_email: "cliente@citylights.com".to_string(),
            client_document: "0000000".to_string(),
            client_complement: String::new(),
            control_code: "0123456789ABCDEF".to_string(),
            issued_at: issued,
            issue_deadline: issued + chrono::Duration::days(365),
            subtotal: Decimal::from(100),
            discount: Decimal::ZERO,
            gift_card_amount: Decimal::ZERO,
            total: Decimal::from(100),
            currency: "BOB".to_string(),
            exchange_rate: Decimal::ONE,
            legend: "Ley N° 453".to_string(),
            qr_data_url: None,
            verification_url: None,
            file_path: None,
            file_hash: None,
            created_by: "SISTEMA".to_string(),
            status: InvoiceStatus::Generated,
            created_at: issued,
        }
    }

    #[test]
    fn payload_fields_are_in_fiscal_order() {
        let payload = fiscal_payload(&sample_invoice());
        assert_eq!(
            payload,
            "1234567890123|FAC-00000001|29040011007|2024-01-01|100.00|0123456789ABCDEF"
        );
    }

    #[test]
    fn data_url_is_base64_png() {
        let url = png_data_url("1234567890123|FAC-00000001").unwrap();
        let encoded = url.strip_prefix("data:image/png;base64,").unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn module_matrix_is_square() {
        let modules = qr_modules(&fiscal_payload(&sample_invoice())).unwrap();
        assert!(modules.width >= 21);
        assert_eq!(modules.dark.len(), modules.width * modules.width);
        // Finder pattern corner is always dark.
        assert!(modules.is_dark(0, 0));
    }
}
