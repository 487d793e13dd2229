//! Invoice document rendering.
//!
//! [`DocumentRenderer`] is the capability the invoice pipeline depends on;
//! [`PdfInvoiceRenderer`] draws a single A4 page with vector graphics and the builtin
//! Helvetica fonts, including the fiscal QR as vector modules.

use printpdf::path::PaintMode;
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfLayerReference, Point, Rect,
    Rgb,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::io::BufWriter;
use thiserror::Error;

use crate::models::Invoice;
use crate::services::qr::QrModules;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("PDF engine error: {0}")]
    Pdf(String),
    #[error("QR encoding error: {0}")]
    Qr(#[from] anyhow::Error),
}

impl From<RenderError> for AppError {
    fn from(err: RenderError) -> Self {
        AppError::InternalError(anyhow::Error::new(err).context("Invoice rendering failed"))
    }
}

/// Everything printed on an invoice.
#[derive(Debug, Clone)]
pub struct InvoiceDocument {
    pub invoice: Invoice,
    pub brand: String,
    pub area_name: Option<String>,
    /// "Son: ..." text; `None` prints the amount in digits instead.
    pub amount_in_words: Option<String>,
    pub qr: Option<QrModules>,
}

pub trait DocumentRenderer: Send + Sync {
    fn render(&self, document: &InvoiceDocument) -> Result<Vec<u8>, RenderError>;

    fn extension(&self) -> &'static str;

    fn content_type(&self) -> &'static str;
}

/// Currency value with exactly two decimals and the currency code.
pub fn format_amount(amount: Decimal, currency: &str) -> String {
    format!("{:.2} {}", amount.round_dp(2), currency)
}

/// Make untrusted text safe for a builtin-font PDF string: control characters are dropped,
/// characters outside Latin-1 become `?`, and the result is cut to `max_chars`.
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| if (c as u32) <= 0xFF { c } else { '?' })
        .collect();

    if cleaned.chars().count() <= max_chars {
        cleaned
    } else {
        let mut cut: String = cleaned.chars().take(max_chars.saturating_sub(3)).collect();
        cut.push_str("...");
        cut
    }
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 15.0;

fn rgb(hex: u32) -> Color {
    let r = ((hex >> 16) & 0xFF) as f32 / 255.0;
    let g = ((hex >> 8) & 0xFF) as f32 / 255.0;
    let b = (hex & 0xFF) as f32 / 255.0;
    Color::Rgb(Rgb::new(r, g, b, None))
}

const PURPLE: u32 = 0x4A2FCC;
const ORANGE: u32 = 0xFF7A2D;
const YELLOW: u32 = 0xFFC623;
const DARK: u32 = 0x222222;
const GREY: u32 = 0x6C757D;
const LIGHT: u32 = 0xF8F9FA;
const WHITE: u32 = 0xFFFFFF;

struct Canvas {
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
}

impl Canvas {
    fn fill(&self, color: u32) {
        self.layer.set_fill_color(rgb(color));
    }

    fn text(&self, text: &str, size: f32, x: f32, y: f32, bold: bool) {
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(text, size, Mm(x), Mm(y), font);
    }

    /// Helvetica averages about half an em per glyph; good enough for right alignment.
    fn text_width(text: &str, size: f32) -> f32 {
        text.chars().count() as f32 * size * 0.5 * 0.3528
    }

    fn text_right(&self, text: &str, size: f32, right: f32, y: f32, bold: bool) {
        let x = (right - Self::text_width(text, size)).max(MARGIN);
        self.text(text, size, x, y, bold);
    }

    fn rect(&self, x: f32, y: f32, w: f32, h: f32, color: u32) {
        self.fill(color);
        self.layer
            .add_rect(Rect::new(Mm(x), Mm(y), Mm(x + w), Mm(y + h)).with_mode(PaintMode::Fill));
    }

    fn hline(&self, x1: f32, x2: f32, y: f32) {
        self.layer.set_outline_color(rgb(GREY));
        self.layer.set_outline_thickness(0.5);
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x1), Mm(y)), false),
                (Point::new(Mm(x2), Mm(y)), false),
            ],
            is_closed: false,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct PdfInvoiceRenderer;

impl PdfInvoiceRenderer {
    pub fn new() -> Self {
        Self
    }

    fn draw(canvas: &Canvas, doc: &InvoiceDocument) {
        let inv = &doc.invoice;
        let money = |amount: Decimal| format_amount(amount, &inv.currency);
        let brand = sanitize_text(&doc.brand, 40);

        // Header band
        canvas.rect(0.0, 262.0, PAGE_WIDTH, 35.0, PURPLE);
        canvas.rect(MARGIN, 268.0, 8.0, 8.0, ORANGE);
        canvas.rect(MARGIN + 5.0, 273.0, 8.0, 8.0, YELLOW);
        canvas.fill(WHITE);
        canvas.text(&brand, 22.0, MARGIN + 18.0, 272.0, true);
        canvas.text("FACTURA", 20.0, 140.0, 281.0, true);
        canvas.text(
            &format!("N° {}", sanitize_text(&inv.number, 20)),
            11.0,
            140.0,
            273.0,
            false,
        );
        canvas.text("ORIGINAL", 8.0, 140.0, 267.0, false);

        // Issuer block
        let mut y = 252.0;
        canvas.fill(DARK);
        canvas.text(&sanitize_text(&inv.issuer_legal_name, 60), 11.0, MARGIN, y, true);
        for line in [
            format!("NIT: {}", sanitize_text(&inv.issuer_nit, 20)),
            sanitize_text(&inv.issuer_address, 70),
            format!("Tel: {}", sanitize_text(&inv.issuer_phone, 30)),
            format!(
                "{} - {}",
                sanitize_text(&inv.branch, 30),
                sanitize_text(&inv.municipality, 30)
            ),
        ] {
            y -= 5.0;
            canvas.text(&line, 8.5, MARGIN, y, false);
        }

        // Fiscal block
        let mut y = 252.0;
        let fiscal_x = 120.0;
        for (label, value) in [
            ("NIT", sanitize_text(&inv.issuer_nit, 20)),
            ("Autorización", sanitize_text(&inv.authorization_number, 30)),
            ("Fecha emisión", inv.issued_at.format("%d/%m/%Y %H:%M").to_string()),
            (
                "Fecha límite emisión",
                inv.issue_deadline.format("%d/%m/%Y").to_string(),
            ),
            ("Código Control", sanitize_text(&inv.control_code, 20)),
        ] {
            canvas.text(&format!("{}:", label), 8.5, fiscal_x, y, true);
            canvas.text(&value, 8.5, fiscal_x + 34.0, y, false);
            y -= 5.0;
        }
        canvas.text(
            &sanitize_text(&inv.economic_activity, 95),
            7.0,
            MARGIN,
            222.0,
            false,
        );
        canvas.hline(MARGIN, PAGE_WIDTH - MARGIN, 218.0);

        // Client block
        canvas.rect(MARGIN, 190.0, PAGE_WIDTH - 2.0 * MARGIN, 24.0, LIGHT);
        canvas.fill(PURPLE);
        canvas.text("DATOS DEL CLIENTE", 9.0, MARGIN + 3.0, 208.0, true);
        canvas.fill(DARK);
        let document = if inv.client_complement.trim().is_empty() {
            sanitize_text(&inv.client_document, 30)
        } else {
            format!(
                "{}-{}",
                sanitize_text(&inv.client_document, 30),
                sanitize_text(&inv.client_complement, 10)
            )
        };
        canvas.text(
            &format!("Nombre: {}", sanitize_text(&inv.client_name, 60)),
            8.5,
            MARGIN + 3.0,
            202.0,
            false,
        );
        canvas.text(
            &format!("NIT/CI: {}", document),
            8.5,
            MARGIN + 3.0,
            196.5,
            false,
        );
        canvas.text(
            &format!("Email: {}", sanitize_text(&inv.client_email, 60)),
            8.5,
            110.0,
            202.0,
            false,
        );
        canvas.text("Estado: CANCELADO", 8.5, 110.0, 196.5, true);

        // Line items
        let (x_desc, x_qty, x_unit_right, x_total_right) = (MARGIN + 3.0, 115.0, 160.0, 192.0);
        canvas.rect(MARGIN, 172.0, PAGE_WIDTH - 2.0 * MARGIN, 8.0, PURPLE);
        canvas.fill(WHITE);
        canvas.text("DESCRIPCIÓN", 8.5, x_desc, 174.5, true);
        canvas.text("CANT.", 8.5, x_qty, 174.5, true);
        canvas.text_right("PRECIO UNIT.", 8.5, x_unit_right, 174.5, true);
        canvas.text_right("TOTAL", 8.5, x_total_right, 174.5, true);

        canvas.fill(DARK);
        let description = match doc.area_name.as_deref() {
            Some(area) => format!("Reserva de {}", sanitize_text(area, 60)),
            None => "Servicio de Reserva".to_string(),
        };
        canvas.text(&description, 8.5, x_desc, 165.0, false);
        canvas.text("1", 8.5, x_qty + 3.0, 165.0, false);
        canvas.text_right(&money(inv.subtotal), 8.5, x_unit_right, 165.0, false);
        canvas.text_right(&money(inv.subtotal), 8.5, x_total_right, 165.0, false);
        canvas.hline(MARGIN, PAGE_WIDTH - MARGIN, 161.0);

        // Totals box
        canvas.rect(120.0, 128.0, PAGE_WIDTH - MARGIN - 120.0, 28.0, LIGHT);
        canvas.fill(DARK);
        canvas.text("Subtotal:", 9.0, 124.0, 149.0, false);
        canvas.text_right(&money(inv.subtotal), 9.0, x_total_right, 149.0, false);
        canvas.text("Descuento:", 9.0, 124.0, 143.0, false);
        canvas.text_right(&money(inv.discount), 9.0, x_total_right, 143.0, false);
        canvas.fill(PURPLE);
        canvas.text("TOTAL:", 11.0, 124.0, 133.0, true);
        canvas.text_right(&money(inv.total), 11.0, x_total_right, 133.0, true);

        canvas.fill(DARK);
        let words = match doc.amount_in_words.as_deref() {
            Some(words) => sanitize_text(words, 150),
            None => money(inv.total),
        };
        let mut y = 149.0;
        for line in wrap_text(&format!("Son: {}", words), 60) {
            canvas.text(&line, 8.5, MARGIN, y, true);
            y -= 5.0;
        }

        // Fiscal QR
        if let Some(qr) = &doc.qr {
            let size = 38.0;
            let (left, bottom) = (MARGIN, 72.0);
            let module = size / qr.width as f32;
            canvas.fill(DARK);
            for row in 0..qr.width {
                for col in 0..qr.width {
                    if qr.is_dark(col, row) {
                        let x = left + col as f32 * module;
                        let y = bottom + size - (row as f32 + 1.0) * module;
                        canvas
                            .layer
                            .add_rect(Rect::new(Mm(x), Mm(y), Mm(x + module), Mm(y + module))
                                .with_mode(PaintMode::Fill));
                    }
                }
            }
            canvas.text("Código QR Fiscal", 7.0, left, bottom - 5.0, false);
        }

        // Footer
        canvas.rect(MARGIN, 22.0, PAGE_WIDTH - 2.0 * MARGIN, 30.0, LIGHT);
        canvas.fill(GREY);
        let mut y = 46.0;
        for line in wrap_text(&sanitize_text(&inv.legend, 300), 110) {
            canvas.text(&line, 7.0, MARGIN + 3.0, y, false);
            y -= 4.0;
        }
        if let Some(url) = &inv.verification_url {
            for line in wrap_text(&format!("Verificar en: {}", sanitize_text(url, 200)), 120) {
                canvas.text(&line, 6.5, MARGIN + 3.0, y, false);
                y -= 4.0;
            }
        }
        canvas.fill(PURPLE);
        canvas.text(
            &format!("Powered by {} - Sistema de Gestión de Reservas", brand),
            6.5,
            MARGIN,
            14.0,
            false,
        );
    }
}

impl DocumentRenderer for PdfInvoiceRenderer {
    fn render(&self, document: &InvoiceDocument) -> Result<Vec<u8>, RenderError> {
        let title = format!("Factura {}", sanitize_text(&document.invoice.number, 20));
        let (doc, page, layer) =
            PdfDocument::new(title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Factura");
        let layer = doc.get_page(page).get_layer(layer);

        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;

        let canvas = Canvas {
            layer,
            regular,
            bold,
        };
        Self::draw(&canvas, document);

        let mut writer = BufWriter::new(Vec::<u8>::new());
        doc.save(&mut writer)
            .map_err(|e| RenderError::Pdf(e.to_string()))?;
        writer
            .into_inner()
            .map_err(|e| RenderError::Pdf(e.to_string()))
    }

    fn extension(&self) -> &'static str {
        "pdf"
    }

    fn content_type(&self) -> &'static str {
        "application/pdf"
    }
}
