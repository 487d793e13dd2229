//! Fiscal fields derived for Bolivian invoices.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256};

const CONTROL_CODE_LEN: usize = 16;
const VERIFICATION_BASE: &str = "https://pilotosiat.impuestos.gob.bo/consulta/QR";

pub const HIGH_AMOUNT_LEGEND: &str = "ESTA FACTURA CONTRIBUYE AL DESARROLLO DEL PAÍS, EL USO ILÍCITO SERÁ SANCIONADO PENALMENTE DE ACUERDO A LEY";
pub const STANDARD_LEGEND: &str =
    "Ley N° 453: El proveedor debe habilitar medios electrónicos de pago";

/// Amount above which the development legend is printed.
pub fn legend_threshold() -> Decimal {
    Decimal::from(50_000)
}

/// Amount in cents, rounded half away from zero.
pub fn amount_in_cents(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or_default()
}

/// 16 uppercase hex characters of SHA-256 over
/// `{number}{tax_id}{YYYYMMDD}{cents padded to 12}`.
pub fn control_code(number: &str, tax_id: &str, date: NaiveDate, amount: Decimal) -> String {
    let input = format!(
        "{}{}{}{:012}",
        number,
        tax_id,
        date.format("%Y%m%d"),
        amount_in_cents(amount)
    );

    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..CONTROL_CODE_LEN].to_uppercase()
}

pub fn legend_for(amount: Decimal) -> &'static str {
    if amount > legend_threshold() {
        HIGH_AMOUNT_LEGEND
    } else {
        STANDARD_LEGEND
    }
}

pub fn verification_url(nit: &str, control_code: &str, number: &str) -> String {
    format!(
        "{}?nit={}&cuf={}&numero={}&t=2",
        VERIFICATION_BASE, nit, control_code, number
    )
}

/// SHA-256 of a rendered file, hex encoded.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn control_code_is_sixteen_uppercase_hex_chars() {
        let code = control_code("FAC-00000001", "1234567890123", day(), Decimal::from(100));
        assert_eq!(code.len(), 16);
        assert!(code
            .chars()
            .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn control_code_matches_the_documented_construction() {
        let input = "FAC-00000001".to_string() + "1234567890123" + "20240101" + "000000010000";
        let expected = hex::encode(Sha256::digest(input.as_bytes()))[..16].to_uppercase();
        assert_eq!(
            control_code("FAC-00000001", "1234567890123", day(), Decimal::from(100)),
            expected
        );
    }

    #[test]
    fn control_code_is_deterministic_for_same_inputs() {
        let a = control_code("FAC-00000007", "1234567890123", day(), Decimal::new(15050, 2));
        let b = control_code("FAC-00000007", "1234567890123", day(), Decimal::new(15050, 2));
        assert_eq!(a, b);
    }

    #[test]
    fn one_cent_changes_the_code() {
        let mut seen = std::collections::HashSet::new();
        for cents in 10_000..10_200i64 {
            let code = control_code("FAC-00000001", "1234567890123", day(), Decimal::new(cents, 2));
            assert!(seen.insert(code), "collision at {} cents", cents);
        }
    }

    #[test]
    fn date_is_part_of_the_code() {
        let next_day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_ne!(
            control_code("FAC-00000001", "1", day(), Decimal::ONE),
            control_code("FAC-00000001", "1", next_day, Decimal::ONE)
        );
    }

    #[test]
    fn cents_round_half_away_from_zero() {
        assert_eq!(amount_in_cents(Decimal::new(10005, 3)), 1001);
        assert_eq!(amount_in_cents(Decimal::from(100)), 10_000);
    }

    #[test]
    fn legend_switches_above_threshold() {
        assert_eq!(legend_for(Decimal::from(50_000)), STANDARD_LEGEND);
        assert_eq!(legend_for(Decimal::new(5_000_001, 2)), HIGH_AMOUNT_LEGEND);
    }

    #[test]
    fn verification_url_carries_nit_code_and_number() {
        assert_eq!(
            verification_url("123", "ABCDEF0123456789", "FAC-00000001"),
            "https://pilotosiat.impuestos.gob.bo/consulta/QR?nit=123&cuf=ABCDEF0123456789&numero=FAC-00000001&t=2"
        );
    }
}
