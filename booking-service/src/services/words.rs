//! Spanish amount-in-words ("Son: ...") for invoice totals.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

const UNITS: [&str; 10] = [
    "", "UNO", "DOS", "TRES", "CUATRO", "CINCO", "SEIS", "SIETE", "OCHO", "NUEVE",
];
const TEENS: [&str; 10] = [
    "DIEZ",
    "ONCE",
    "DOCE",
    "TRECE",
    "CATORCE",
    "QUINCE",
    "DIECISÉIS",
    "DIECISIETE",
    "DIECIOCHO",
    "DIECINUEVE",
];
const TENS: [&str; 10] = [
    "", "", "VEINTE", "TREINTA", "CUARENTA", "CINCUENTA", "SESENTA", "SETENTA", "OCHENTA",
    "NOVENTA",
];
const HUNDREDS: [&str; 10] = [
    "",
    "CIENTO",
    "DOSCIENTOS",
    "TRESCIENTOS",
    "CUATROCIENTOS",
    "QUINIENTOS",
    "SEISCIENTOS",
    "SETECIENTOS",
    "OCHOCIENTOS",
    "NOVECIENTOS",
];

/// Amounts from this value up are not spelled out.
pub const WORDS_LIMIT: u64 = 1_000_000;

const CURRENCY_SINGULAR: &str = "BOLIVIANO";
const CURRENCY_PLURAL: &str = "BOLIVIANOS";

/// `150.5` -> `CIENTO CINCUENTA BOLIVIANOS CON 50/100`.
///
/// Returns `None` for negative amounts and for amounts of one million or more.
pub fn amount_to_words(amount: Decimal) -> Option<String> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return None;
    }

    let amount = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let integer = amount.trunc().to_u64()?;
    if integer >= WORDS_LIMIT {
        return None;
    }
    let cents = ((amount - amount.trunc()) * Decimal::ONE_HUNDRED).to_u64()?;

    let currency = if integer == 1 {
        CURRENCY_SINGULAR
    } else {
        CURRENCY_PLURAL
    };

    let mut literal = format!("{} {}", integer_to_words(integer), currency);
    if cents > 0 {
        literal.push_str(&format!(" CON {:02}/100", cents));
    }
    Some(literal)
}

/// Cardinal words for `0..1_000_000`.
pub fn integer_to_words(n: u64) -> String {
    match n {
        0 => "CERO".to_string(),
        1 => "UN".to_string(),
        _ => {
            let thousands = (n / 1000) as u32;
            let rest = (n % 1000) as u32;

            let mut parts: Vec<String> = Vec::with_capacity(2);
            match thousands {
                0 => {}
                1 => parts.push("MIL".to_string()),
                t => parts.push(format!("{} MIL", hundreds(t, true))),
            }
            if rest > 0 {
                parts.push(hundreds(rest, false));
            }
            parts.join(" ")
        }
    }
}

/// Words for `1..=999`. `apocope` shortens a trailing UNO to UN (before MIL).
fn hundreds(n: u32, apocope: bool) -> String {
    if n == 100 {
        return "CIEN".to_string();
    }

    let h = (n / 100) as usize;
    let rest = n % 100;

    let mut parts: Vec<String> = Vec::with_capacity(2);
    if h > 0 {
        parts.push(HUNDREDS[h].to_string());
    }
    if rest > 0 {
        parts.push(tens(rest, apocope));
    }
    parts.join(" ")
}

fn tens(n: u32, apocope: bool) -> String {
    let unit = |u: usize| -> &'static str {
        if u == 1 && apocope {
            "UN"
        } else {
            UNITS[u]
        }
    };

    let t = (n / 10) as usize;
    let u = (n % 10) as usize;
    match n {
        1..=9 => unit(u).to_string(),
        10..=19 => TEENS[u].to_string(),
        20 => TENS[2].to_string(),
        21..=29 => format!("VEINTI{}", unit(u)),
        _ if u == 0 => TENS[t].to_string(),
        _ => format!("{} Y {}", TENS[t], unit(u)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: u64) -> String {
        integer_to_words(n)
    }

    #[test]
    fn small_numbers() {
        assert_eq!(words(0), "CERO");
        assert_eq!(words(1), "UN");
        assert_eq!(words(7), "SIETE");
        assert_eq!(words(15), "QUINCE");
        assert_eq!(words(16), "DIECISÉIS");
        assert_eq!(words(20), "VEINTE");
        assert_eq!(words(21), "VEINTIUNO");
        assert_eq!(words(25), "VEINTICINCO");
        assert_eq!(words(31), "TREINTA Y UNO");
        assert_eq!(words(90), "NOVENTA");
    }

    #[test]
    fn hundreds_distinguish_cien_and_ciento() {
        assert_eq!(words(100), "CIEN");
        assert_eq!(words(101), "CIENTO UNO");
        assert_eq!(words(150), "CIENTO CINCUENTA");
        assert_eq!(words(500), "QUINIENTOS");
        assert_eq!(words(999), "NOVECIENTOS NOVENTA Y NUEVE");
    }

    #[test]
    fn thousands() {
        assert_eq!(words(1000), "MIL");
        assert_eq!(words(1001), "MIL UNO");
        assert_eq!(words(2500), "DOS MIL QUINIENTOS");
        assert_eq!(words(21_000), "VEINTIUN MIL");
        assert_eq!(words(100_000), "CIEN MIL");
        assert_eq!(words(101_000), "CIENTO UN MIL");
        assert_eq!(
            words(999_999),
            "NOVECIENTOS NOVENTA Y NUEVE MIL NOVECIENTOS NOVENTA Y NUEVE"
        );
    }

    #[test]
    fn currency_suffix_is_plural_unless_exactly_one() {
        assert_eq!(amount_to_words(Decimal::ZERO).unwrap(), "CERO BOLIVIANOS");
        assert_eq!(amount_to_words(Decimal::ONE).unwrap(), "UN BOLIVIANO");
        assert_eq!(amount_to_words(Decimal::new(150, 2)).unwrap(), "UN BOLIVIANO CON 50/100");
        assert_eq!(amount_to_words(Decimal::from(2)).unwrap(), "DOS BOLIVIANOS");
        assert_eq!(
            amount_to_words(Decimal::from(1001)).unwrap(),
            "MIL UNO BOLIVIANOS"
        );
    }

    #[test]
    fn cents_render_as_fraction() {
        assert_eq!(
            amount_to_words(Decimal::new(15005, 2)).unwrap(),
            "CIENTO CINCUENTA BOLIVIANOS CON 05/100"
        );
        assert_eq!(
            amount_to_words(Decimal::from(100)).unwrap(),
            "CIEN BOLIVIANOS"
        );
    }

    #[test]
    fn out_of_range_amounts_are_declined() {
        assert_eq!(amount_to_words(Decimal::from(1_000_000)), None);
        assert_eq!(amount_to_words(Decimal::from(-5)), None);
        assert!(amount_to_words(Decimal::new(99_999_999, 2)).is_some());
    }
}
