//! Sequential invoice numbering: `PREFIX-########`.

use service_core::error::AppError;
use thiserror::Error;

pub const DEFAULT_PREFIX: &str = "FAC";
const COUNTER_WIDTH: usize = 8;
const MAX_COUNTER: u64 = 99_999_999;

#[derive(Debug, Error, PartialEq)]
pub enum NumberingError {
    #[error("stored invoice number '{0}' is malformed")]
    Malformed(String),
    #[error("invoice counter exhausted after '{0}'")]
    Exhausted(String),
}

impl From<NumberingError> for AppError {
    fn from(err: NumberingError) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

/// Number that follows `last`, or the first number when nothing was issued yet.
///
/// A stored number whose counter does not parse is an error; the sequence is never reset.
pub fn next_invoice_number(prefix: &str, last: Option<&str>) -> Result<String, NumberingError> {
    let counter = match last {
        None => 0,
        Some(last) => parse_counter(last)?,
    };

    if counter >= MAX_COUNTER {
        return Err(NumberingError::Exhausted(format!(
            "{}-{:0width$}",
            prefix,
            counter,
            width = COUNTER_WIDTH
        )));
    }

    Ok(format_number(prefix, counter + 1))
}

pub fn format_number(prefix: &str, counter: u64) -> String {
    format!("{}-{:0width$}", prefix, counter, width = COUNTER_WIDTH)
}

fn parse_counter(number: &str) -> Result<u64, NumberingError> {
    let (_, digits) = number
        .rsplit_once('-')
        .ok_or_else(|| NumberingError::Malformed(number.to_string()))?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(NumberingError::Malformed(number.to_string()));
    }

    digits
        .parse::<u64>()
        .map_err(|_| NumberingError::Malformed(number.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_number_starts_at_one() {
        assert_eq!(
            next_invoice_number(DEFAULT_PREFIX, None).unwrap(),
            "FAC-00000001"
        );
    }

    #[test]
    fn increments_the_stored_counter() {
        assert_eq!(
            next_invoice_number(DEFAULT_PREFIX, Some("FAC-00000041")).unwrap(),
            "FAC-00000042"
        );
        assert_eq!(
            next_invoice_number(DEFAULT_PREFIX, Some("FAC-00000999")).unwrap(),
            "FAC-00001000"
        );
    }

    #[test]
    fn sequence_of_generations_has_no_gaps() {
        let mut last: Option<String> = None;
        for expected in 1..=25u64 {
            let next = next_invoice_number(DEFAULT_PREFIX, last.as_deref()).unwrap();
            assert_eq!(next, format_number(DEFAULT_PREFIX, expected));
            last = Some(next);
        }
    }

    #[test]
    fn malformed_counter_fails_instead_of_resetting() {
        assert_eq!(
            next_invoice_number(DEFAULT_PREFIX, Some("FAC-ABC")),
            Err(NumberingError::Malformed("FAC-ABC".to_string()))
        );
        assert!(next_invoice_number(DEFAULT_PREFIX, Some("FAC00000001")).is_err());
        assert!(next_invoice_number(DEFAULT_PREFIX, Some("FAC-")).is_err());
        assert!(next_invoice_number(DEFAULT_PREFIX, Some("FAC- 12")).is_err());
    }

    #[test]
    fn counter_exhaustion_is_reported() {
        assert!(matches!(
            next_invoice_number(DEFAULT_PREFIX, Some("FAC-99999999")),
            Err(NumberingError::Exhausted(_))
        ));
    }
}
