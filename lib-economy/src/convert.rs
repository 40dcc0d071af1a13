//! Conversions between stored row values and domain values

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use lib_types::{from_minor_units, to_minor_units, Amount};
use rust_decimal::Decimal;

use crate::errors::{LedgerError, LedgerResult};

/// Stored date format
pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Rupees to paise; more than two decimals is an invalid amount
pub(crate) fn to_minor(amount: Amount, what: &str) -> LedgerResult<i64> {
    to_minor_units(amount).ok_or_else(|| {
        LedgerError::InvalidAmount(format!("{} {} must have at most two decimals", what, amount))
    })
}

pub(crate) fn from_minor(minor: i64) -> Amount {
    from_minor_units(minor)
}

/// Reject zero, negative and sub-paise amounts
pub(crate) fn positive_minor(amount: Amount, what: &str) -> LedgerResult<i64> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!("{} must be positive, got {}", what, amount)));
    }
    to_minor(amount, what)
}

pub(crate) fn parse_field<T>(value: &str, what: &str) -> LedgerResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse::<T>().map_err(|e| LedgerError::corrupt(what, e))
}

pub(crate) fn parse_opt_field<T>(value: Option<&str>, what: &str) -> LedgerResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    value.map(|v| parse_field(v, what)).transpose()
}

pub(crate) fn timestamp(secs: i64) -> LedgerResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| LedgerError::corrupt("timestamp", secs))
}

pub(crate) fn parse_date(value: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| LedgerError::corrupt("date", e))
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn count(value: i64, what: &str) -> LedgerResult<u32> {
    u32::try_from(value).map_err(|e| LedgerError::corrupt(what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_positive_minor() {
        assert_eq!(positive_minor(dec!(1000), "amount").unwrap(), 100_000);
        assert!(matches!(positive_minor(dec!(0), "amount"), Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(positive_minor(dec!(1.005), "amount"), Err(LedgerError::InvalidAmount(_))));
    }

    #[test]
    fn test_date_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert_eq!(parse_date(&format_date(date)).unwrap(), date);
        assert!(parse_date("28/02/2026").is_err());
    }
}
