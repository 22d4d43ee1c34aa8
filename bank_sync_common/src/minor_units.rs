use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::{op, CurrencyCode};

//--------------------------------------     MinorUnits       --------------------------------------------------------
/// A signed amount of money in the minor unit of its currency (cents for EUR, yen for JPY).
///
/// The currency is carried alongside the amount, never inside it, so amounts in different currencies must not be
/// compared.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct MinorUnits(i64);

op!(binary MinorUnits, Add, add);
op!(binary MinorUnits, Sub, sub);
op!(inplace MinorUnits, AddAssign, add_assign);
op!(inplace MinorUnits, SubAssign, sub_assign);
op!(unary MinorUnits, Neg, neg);

impl Sum for MinorUnits {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid currency amount: {0}")]
pub struct AmountParseError(String);

impl From<i64> for MinorUnits {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for MinorUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl MinorUnits {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Banks report amounts as decimal strings, e.g. `"-12.5"` or `"1000.00"`. The fractional part is scaled to the
    /// currency's exponent. More fractional digits than the currency allows is an error, not a rounding.
    pub fn from_decimal_str(amount: &str, currency: &CurrencyCode) -> Result<Self, AmountParseError> {
        let err = || AmountParseError(format!("{amount} {currency}"));
        let trimmed = amount.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let mut parts = digits.splitn(2, '.');
        let whole = parts.next().filter(|s| !s.is_empty()).ok_or_else(err)?;
        let fraction = parts.next().unwrap_or("");
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let exponent = currency.exponent() as usize;
        let fraction = fraction.trim_end_matches('0');
        if fraction.len() > exponent {
            return Err(err());
        }
        let scale = 10i64.pow(exponent as u32);
        let whole = whole.parse::<i64>().map_err(|_| err())?;
        let fraction = if fraction.is_empty() {
            0
        } else {
            format!("{fraction:0<exponent$}").parse::<i64>().map_err(|_| err())?
        };
        let value = whole.checked_mul(scale).and_then(|w| w.checked_add(fraction)).ok_or_else(err)?;
        Ok(Self(if negative { -value } else { value }))
    }

    /// Formats the amount as a decimal string in the currency's major unit.
    pub fn to_decimal_string(&self, currency: &CurrencyCode) -> String {
        let exponent = currency.exponent();
        if exponent == 0 {
            return self.0.to_string();
        }
        let scale = 10i64.pow(exponent);
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let width = exponent as usize;
        format!("{sign}{}.{:0width$}", abs / scale as u64, abs % scale as u64)
    }
}
