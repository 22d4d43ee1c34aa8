mod currency;
mod minor_units;

pub mod helpers;
pub mod op;
mod secret;

pub use currency::{CurrencyCode, CurrencyCodeError};
pub use minor_units::{AmountParseError, MinorUnits};
pub use secret::Secret;
