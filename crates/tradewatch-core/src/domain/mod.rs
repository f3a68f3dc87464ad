//! # Domain Types
//!
//! Validated value types for trade-data queries.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProductCode`] | Harmonized tariff code, digits only |
//! | [`Country`] | Trading partner resolved from code, name, or demonym |
//! | [`TradeYear`] | Calendar year within the supported dataset range |
//! | [`UtcDateTime`] | UTC timestamp |
//! | [`TariffCost`] | Result of [`calculate_tariff_cost`] |
//!
//! Every type enforces its invariants at construction and reports failures
//! as [`crate::ValidationError`].

mod country;
mod product_code;
mod tariff;
mod timestamp;
mod year;

pub use country::Country;
pub use product_code::ProductCode;
pub use tariff::{
    calculate_tariff_cost, format_currency, format_percentage, FormattedCost, TariffCost,
};
pub use timestamp::UtcDateTime;
pub use year::{TradeYear, MAX_YEAR, MIN_YEAR};
