use std::path::PathBuf;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Input validation errors. Each variant is one violated rule.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("product code cannot be empty")]
    EmptyProductCode,
    #[error("product code must contain only digits after removing separators: '{value}'")]
    ProductCodeNotNumeric { value: String },
    #[error("product code must have between {min} and {max} digits, got {len}")]
    ProductCodeLength { len: usize, min: usize, max: usize },

    #[error("year must be an integer: '{value}'")]
    YearNotInteger { value: String },
    #[error("year {year} is outside the supported range {min}-{max}")]
    YearOutOfRange { year: i64, min: u16, max: u16 },

    #[error("country cannot be empty")]
    EmptyCountry,
    #[error("unknown country code or alias: '{value}'")]
    UnknownCountry { value: String },

    #[error("topic is empty after removing disallowed characters")]
    EmptyTopic,

    #[error("unknown source '{value}', expected one of census, dataweb, federal_register, bea, gnews")]
    UnknownSource { value: String },
    #[error("query must include at least one of product_code, country, year, topic")]
    EmptyQuery,
    #[error("deadline must be greater than zero")]
    ZeroDeadline,

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("import value cannot be negative")]
    NegativeImportValue,
    #[error("tariff rate must be between 0 and 100, got {value}")]
    TariffRateOutOfRange { value: f64 },
}

impl ValidationError {
    /// Input field the rule belongs to.
    pub const fn field(&self) -> &'static str {
        match self {
            Self::EmptyProductCode
            | Self::ProductCodeNotNumeric { .. }
            | Self::ProductCodeLength { .. } => "product_code",
            Self::YearNotInteger { .. } | Self::YearOutOfRange { .. } => "year",
            Self::EmptyCountry | Self::UnknownCountry { .. } => "country",
            Self::EmptyTopic => "topic",
            Self::UnknownSource { .. } => "sources",
            Self::EmptyQuery => "query",
            Self::ZeroDeadline => "deadline_ms",
            Self::NonFiniteValue { field } => field,
            Self::NegativeImportValue => "import_value",
            Self::TariffRateOutOfRange { .. } => "tariff_rate",
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::EmptyProductCode => "validation.product_code.empty",
            Self::ProductCodeNotNumeric { .. } => "validation.product_code.not_numeric",
            Self::ProductCodeLength { .. } => "validation.product_code.length",
            Self::YearNotInteger { .. } => "validation.year.not_integer",
            Self::YearOutOfRange { .. } => "validation.year.out_of_range",
            Self::EmptyCountry => "validation.country.empty",
            Self::UnknownCountry { .. } => "validation.country.unknown",
            Self::EmptyTopic => "validation.topic.empty",
            Self::UnknownSource { .. } => "validation.source.unknown",
            Self::EmptyQuery => "validation.query.empty",
            Self::ZeroDeadline => "validation.deadline.zero",
            Self::NonFiniteValue { .. } => "validation.value.non_finite",
            Self::NegativeImportValue => "validation.import_value.negative",
            Self::TariffRateOutOfRange { .. } => "validation.tariff_rate.out_of_range",
        }
    }
}

impl Serialize for ValidationError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ValidationError", 3)?;
        state.serialize_field("field", self.field())?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Top-level error type for engine construction and configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to read configuration file '{}': {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_field_code_and_message() {
        let error = ValidationError::YearOutOfRange {
            year: 1985,
            min: 1990,
            max: 2030,
        };
        let value = serde_json::to_value(&error).expect("serializes");

        assert_eq!(value["field"], "year");
        assert_eq!(value["code"], "validation.year.out_of_range");
        assert_eq!(
            value["message"],
            "year 1985 is outside the supported range 1990-2030"
        );
    }
}
