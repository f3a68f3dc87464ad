use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MIN_DIGITS: usize = 6;
const MAX_DIGITS: usize = 10;
const SEPARATORS: [char; 2] = ['.', ' '];

/// Normalized harmonized-tariff product code (6 to 10 digits, no separators).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductCode(String);

impl ProductCode {
    /// Parse a code such as `8703.23.00` or `870323` into its digit-only form.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyProductCode);
        }

        let digits = trimmed
            .chars()
            .filter(|ch| !SEPARATORS.contains(ch))
            .collect::<String>();

        if !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(ValidationError::ProductCodeNotNumeric {
                value: trimmed.to_owned(),
            });
        }

        let len = digits.len();
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&len) {
            return Err(ValidationError::ProductCodeLength {
                len,
                min: MIN_DIGITS,
                max: MAX_DIGITS,
            });
        }

        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProductCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for ProductCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProductCode> for String {
    fn from(value: ProductCode) -> Self {
        value.0
    }
}
