use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

pub const MIN_YEAR: u16 = 1990;
pub const MAX_YEAR: u16 = 2030;

/// Calendar year covered by the trade datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeYear(u16);

impl TradeYear {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let year = trimmed
            .parse::<i64>()
            .map_err(|_| ValidationError::YearNotInteger {
                value: trimmed.to_owned(),
            })?;
        Self::new(year)
    }

    pub fn new(year: i64) -> Result<Self, ValidationError> {
        if year < i64::from(MIN_YEAR) || year > i64::from(MAX_YEAR) {
            return Err(ValidationError::YearOutOfRange {
                year,
                min: MIN_YEAR,
                max: MAX_YEAR,
            });
        }
        Ok(Self(year as u16))
    }

    pub const fn get(self) -> u16 {
        self.0
    }
}

impl Display for TradeYear {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
