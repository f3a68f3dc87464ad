use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Trading partner (or the MFN pseudo-partner) recognised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Country {
    UnitedStates,
    China,
    Mexico,
    Canada,
    Japan,
    SouthKorea,
    Germany,
    Vietnam,
    India,
    /// Most-favored-nation column of the tariff schedule.
    Mfn,
}

const ALIASES: &[(&str, Country)] = &[
    ("us", Country::UnitedStates),
    ("usa", Country::UnitedStates),
    ("united states", Country::UnitedStates),
    ("america", Country::UnitedStates),
    ("cn", Country::China),
    ("china", Country::China),
    ("chinese", Country::China),
    ("mx", Country::Mexico),
    ("mexico", Country::Mexico),
    ("mexican", Country::Mexico),
    ("ca", Country::Canada),
    ("canada", Country::Canada),
    ("canadian", Country::Canada),
    ("jp", Country::Japan),
    ("japan", Country::Japan),
    ("japanese", Country::Japan),
    ("kr", Country::SouthKorea),
    ("korea", Country::SouthKorea),
    ("korean", Country::SouthKorea),
    ("south korea", Country::SouthKorea),
    ("de", Country::Germany),
    ("germany", Country::Germany),
    ("german", Country::Germany),
    ("vn", Country::Vietnam),
    ("vietnam", Country::Vietnam),
    ("vietnamese", Country::Vietnam),
    ("in", Country::India),
    ("india", Country::India),
    ("indian", Country::India),
    ("mfn", Country::Mfn),
    ("most favored nation", Country::Mfn),
];

impl Country {
    /// Resolve a code, name, or demonym (case-insensitive, inner whitespace collapsed).
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptyCountry);
        }

        ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, country)| *country)
            .ok_or_else(|| ValidationError::UnknownCountry {
                value: input.trim().to_owned(),
            })
    }

    /// ISO 3166 alpha-2 code, or `MFN`.
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnitedStates => "US",
            Self::China => "CN",
            Self::Mexico => "MX",
            Self::Canada => "CA",
            Self::Japan => "JP",
            Self::SouthKorea => "KR",
            Self::Germany => "DE",
            Self::Vietnam => "VN",
            Self::India => "IN",
            Self::Mfn => "MFN",
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::UnitedStates => "United States",
            Self::China => "China",
            Self::Mexico => "Mexico",
            Self::Canada => "Canada",
            Self::Japan => "Japan",
            Self::SouthKorea => "South Korea",
            Self::Germany => "Germany",
            Self::Vietnam => "Vietnam",
            Self::India => "India",
            Self::Mfn => "Most Favored Nation",
        }
    }
}

impl Display for Country {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Country {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Country {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Country> for &'static str {
    fn from(value: Country) -> Self {
        value.code()
    }
}
