use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical identifiers of the upstream trade-data providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Census,
    Dataweb,
    FederalRegister,
    Bea,
    Gnews,
}

impl SourceId {
    pub const ALL: [Self; 5] = [
        Self::Census,
        Self::Dataweb,
        Self::FederalRegister,
        Self::Bea,
        Self::Gnews,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Census => "census",
            Self::Dataweb => "dataweb",
            Self::FederalRegister => "federal_register",
            Self::Bea => "bea",
            Self::Gnews => "gnews",
        }
    }

    /// Whether the provider rejects anonymous calls.
    pub const fn requires_credential(self) -> bool {
        !matches!(self, Self::FederalRegister)
    }

    /// Environment variables consulted for the credential, in priority order.
    pub const fn credential_env_vars(self) -> [&'static str; 2] {
        match self {
            Self::Census => ["TRADEWATCH_CENSUS_API_KEY", "CENSUS_API_KEY"],
            Self::Dataweb => ["TRADEWATCH_DATAWEB_API_KEY", "DATAWEB_TOKEN"],
            Self::FederalRegister => [
                "TRADEWATCH_FEDERAL_REGISTER_API_KEY",
                "FEDERAL_REGISTER_API_KEY",
            ],
            Self::Bea => ["TRADEWATCH_BEA_API_KEY", "BEA_API_KEY"],
            Self::Gnews => ["TRADEWATCH_GNEWS_API_KEY", "GNEWS_API_KEY"],
        }
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "census" => Ok(Self::Census),
            "dataweb" | "usitc" => Ok(Self::Dataweb),
            "federal_register" | "federalregister" => Ok(Self::FederalRegister),
            "bea" => Ok(Self::Bea),
            "gnews" => Ok(Self::Gnews),
            _ => Err(ValidationError::UnknownSource {
                value: value.trim().to_owned(),
            }),
        }
    }
}
