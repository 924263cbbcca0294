use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in route metadata and envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    ElectricityMapsLatest,
    ElectricityMapsForecast,
    FootprintWindow,
    Mock,
}

impl ProviderId {
    pub const ALL: [Self; 4] = [
        Self::ElectricityMapsLatest,
        Self::ElectricityMapsForecast,
        Self::FootprintWindow,
        Self::Mock,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ElectricityMapsLatest => "electricity_maps_latest",
            Self::ElectricityMapsForecast => "electricity_maps_forecast",
            Self::FootprintWindow => "footprint_window",
            Self::Mock => "mock",
        }
    }

    /// Upstream service name reported as `source` in resolution output.
    pub const fn vendor(self) -> &'static str {
        match self {
            Self::ElectricityMapsLatest | Self::ElectricityMapsForecast => "electricitymaps",
            Self::FootprintWindow => "footprint_window",
            Self::Mock => "mock",
        }
    }

    /// Expand a vendor name from a provider-order list into adapter ids.
    pub fn expand_vendor(value: &str) -> Result<Vec<Self>, ValidationError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "electricitymaps" | "electricity_maps" => {
                Ok(vec![Self::ElectricityMapsLatest, Self::ElectricityMapsForecast])
            }
            other => other.parse().map(|provider| vec![provider]),
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "electricity_maps_latest" => Ok(Self::ElectricityMapsLatest),
            "electricity_maps_forecast" => Ok(Self::ElectricityMapsForecast),
            "footprint_window" | "footprint" => Ok(Self::FootprintWindow),
            "mock" => Ok(Self::Mock),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
