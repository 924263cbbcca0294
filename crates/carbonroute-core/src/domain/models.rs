use serde::{Deserialize, Serialize};

use crate::{ProviderId, UtcDateTime, ValidationError};

/// Facility overhead multiplier used when a request or site does not carry one.
pub const DEFAULT_PUE: f64 = 1.4;

/// Geographic point in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        let location = Self { lat, lon };
        location.validate()?;
        Ok(location)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        ensure_finite("lat", self.lat)?;
        ensure_finite("lon", self.lon)?;
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::LatitudeOutOfRange { value: self.lat });
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(ValidationError::LongitudeOutOfRange { value: self.lon });
        }
        Ok(())
    }
}

/// Normalized carbon-intensity observation from one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CiReading {
    source: ProviderId,
    #[serde(skip_serializing_if = "Option::is_none")]
    zone: Option<String>,
    timestamp: UtcDateTime,
    ci_value: f64,
    valid: bool,
}

impl CiReading {
    pub fn new(
        source: ProviderId,
        zone: Option<String>,
        timestamp: UtcDateTime,
        ci_value: f64,
        valid: bool,
    ) -> Result<Self, ValidationError> {
        ensure_non_negative("ci_value", ci_value)?;
        let zone = zone.filter(|zone| !zone.trim().is_empty());

        Ok(Self {
            source,
            zone,
            timestamp,
            ci_value,
            valid,
        })
    }

    pub fn source(&self) -> ProviderId {
        self.source
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn timestamp(&self) -> UtcDateTime {
        self.timestamp
    }

    pub fn ci_value(&self) -> f64 {
        self.ci_value
    }

    pub fn valid(&self) -> bool {
        self.valid
    }
}

/// One hourly point of a forecast series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: UtcDateTime,
    pub ci_value: f64,
}

impl ForecastPoint {
    pub fn new(timestamp: UtcDateTime, ci_value: f64) -> Result<Self, ValidationError> {
        ensure_non_negative("ci_value", ci_value)?;
        Ok(Self {
            timestamp,
            ci_value,
        })
    }
}

/// The hour a request is about: `[start, start + 1h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestWindow {
    pub start: UtcDateTime,
    pub end: UtcDateTime,
}

impl RequestWindow {
    pub fn hour_of(instant: UtcDateTime) -> Self {
        let start = instant.floor_to_hour();
        Self {
            start,
            end: start.plus_hours(1),
        }
    }
}

/// Input to a single carbon-intensity resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRequest {
    pub location: Location,
    pub pue: f64,
    /// Absent means "latest" semantics.
    pub target_time: Option<UtcDateTime>,
    pub energy_kwh: Option<f64>,
}

impl ResolutionRequest {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        Ok(Self {
            location: Location::new(lat, lon)?,
            pue: DEFAULT_PUE,
            target_time: None,
            energy_kwh: None,
        })
    }

    pub fn with_pue(mut self, pue: f64) -> Result<Self, ValidationError> {
        validate_pue(pue)?;
        self.pue = pue;
        Ok(self)
    }

    pub fn at(mut self, target_time: UtcDateTime) -> Self {
        self.target_time = Some(target_time);
        self
    }

    pub fn with_energy_kwh(mut self, energy_kwh: f64) -> Result<Self, ValidationError> {
        ensure_non_negative("energy_kwh", energy_kwh)?;
        self.energy_kwh = Some(energy_kwh);
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.location.validate()?;
        validate_pue(self.pue)?;
        if let Some(energy_kwh) = self.energy_kwh {
            ensure_non_negative("energy_kwh", energy_kwh)?;
        }
        Ok(())
    }
}

/// A compute site that can be ranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    #[serde(rename = "site_name")]
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pue: Option<f64>,
}

impl Site {
    pub fn new(
        name: impl Into<String>,
        lat: f64,
        lon: f64,
        pue: Option<f64>,
    ) -> Result<Self, ValidationError> {
        let site = Self {
            name: name.into(),
            lat,
            lon,
            pue,
        };
        site.validate()?;
        Ok(site)
    }

    /// Fields are public and deserializable, so sites built without
    /// [`Site::new`] are checked here before use.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptySiteName);
        }
        self.location().validate()?;
        if let Some(pue) = self.pue {
            validate_pue(pue)?;
        }
        Ok(())
    }

    pub fn location(&self) -> Location {
        Location {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

pub fn validate_pue(pue: f64) -> Result<(), ValidationError> {
    ensure_finite("pue", pue)?;
    if pue < 1.0 {
        return Err(ValidationError::PueTooLow { value: pue });
    }
    Ok(())
}

fn ensure_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

pub(crate) fn ensure_non_negative(field: &'static str, value: f64) -> Result<(), ValidationError> {
    ensure_finite(field, value)?;
    if value < 0.0 {
        return Err(ValidationError::NegativeValue { field });
    }
    Ok(())
}
