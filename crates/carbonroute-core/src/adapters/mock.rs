use serde_json::json;

use super::{decode, parse_timestamp, OneOrMany};
use crate::data_source::{
    CapabilitySet, CarbonSource, Endpoint, FetchRequest, RawPayload, SourceError, SourceFuture,
};
use crate::{CiReading, ForecastPoint, ProviderId};

const PROVIDER: ProviderId = ProviderId::Mock;
const FORECAST_HOURS: i64 = 72;
const ZONE: &str = "MOCK";

#[derive(Debug, Clone, Copy, PartialEq)]
enum MockValue {
    Random,
    Fixed(f64),
}

/// Offline adapter: uniform random intensities in `150..=600`, no network.
#[derive(Debug, Clone)]
pub struct MockAdapter {
    value: MockValue,
    valid: bool,
    capabilities: CapabilitySet,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            value: MockValue::Random,
            valid: true,
            capabilities: CapabilitySet::full(),
        }
    }

    /// Always answers `ci_value`.
    pub fn fixed(ci_value: f64) -> Self {
        Self {
            value: MockValue::Fixed(ci_value),
            ..Self::new()
        }
    }

    /// Marks every reading with the given `valid` flag.
    pub fn with_valid(mut self, valid: bool) -> Self {
        self.valid = valid;
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn sample(&self) -> f64 {
        match self.value {
            MockValue::Random => f64::from(fastrand::u32(150..=600)),
            MockValue::Fixed(value) => value,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MockPoint {
    datetime: String,
    carbon_intensity: f64,
    #[serde(default)]
    valid: Option<bool>,
}

#[derive(serde::Deserialize)]
struct MockForecast {
    forecast: Vec<MockPoint>,
}

impl CarbonSource for MockAdapter {
    fn id(&self) -> ProviderId {
        PROVIDER
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    fn fetch<'a>(&'a self, req: &'a FetchRequest) -> SourceFuture<'a, RawPayload> {
        Box::pin(async move {
            if !self.capabilities.supports(req.endpoint) {
                return Err(SourceError::unsupported_endpoint(req.endpoint));
            }

            let body = match req.endpoint {
                Endpoint::Latest | Endpoint::AtTime => json!({
                    "zone": ZONE,
                    "datetime": req.effective_target().format_rfc3339(),
                    "carbonIntensity": self.sample(),
                    "valid": self.valid,
                }),
                Endpoint::Series => {
                    let forecast: Vec<_> = (0..FORECAST_HOURS)
                        .map(|hour| {
                            json!({
                                "datetime": req.window.start.plus_hours(hour).format_rfc3339(),
                                "carbonIntensity": self.sample(),
                            })
                        })
                        .collect();
                    json!({ "zone": ZONE, "forecast": forecast })
                }
            };
            Ok(RawPayload::new(body))
        })
    }

    fn normalize(&self, payload: &RawPayload, _req: &FetchRequest) -> Result<CiReading, SourceError> {
        let point = decode::<OneOrMany<MockPoint>>(PROVIDER, payload)?.into_first(PROVIDER)?;
        let timestamp = parse_timestamp(PROVIDER, "datetime", &point.datetime)?;

        CiReading::new(
            PROVIDER,
            Some(String::from(ZONE)),
            timestamp,
            point.carbon_intensity,
            point.valid.unwrap_or(true),
        )
        .map_err(|error| SourceError::malformed(format!("{PROVIDER}: {error}")))
    }

    fn normalize_series(&self, payload: &RawPayload) -> Result<Vec<ForecastPoint>, SourceError> {
        let forecast = decode::<MockForecast>(PROVIDER, payload)?;
        forecast
            .forecast
            .into_iter()
            .map(|point| {
                let timestamp = parse_timestamp(PROVIDER, "datetime", &point.datetime)?;
                ForecastPoint::new(timestamp, point.carbon_intensity)
                    .map_err(|error| SourceError::malformed(format!("{PROVIDER}: {error}")))
            })
            .collect()
    }
}
