use std::sync::Arc;

use serde::Deserialize;

use super::{
    coordinate, decode, parse_timestamp, HttpTransport, OneOrMany, ELECTRICITY_MAPS_FORECAST_URL,
};
use crate::data_source::{
    CapabilitySet, CarbonSource, Endpoint, FetchRequest, RawPayload, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::matcher::{nearest_point, MatchError};
use crate::{CiReading, ForecastPoint, ProviderId};

const PROVIDER: ProviderId = ProviderId::ElectricityMapsForecast;

/// Electricity Maps hourly forecast; answers time-specific requests through the
/// nearest-timestamp matcher.
#[derive(Clone)]
pub struct ElectricityMapsForecastAdapter {
    transport: HttpTransport,
    url: String,
    token: Option<String>,
}

impl ElectricityMapsForecastAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, token: Option<String>) -> Self {
        Self {
            transport: HttpTransport::new(PROVIDER, http_client),
            url: String::from(ELECTRICITY_MAPS_FORECAST_URL),
            token: token.filter(|token| !token.trim().is_empty()),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.transport = self.transport.with_timeout_ms(timeout_ms);
        self
    }
}

#[derive(Debug, Deserialize)]
struct ForecastPayload {
    zone: Option<String>,
    #[serde(default)]
    forecast: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForecastEntry {
    datetime: String,
    carbon_intensity: Option<f64>,
}

/// Zone plus the time-ordered points that carry a value.
fn parse_forecast(payload: &RawPayload) -> Result<(Option<String>, Vec<ForecastPoint>), SourceError> {
    let forecast = decode::<OneOrMany<ForecastPayload>>(PROVIDER, payload)?.into_first(PROVIDER)?;

    let mut points = Vec::with_capacity(forecast.forecast.len());
    for entry in forecast.forecast {
        let Some(ci_value) = entry.carbon_intensity else {
            continue;
        };
        let timestamp = parse_timestamp(PROVIDER, "datetime", &entry.datetime)?;
        let point = ForecastPoint::new(timestamp, ci_value)
            .map_err(|error| SourceError::malformed(format!("{PROVIDER}: {error}")))?;
        points.push(point);
    }
    points.sort_by_key(|point| point.timestamp);

    Ok((forecast.zone, points))
}

impl CarbonSource for ElectricityMapsForecastAdapter {
    fn id(&self) -> ProviderId {
        PROVIDER
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(false, true, true)
    }

    fn fetch<'a>(&'a self, req: &'a FetchRequest) -> SourceFuture<'a, RawPayload> {
        Box::pin(async move {
            if req.endpoint == Endpoint::Latest {
                return Err(SourceError::unsupported_endpoint(req.endpoint));
            }
            let token = self
                .token
                .as_deref()
                .ok_or_else(|| SourceError::auth("ELECTRICITYMAPS_TOKEN is not configured"))?;

            let request = HttpRequest::get(&self.url)
                .with_query("lat", coordinate(req.location.lat))
                .with_query("lon", coordinate(req.location.lon))
                .with_auth(&HttpAuth::Header {
                    name: String::from("auth-token"),
                    value: token.to_owned(),
                });

            self.transport.get_json(request).await
        })
    }

    fn normalize(&self, payload: &RawPayload, req: &FetchRequest) -> Result<CiReading, SourceError> {
        let (zone, points) = parse_forecast(payload)?;
        let point = nearest_point(&points, req.effective_target()).map_err(|error| match error {
            MatchError::EmptySeries => {
                SourceError::data_absent("electricitymaps forecast has no usable points")
            }
        })?;

        CiReading::new(PROVIDER, zone, point.timestamp, point.ci_value, true)
            .map_err(|error| SourceError::malformed(format!("{PROVIDER}: {error}")))
    }

    fn normalize_series(&self, payload: &RawPayload) -> Result<Vec<ForecastPoint>, SourceError> {
        parse_forecast(payload).map(|(_, points)| points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::ScriptedHttpClient;
    use crate::{Location, UtcDateTime};

    fn adapter() -> ElectricityMapsForecastAdapter {
        ElectricityMapsForecastAdapter::new(
            Arc::new(ScriptedHttpClient::new()),
            Some(String::from("secret")),
        )
    }

    fn at(target: &str) -> FetchRequest {
        FetchRequest::at_time(
            Location::new(46.2, 6.1).expect("valid location"),
            UtcDateTime::parse(target).expect("valid time"),
        )
    }

    fn payload() -> RawPayload {
        RawPayload::new(serde_json::json!({
            "zone": "CH",
            "forecast": [
                {"datetime": "2025-03-01T13:00:00.000Z", "carbonIntensity": 300},
                {"datetime": "2025-03-01T10:00:00.000Z", "carbonIntensity": 100},
                {"datetime": "2025-03-01T11:00:00.000Z", "carbonIntensity": 200},
                {"datetime": "2025-03-01T12:00:00.000Z", "carbonIntensity": null}
            ]
        }))
    }

    #[test]
    fn picks_the_matching_hour() {
        let reading = adapter()
            .normalize(&payload(), &at("2025-03-01T11:30:00Z"))
            .expect("match");

        assert_eq!(reading.ci_value(), 200.0);
        assert_eq!(reading.zone(), Some("CH"));
        assert_eq!(reading.timestamp().format_rfc3339(), "2025-03-01T11:00:00Z");
    }

    #[test]
    fn null_points_are_skipped_before_matching() {
        // 12:00 is null, so 11:00 and 13:00 tie and the earlier one wins.
        let reading = adapter()
            .normalize(&payload(), &at("2025-03-01T12:00:00Z"))
            .expect("match");
        assert_eq!(reading.ci_value(), 200.0);
    }

    #[test]
    fn series_is_time_ordered() {
        let points = adapter().normalize_series(&payload()).expect("series");
        let values: Vec<f64> = points.iter().map(|point| point.ci_value).collect();
        assert_eq!(values, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn empty_forecast_is_data_absent_for_a_reading_but_empty_for_a_series() {
        let empty = RawPayload::new(serde_json::json!({"zone": "CH", "forecast": []}));

        let error = adapter()
            .normalize(&empty, &at("2025-03-01T12:00:00Z"))
            .expect_err("nothing to match");
        assert_eq!(error.kind(), SourceErrorKind::DataAbsent);
        assert!(adapter().normalize_series(&empty).expect("series").is_empty());
    }

    #[tokio::test]
    async fn latest_endpoint_is_not_served() {
        let now = UtcDateTime::parse("2025-03-01T10:00:00Z").expect("valid time");
        let req = FetchRequest::latest(Location::new(46.2, 6.1).expect("valid location"), now);

        let error = adapter().fetch(&req).await.expect_err("unsupported");
        assert_eq!(error.kind(), SourceErrorKind::UnsupportedEndpoint);
    }
}
