use std::sync::Arc;

use serde::Deserialize;

use super::{
    coordinate, decode, parse_timestamp, HttpTransport, OneOrMany, ELECTRICITY_MAPS_LATEST_URL,
};
use crate::data_source::{
    CapabilitySet, CarbonSource, Endpoint, FetchRequest, RawPayload, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::{CiReading, ProviderId};

const PROVIDER: ProviderId = ProviderId::ElectricityMapsLatest;

/// Electricity Maps `carbon-intensity/latest` for a coordinate.
#[derive(Clone)]
pub struct ElectricityMapsLatestAdapter {
    transport: HttpTransport,
    url: String,
    token: Option<String>,
}

impl ElectricityMapsLatestAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, token: Option<String>) -> Self {
        Self {
            transport: HttpTransport::new(PROVIDER, http_client),
            url: String::from(ELECTRICITY_MAPS_LATEST_URL),
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
#[serde(rename_all = "camelCase")]
struct LatestPayload {
    carbon_intensity: Option<f64>,
    datetime: Option<String>,
    zone: Option<String>,
}

impl CarbonSource for ElectricityMapsLatestAdapter {
    fn id(&self) -> ProviderId {
        PROVIDER
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, false, false)
    }

    fn fetch<'a>(&'a self, req: &'a FetchRequest) -> SourceFuture<'a, RawPayload> {
        Box::pin(async move {
            if req.endpoint != Endpoint::Latest {
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
        let latest = decode::<OneOrMany<LatestPayload>>(PROVIDER, payload)?.into_first(PROVIDER)?;

        let ci_value = latest
            .carbon_intensity
            .ok_or_else(|| SourceError::data_absent("electricitymaps returned no carbonIntensity"))?;
        let timestamp = match latest.datetime.as_deref() {
            Some(datetime) => parse_timestamp(PROVIDER, "datetime", datetime)?,
            None => req.effective_target(),
        };

        CiReading::new(PROVIDER, latest.zone, timestamp, ci_value, true)
            .map_err(|error| SourceError::malformed(format!("{PROVIDER}: {error}")))
    }
}
