use std::sync::Arc;

use serde::Deserialize;

use super::{coordinate, decode, parse_timestamp, HttpTransport, OneOrMany};
use crate::data_source::{
    CapabilitySet, CarbonSource, Endpoint, FetchRequest, RawPayload, SourceError, SourceFuture,
};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::{CiReading, ProviderId};

const PROVIDER: ProviderId = ProviderId::FootprintWindow;

/// Window-based footprint service. Its readings carry a `valid` flag; a reading
/// with `valid=false` is retained instead of being served.
#[derive(Clone)]
pub struct FootprintWindowAdapter {
    transport: HttpTransport,
    url: String,
    auth: HttpAuth,
}

impl FootprintWindowAdapter {
    pub fn new(http_client: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            transport: HttpTransport::new(PROVIDER, http_client),
            url: url.into(),
            auth: HttpAuth::None,
        }
    }

    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.auth = match token.filter(|token| !token.trim().is_empty()) {
            Some(token) => HttpAuth::BearerToken(token),
            None => HttpAuth::None,
        };
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.transport = self.transport.with_timeout_ms(timeout_ms);
        self
    }
}

#[derive(Debug, Deserialize)]
struct WindowPayload {
    value: Option<f64>,
    start: Option<String>,
    zone: Option<String>,
    valid: Option<bool>,
}

impl CarbonSource for FootprintWindowAdapter {
    fn id(&self) -> ProviderId {
        PROVIDER
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(true, true, false)
    }

    fn fetch<'a>(&'a self, req: &'a FetchRequest) -> SourceFuture<'a, RawPayload> {
        Box::pin(async move {
            if req.endpoint == Endpoint::Series {
                return Err(SourceError::unsupported_endpoint(req.endpoint));
            }

            let request = HttpRequest::get(&self.url)
                .with_query("lat", coordinate(req.location.lat))
                .with_query("lon", coordinate(req.location.lon))
                .with_query("start", req.window.start.format_rfc3339())
                .with_query("end", req.window.end.format_rfc3339())
                .with_auth(&self.auth);

            self.transport.get_json(request).await
        })
    }

    fn normalize(&self, payload: &RawPayload, req: &FetchRequest) -> Result<CiReading, SourceError> {
        let window = decode::<OneOrMany<WindowPayload>>(PROVIDER, payload)?.into_first(PROVIDER)?;

        let ci_value = window
            .value
            .ok_or_else(|| SourceError::data_absent("footprint window returned no value"))?;
        let valid = window
            .valid
            .ok_or_else(|| SourceError::malformed("footprint window reading has no valid flag"))?;
        let timestamp = match window.start.as_deref() {
            Some(start) => parse_timestamp(PROVIDER, "start", start)?,
            None => req.window.start,
        };

        CiReading::new(PROVIDER, window.zone, timestamp, ci_value, valid)
            .map_err(|error| SourceError::malformed(format!("{PROVIDER}: {error}")))
    }
}
