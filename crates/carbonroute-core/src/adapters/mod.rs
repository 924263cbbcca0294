//! Provider adapter implementations.
//!
//! | Adapter | Endpoints | Upstream |
//! |---------|-----------|----------|
//! | [`ElectricityMapsLatestAdapter`] | latest | `/v3/carbon-intensity/latest` |
//! | [`ElectricityMapsForecastAdapter`] | at_time, series | `/v3/carbon-intensity/forecast` |
//! | [`FootprintWindowAdapter`] | latest, at_time | window query with a `valid` flag |
//! | [`MockAdapter`] | all | none (random values) |

mod footprint_window;
mod forecast;
mod latest;
mod mock;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::data_source::{RawPayload, SourceError};
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::{ProviderId, UtcDateTime};

pub use footprint_window::FootprintWindowAdapter;
pub use forecast::ElectricityMapsForecastAdapter;
pub use latest::ElectricityMapsLatestAdapter;
pub use mock::MockAdapter;

pub const ELECTRICITY_MAPS_LATEST_URL: &str =
    "https://api.electricitymap.org/v3/carbon-intensity/latest";
pub const ELECTRICITY_MAPS_FORECAST_URL: &str =
    "https://api.electricitymap.org/v3/carbon-intensity/forecast";

pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// HTTP access shared by the networked adapters: one GET per call, status
/// mapping and JSON parsing. Circuit breaking happens per call in the router.
#[derive(Clone)]
pub(crate) struct HttpTransport {
    provider: ProviderId,
    http_client: Arc<dyn HttpClient>,
    timeout_ms: u64,
}

impl HttpTransport {
    pub(crate) fn new(provider: ProviderId, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            provider,
            http_client,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    pub(crate) fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// One GET returning the parsed JSON body.
    pub(crate) async fn get_json(&self, request: HttpRequest) -> Result<RawPayload, SourceError> {
        let request = request.with_timeout_ms(self.timeout_ms);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| transport_error(self.provider, &error))?;

        if !response.is_success() {
            return Err(status_error(self.provider, &response));
        }

        let value = serde_json::from_str(&response.body).map_err(|error| {
            SourceError::malformed(format!("{} returned invalid JSON: {error}", self.provider))
        })?;
        Ok(RawPayload::new(value))
    }
}

fn transport_error(provider: ProviderId, error: &HttpError) -> SourceError {
    if error.timed_out() {
        SourceError::transient(format!("{provider} timed out: {}", error.message()))
    } else {
        SourceError::transient(format!("{provider} transport error: {}", error.message()))
    }
}

fn is_upstream_fault(status: u16) -> bool {
    status == 408 || status == 429 || status >= 500
}

/// Map a non-success status onto the failure taxonomy.
pub(crate) fn status_error(provider: ProviderId, response: &HttpResponse) -> SourceError {
    let status = response.status;
    let error = match status {
        401 | 403 => SourceError::auth(format!("{provider} rejected credentials")),
        status if is_upstream_fault(status) => {
            SourceError::transient(format!("{provider} returned status {status}"))
        }
        _ => SourceError::invalid_request(format!("{provider} returned status {status}")),
    };
    error.with_status(status)
}

/// Payloads may arrive as one object or an array whose first element is used.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_first(self, provider: ProviderId) -> Result<T, SourceError> {
        match self {
            Self::One(value) => Ok(value),
            Self::Many(values) => values.into_iter().next().ok_or_else(|| {
                SourceError::data_absent(format!("{provider} returned an empty array"))
            }),
        }
    }
}

pub(crate) fn decode<T: DeserializeOwned>(
    provider: ProviderId,
    payload: &RawPayload,
) -> Result<T, SourceError> {
    T::deserialize(payload.value()).map_err(|error| {
        SourceError::malformed(format!("{provider} payload does not match contract: {error}"))
    })
}

pub(crate) fn parse_timestamp(
    provider: ProviderId,
    field: &str,
    value: &str,
) -> Result<UtcDateTime, SourceError> {
    UtcDateTime::parse(value).map_err(|_| {
        SourceError::malformed(format!("{provider} sent unparseable {field} '{value}'"))
    })
}

pub(crate) fn coordinate(value: f64) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;

    #[test]
    fn status_codes_map_to_failure_kinds() {
        let kind = |status| {
            status_error(
                ProviderId::FootprintWindow,
                &HttpResponse::with_status(status, ""),
            )
            .kind()
        };

        assert_eq!(kind(401), SourceErrorKind::Auth);
        assert_eq!(kind(403), SourceErrorKind::Auth);
        assert_eq!(kind(408), SourceErrorKind::Transient);
        assert_eq!(kind(429), SourceErrorKind::Transient);
        assert_eq!(kind(502), SourceErrorKind::Transient);
        assert_eq!(kind(404), SourceErrorKind::InvalidRequest);
    }

    #[test]
    fn empty_array_is_data_absent() {
        let payload: OneOrMany<serde_json::Value> =
            serde_json::from_str("[]").expect("valid json");
        let error = payload
            .into_first(ProviderId::FootprintWindow)
            .expect_err("empty array");
        assert_eq!(error.kind(), SourceErrorKind::DataAbsent);
    }

    #[tokio::test]
    async fn every_call_reaches_the_upstream() {
        use crate::http_client::ScriptedHttpClient;

        let client = Arc::new(ScriptedHttpClient::always(Ok(HttpResponse::with_status(
            503, "",
        ))));
        let transport = HttpTransport::new(ProviderId::FootprintWindow, client.clone());

        for _ in 0..6 {
            let error = transport
                .get_json(HttpRequest::get("https://example.test"))
                .await
                .expect_err("503");
            assert_eq!(error.kind(), SourceErrorKind::Transient);
            assert_eq!(error.status(), Some(503));
        }
        assert_eq!(client.call_count(), 6);
    }
}
