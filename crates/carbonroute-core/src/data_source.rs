//! Provider adapter contract and request/response types.
//!
//! Every upstream carbon-intensity service is wrapped in a [`CarbonSource`]. An
//! adapter fetches a raw payload, then normalizes it into a [`CiReading`] (or a
//! forecast series). The router never inspects raw payloads itself; it only asks
//! the adapter to [`classify`](CarbonSource::classify) failures.
//!
//! # Endpoints
//!
//! | Endpoint | Meaning |
//! |----------|---------|
//! | [`Endpoint::Latest`] | Most recent reading for a point |
//! | [`Endpoint::AtTime`] | Reading for a specific hour |
//! | [`Endpoint::Series`] | Whole forecast series for a point |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::{CiReading, ForecastPoint, Location, ProviderId, RequestWindow, UtcDateTime};

/// Data endpoint type used for routing and capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Latest,
    AtTime,
    Series,
}

impl Endpoint {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::AtTime => "at_time",
            Self::Series => "series",
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported endpoint matrix for a provider adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub latest: bool,
    pub at_time: bool,
    pub series: bool,
}

impl CapabilitySet {
    pub const fn new(latest: bool, at_time: bool, series: bool) -> Self {
        Self {
            latest,
            at_time,
            series,
        }
    }

    pub const fn full() -> Self {
        Self::new(true, true, true)
    }

    pub const fn supports(self, endpoint: Endpoint) -> bool {
        match endpoint {
            Endpoint::Latest => self.latest,
            Endpoint::AtTime => self.at_time,
            Endpoint::Series => self.series,
        }
    }

    pub fn supported_endpoints(self) -> Vec<&'static str> {
        [Endpoint::Latest, Endpoint::AtTime, Endpoint::Series]
            .into_iter()
            .filter(|endpoint| self.supports(*endpoint))
            .map(Endpoint::as_str)
            .collect()
    }
}

/// Adapter-level error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Auth,
    Transient,
    DataAbsent,
    Malformed,
    InvalidRequest,
    UnsupportedEndpoint,
    CircuitOpen,
    Cancelled,
    Internal,
}

/// Structured source error used by router fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    status: Option<u16>,
}

impl SourceError {
    fn with_kind(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Auth, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Transient, message)
    }

    pub fn data_absent(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::DataAbsent, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Malformed, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::InvalidRequest, message)
    }

    pub fn unsupported_endpoint(endpoint: Endpoint) -> Self {
        Self::with_kind(
            SourceErrorKind::UnsupportedEndpoint,
            format!("endpoint '{endpoint}' is not supported by this source"),
        )
    }

    pub fn circuit_open(provider: ProviderId) -> Self {
        Self::with_kind(
            SourceErrorKind::CircuitOpen,
            format!("{provider} circuit breaker is open; skipping upstream call"),
        )
    }

    pub fn cancelled() -> Self {
        Self::with_kind(SourceErrorKind::Cancelled, "request was cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(SourceErrorKind::Internal, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn retryable(&self) -> bool {
        matches!(self.kind, SourceErrorKind::Transient)
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Auth => "source.auth",
            SourceErrorKind::Transient => "source.transient",
            SourceErrorKind::DataAbsent => "source.data_absent",
            SourceErrorKind::Malformed => "source.malformed",
            SourceErrorKind::InvalidRequest => "source.invalid_request",
            SourceErrorKind::UnsupportedEndpoint => "source.unsupported_endpoint",
            SourceErrorKind::CircuitOpen => "source.circuit_open",
            SourceErrorKind::Cancelled => "source.cancelled",
            SourceErrorKind::Internal => "source.internal",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {status}, {})", self.message, self.code()),
            None => write!(f, "{} ({})", self.message, self.code()),
        }
    }
}

impl std::error::Error for SourceError {}

/// How the router reacts to a failed adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Credentials missing or rejected: no retry, fall through to the next adapter.
    Auth,
    /// Worth retrying on the same adapter; fall through once the budget is spent.
    Transient,
    /// The upstream answered but has nothing for this point: surfaced to the caller.
    DataAbsent,
    /// Retrying cannot help: fall through to the next adapter.
    Unrecoverable,
    /// The caller gave up: stop the whole resolution.
    Aborted,
}

impl FailureClass {
    pub const fn of(error: &SourceError) -> Self {
        match error.kind() {
            SourceErrorKind::Auth => Self::Auth,
            SourceErrorKind::Transient => Self::Transient,
            SourceErrorKind::DataAbsent => Self::DataAbsent,
            SourceErrorKind::Cancelled => Self::Aborted,
            SourceErrorKind::Malformed
            | SourceErrorKind::InvalidRequest
            | SourceErrorKind::UnsupportedEndpoint
            | SourceErrorKind::CircuitOpen
            | SourceErrorKind::Internal => Self::Unrecoverable,
        }
    }

    pub const fn permits_fallback(self) -> bool {
        matches!(self, Self::Auth | Self::Transient | Self::Unrecoverable)
    }
}

/// Everything an adapter needs to query its upstream for one point.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub endpoint: Endpoint,
    pub location: Location,
    pub window: RequestWindow,
    /// Hour-floored instant for `AtTime` requests.
    pub target: Option<UtcDateTime>,
}

impl FetchRequest {
    pub fn latest(location: Location, now: UtcDateTime) -> Self {
        Self {
            endpoint: Endpoint::Latest,
            location,
            window: RequestWindow::hour_of(now),
            target: None,
        }
    }

    pub fn at_time(location: Location, target: UtcDateTime) -> Self {
        let target = target.floor_to_hour();
        Self {
            endpoint: Endpoint::AtTime,
            location,
            window: RequestWindow::hour_of(target),
            target: Some(target),
        }
    }

    pub fn series(location: Location, now: UtcDateTime) -> Self {
        Self {
            endpoint: Endpoint::Series,
            location,
            window: RequestWindow::hour_of(now),
            target: None,
        }
    }

    /// The instant a reading should describe: the target hour, else the window start.
    pub fn effective_target(&self) -> UtcDateTime {
        self.target.unwrap_or(self.window.start)
    }
}

/// Upstream response body, kept verbatim so pending readings can be retained as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload(serde_json::Value);

impl RawPayload {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SourceError>> + Send + 'a>>;

/// Provider adapter contract.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`id`](CarbonSource::id) | Unique provider identifier |
/// | [`capabilities`](CarbonSource::capabilities) | Supported endpoints |
/// | [`fetch`](CarbonSource::fetch) | One upstream call, no retries |
/// | [`normalize`](CarbonSource::normalize) | Raw payload to [`CiReading`] |
/// | [`normalize_series`](CarbonSource::normalize_series) | Raw payload to forecast points |
/// | [`classify`](CarbonSource::classify) | Failure class used by the router |
///
/// Implementations are shared behind `Arc` across concurrent resolutions and must
/// be `Send + Sync`. Retries, throttling and fallback live in the router, so
/// `fetch` should make exactly one upstream attempt.
pub trait CarbonSource: Send + Sync {
    fn id(&self) -> ProviderId;

    fn capabilities(&self) -> CapabilitySet;

    /// Performs a single upstream call for `req`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] for transport failures, non-success statuses,
    /// missing credentials or an open circuit breaker.
    fn fetch<'a>(&'a self, req: &'a FetchRequest) -> SourceFuture<'a, RawPayload>;

    /// Turns a raw payload into a reading for `req`.
    ///
    /// # Errors
    ///
    /// Returns a data-absent error for empty payloads and a malformed error for
    /// payloads that do not match the upstream contract.
    fn normalize(&self, payload: &RawPayload, req: &FetchRequest) -> Result<CiReading, SourceError>;

    /// Turns a raw payload into a time-ordered forecast series.
    ///
    /// # Errors
    ///
    /// Adapters without a series endpoint keep the default, which reports
    /// the endpoint as unsupported.
    fn normalize_series(&self, payload: &RawPayload) -> Result<Vec<ForecastPoint>, SourceError> {
        let _ = payload;
        Err(SourceError::unsupported_endpoint(Endpoint::Series))
    }

    fn classify(&self, error: &SourceError) -> FailureClass {
        FailureClass::of(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_follows_error_kind() {
        assert_eq!(FailureClass::of(&SourceError::auth("no token")), FailureClass::Auth);
        assert_eq!(
            FailureClass::of(&SourceError::transient("timeout").with_status(503)),
            FailureClass::Transient
        );
        assert_eq!(
            FailureClass::of(&SourceError::data_absent("empty")),
            FailureClass::DataAbsent
        );
        assert_eq!(
            FailureClass::of(&SourceError::circuit_open(ProviderId::FootprintWindow)),
            FailureClass::Unrecoverable
        );
        assert_eq!(FailureClass::of(&SourceError::cancelled()), FailureClass::Aborted);
        assert!(!FailureClass::DataAbsent.permits_fallback());
        assert!(FailureClass::Auth.permits_fallback());
    }

    #[test]
    fn at_time_requests_floor_the_target() {
        let location = Location::new(52.0, 5.0).expect("valid location");
        let target = UtcDateTime::parse("2025-03-01T10:40:00Z").expect("valid time");
        let request = FetchRequest::at_time(location, target);

        assert_eq!(
            request.target.map(UtcDateTime::format_rfc3339).as_deref(),
            Some("2025-03-01T10:00:00Z")
        );
        assert_eq!(request.window.end.format_rfc3339(), "2025-03-01T11:00:00Z");
        assert_eq!(request.effective_target(), request.window.start);
    }

    #[test]
    fn capability_listing_is_ordered() {
        assert_eq!(
            CapabilitySet::new(false, true, true).supported_endpoints(),
            vec!["at_time", "series"]
        );
    }
}
