//! Core of carbonroute.
//!
//! This crate contains:
//! - Domain models and validation
//! - Provider adapters behind the [`CarbonSource`] trait
//! - Retry, throttling, circuit breaking and ordered provider fallback
//! - The resolution engine, forecast summaries and site ranking
//! - Environment configuration and the response envelope
//!
//! Pending readings are persisted through `carbonroute-retainment`, re-exported
//! as [`retainment`].

pub mod adapters;
pub mod calculator;
pub mod circuit_breaker;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod matcher;
pub mod provider_policy;
pub mod ranking;
pub mod retry;
pub mod routing;
pub mod sites;
pub mod source;
pub mod summary;
pub mod throttling;

pub use carbonroute_retainment as retainment;

pub use adapters::{
    ElectricityMapsForecastAdapter, ElectricityMapsLatestAdapter, FootprintWindowAdapter,
    MockAdapter,
};
pub use calculator::{derive, effective_ci, footprint, Derived, Footprint};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{ConfigError, EngineConfig};
pub use data_source::{
    CapabilitySet, CarbonSource, Endpoint, FailureClass, FetchRequest, RawPayload, SourceError,
    SourceErrorKind, SourceFuture,
};
pub use domain::{
    validate_pue, CiReading, ForecastPoint, Location, RequestWindow, ResolutionRequest, Site,
    UtcDateTime, DEFAULT_PUE,
};
pub use engine::{
    CarbonEngine, CiResolution, EngineBuilder, ForecastResolution, PendingResolution, Resolution,
    ResolutionOutcome, RouteMeta,
};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta, SCHEMA_VERSION};
pub use error::{CoreError, ResolveError, ValidationError};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    ScriptedHttpClient,
};
pub use matcher::{nearest_point, MatchError};
pub use provider_policy::ProviderPolicy;
pub use ranking::{
    FailSoftPolicy, RankRequest, RankedSite, RankingReport, SiteFailure, SiteRanker, SyntheticCi,
};
pub use retry::{Backoff, RetryConfig, RetryExecutor};
pub use routing::{
    AdapterSlot, FallbackOrchestrator, RouteError, RouteFailure, RouteSuccess, RoutedReading,
};
pub use sites::{SiteError, SiteLoad, SiteRepository};
pub use source::ProviderId;
pub use summary::ForecastSummary;
pub use throttling::Throttle;
