//! Single-point resolution: route, derive, or retain.

use std::sync::Arc;
use std::time::Duration;

use carbonroute_retainment::{
    DuckDbRetainmentStore, MemoryRetainmentStore, PendingQuery, PendingReading, RecordId,
    RetainedRecord, RetainmentError, RetainmentStore, StoredRecord,
};
use serde::Serialize;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::adapters::{
    ElectricityMapsForecastAdapter, ElectricityMapsLatestAdapter, FootprintWindowAdapter,
    MockAdapter,
};
use crate::calculator::derive;
use crate::config::EngineConfig;
use crate::data_source::{CarbonSource, FetchRequest};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::retry::RetryConfig;
use crate::routing::{
    AdapterSlot, FallbackOrchestrator, RouteError, RouteSuccess, RoutedReading,
};
use crate::summary::{summarise, ForecastSummary};
use crate::{
    validate_pue, CoreError, EnvelopeError, Location, ProviderId, ResolutionRequest,
    ResolveError, UtcDateTime,
};

/// A served carbon-intensity figure with its derived values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CiResolution {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub datetime: UtcDateTime,
    pub ci_gco2_per_kwh: f64,
    pub pue: f64,
    pub effective_ci_gco2_per_kwh: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfp_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfp_kg: Option<f64>,
}

/// A reading the provider marked as not yet valid. It was retained, not served.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingResolution {
    pub record_id: RecordId,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    pub datetime: UtcDateTime,
    pub lat: f64,
    pub lon: f64,
    pub expires_at: UtcDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Resolved(CiResolution),
    Pending(PendingResolution),
}

impl ResolutionOutcome {
    pub fn resolved(&self) -> Option<&CiResolution> {
        match self {
            Self::Resolved(resolution) => Some(resolution),
            Self::Pending(_) => None,
        }
    }

    pub fn pending(&self) -> Option<&PendingResolution> {
        match self {
            Self::Resolved(_) => None,
            Self::Pending(pending) => Some(pending),
        }
    }
}

/// Which providers were tried and what went wrong on the way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteMeta {
    pub selected_source: ProviderId,
    pub source_chain: Vec<ProviderId>,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
}

impl RouteMeta {
    fn split<T>(success: RouteSuccess<T>) -> (T, Self) {
        let RouteSuccess {
            data,
            selected_source,
            source_chain,
            warnings,
            errors,
            latency_ms,
        } = success;
        (
            data,
            Self {
                selected_source,
                source_chain,
                warnings,
                errors,
                latency_ms,
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub outcome: ResolutionOutcome,
    pub route: RouteMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResolution {
    pub summary: ForecastSummary,
    pub route: RouteMeta,
}

/// Carbon-intensity resolution engine.
pub struct CarbonEngine {
    orchestrator: FallbackOrchestrator,
    store: Arc<dyn RetainmentStore>,
    retainment_ttl: Duration,
}

impl CarbonEngine {
    pub fn new(
        orchestrator: FallbackOrchestrator,
        store: Arc<dyn RetainmentStore>,
        retainment_ttl: Duration,
    ) -> Self {
        Self {
            orchestrator,
            store,
            retainment_ttl,
        }
    }

    pub fn orchestrator(&self) -> &FallbackOrchestrator {
        &self.orchestrator
    }

    pub fn retainment_ttl(&self) -> Duration {
        self.retainment_ttl
    }

    /// Resolve one point.
    ///
    /// With a `target_time` the time-specific endpoint is used, otherwise the
    /// latest one. A reading flagged `valid=false` is written to the retainment
    /// store and comes back as [`ResolutionOutcome::Pending`].
    ///
    /// # Errors
    ///
    /// Validation failures are reported before any upstream call. Routing
    /// failures map to [`ResolveError::DataAbsent`], [`ResolveError::Exhausted`]
    /// or [`ResolveError::Cancelled`]; a failed store write to
    /// [`ResolveError::Retainment`].
    pub async fn resolve(
        &self,
        request: &ResolutionRequest,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        request.validate()?;

        let fetch = match request.target_time {
            Some(target) => FetchRequest::at_time(request.location, target),
            None => FetchRequest::latest(request.location, UtcDateTime::now()),
        };

        let routed = self
            .orchestrator
            .route_reading(&fetch, cancel)
            .await
            .map_err(route_error)?;
        let (RoutedReading { reading, payload }, route) = RouteMeta::split(routed);

        if !reading.valid() {
            let pending = PendingReading {
                provider: reading.source().as_str().to_owned(),
                zone: reading.zone().map(str::to_owned),
                lat: request.location.lat,
                lon: request.location.lon,
                pue: request.pue,
                energy_kwh: request.energy_kwh,
                request_time: fetch.effective_target().into_inner(),
                window_start: fetch.window.start.into_inner(),
                window_end: fetch.window.end.into_inner(),
                raw_payload: payload.into_value(),
            };
            let record =
                RetainedRecord::pending(pending, self.retainment_ttl, OffsetDateTime::now_utc());
            let expires_at = UtcDateTime::from_offset_datetime(record.expires_at);

            let store = Arc::clone(&self.store);
            let record_id = run_blocking(move || store.insert(record)).await?;
            tracing::debug!(%record_id, provider = %reading.source(), "reading is pending");

            return Ok(Resolution {
                outcome: ResolutionOutcome::Pending(PendingResolution {
                    record_id,
                    source: reading.source().vendor().to_owned(),
                    zone: reading.zone().map(str::to_owned),
                    datetime: reading.timestamp(),
                    lat: request.location.lat,
                    lon: request.location.lon,
                    expires_at,
                }),
                route,
            });
        }

        let derived = derive(reading.ci_value(), request.pue, request.energy_kwh)?;
        Ok(Resolution {
            outcome: ResolutionOutcome::Resolved(CiResolution {
                source: reading.source().vendor().to_owned(),
                zone: reading.zone().map(str::to_owned),
                datetime: reading.timestamp(),
                ci_gco2_per_kwh: reading.ci_value(),
                pue: request.pue,
                effective_ci_gco2_per_kwh: derived.effective_ci,
                cfp_g: derived.footprint.map(|footprint| footprint.cfp_g),
                cfp_kg: derived.footprint.map(|footprint| footprint.cfp_kg),
            }),
            route,
        })
    }

    /// Summary statistics of the forecast series for a point.
    pub async fn forecast_summary(
        &self,
        location: Location,
        pue: f64,
        cancel: &CancellationToken,
    ) -> Result<ForecastResolution, ResolveError> {
        location.validate()?;
        validate_pue(pue)?;

        let fetch = FetchRequest::series(location, UtcDateTime::now());
        let routed = self
            .orchestrator
            .route_series(&fetch, cancel)
            .await
            .map_err(route_error)?;
        let (points, route) = RouteMeta::split(routed);

        Ok(ForecastResolution {
            summary: summarise(&points, pue),
            route,
        })
    }

    /// Retained, non-expired readings for the hour containing `request_time`.
    pub async fn find_pending(
        &self,
        location: Location,
        request_time: UtcDateTime,
    ) -> Result<Vec<StoredRecord>, ResolveError> {
        location.validate()?;
        let query = PendingQuery {
            lat: location.lat,
            lon: location.lon,
            request_time: request_time.floor_to_hour().into_inner(),
        };

        let store = Arc::clone(&self.store);
        run_blocking(move || store.find_pending(&query, OffsetDateTime::now_utc())).await
    }

    pub async fn purge_expired(&self) -> Result<usize, ResolveError> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.purge_expired(OffsetDateTime::now_utc())).await
    }

    pub async fn retained_count(&self) -> Result<usize, ResolveError> {
        let store = Arc::clone(&self.store);
        run_blocking(move || store.count(OffsetDateTime::now_utc())).await
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T, ResolveError>
where
    F: FnOnce() -> Result<T, RetainmentError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| ResolveError::Internal(format!("retainment task failed: {error}")))?
        .map_err(ResolveError::from)
}

fn route_error(error: RouteError) -> ResolveError {
    match error {
        RouteError::DataAbsent {
            provider, error, ..
        } => ResolveError::DataAbsent {
            provider,
            message: error.message().to_owned(),
        },
        RouteError::Cancelled => ResolveError::Cancelled,
        RouteError::Exhausted(failure) => ResolveError::Exhausted(failure),
    }
}

/// Assembles a [`CarbonEngine`] from configuration.
///
/// ```rust,ignore
/// let engine = EngineBuilder::from_config(EngineConfig::from_env()?).build()?;
///
/// // Offline: random mock readings and an in-memory store.
/// let mock = EngineBuilder::new().with_mock_mode().build()?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    use_mock: bool,
    http_client: Option<Arc<dyn HttpClient>>,
    store: Option<Arc<dyn RetainmentStore>>,
    retry: Option<RetryConfig>,
    sources: Option<Vec<Arc<dyn CarbonSource>>>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::from_config(EngineConfig::default())
    }

    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            config,
            use_mock: false,
            http_client: None,
            store: None,
            retry: None,
            sources: None,
        }
    }

    /// Only the mock adapter, and an in-memory store unless one is given.
    pub fn with_mock_mode(mut self) -> Self {
        self.use_mock = true;
        self
    }

    pub fn with_http_client(mut self, http_client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(http_client);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RetainmentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Replace the configured provider list with explicit, unthrottled adapters.
    pub fn with_sources(mut self, sources: Vec<Arc<dyn CarbonSource>>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn build(self) -> Result<CarbonEngine, CoreError> {
        let retry = self.retry.unwrap_or_else(|| self.config.retry_config());

        let slots = match self.sources {
            Some(sources) => sources.into_iter().map(AdapterSlot::unthrottled).collect(),
            None if self.use_mock => {
                vec![AdapterSlot::unthrottled(Arc::new(MockAdapter::new()))]
            }
            None => {
                let http_client = self
                    .http_client
                    .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new()));
                configured_slots(&self.config, &http_client)
            }
        };

        let store: Arc<dyn RetainmentStore> = match self.store {
            Some(store) => store,
            None if self.use_mock => Arc::new(MemoryRetainmentStore::new(self.config.retainment_ttl)),
            None => Arc::new(DuckDbRetainmentStore::open(self.config.retainment_config())?),
        };

        Ok(CarbonEngine::new(
            FallbackOrchestrator::new(slots, retry),
            store,
            self.config.retainment_ttl,
        ))
    }
}

fn configured_slots(config: &EngineConfig, http_client: &Arc<dyn HttpClient>) -> Vec<AdapterSlot> {
    let mut slots = Vec::with_capacity(config.provider_order.len());
    for provider in &config.provider_order {
        let source: Arc<dyn CarbonSource> = match provider {
            ProviderId::ElectricityMapsLatest => Arc::new(
                ElectricityMapsLatestAdapter::new(
                    Arc::clone(http_client),
                    config.electricitymaps_token.clone(),
                )
                .with_url(config.latest_url.clone())
                .with_timeout_ms(config.timeout_ms),
            ),
            ProviderId::ElectricityMapsForecast => Arc::new(
                ElectricityMapsForecastAdapter::new(
                    Arc::clone(http_client),
                    config.electricitymaps_token.clone(),
                )
                .with_url(config.forecast_url.clone())
                .with_timeout_ms(config.timeout_ms),
            ),
            ProviderId::FootprintWindow => {
                let Some(url) = config.footprint_url.clone() else {
                    tracing::debug!("footprint_window disabled: CARBONROUTE_FOOTPRINT_URL is unset");
                    continue;
                };
                Arc::new(
                    FootprintWindowAdapter::new(Arc::clone(http_client), url)
                        .with_bearer_token(config.footprint_token.clone())
                        .with_timeout_ms(config.timeout_ms),
                )
            }
            ProviderId::Mock => Arc::new(MockAdapter::new()),
        };
        slots.push(AdapterSlot::new(source));
    }
    slots
}
