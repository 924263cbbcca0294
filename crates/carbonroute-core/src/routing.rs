//! Ordered provider fallback.
//!
//! The orchestrator walks its adapters in configured order, skipping those that
//! cannot serve the requested endpoint. Each adapter gets its own retry budget.
//! Auth, exhausted-transient and unrecoverable failures advance to the next
//! adapter; data-absent and cancellation end the walk immediately.
//!
//! Each slot's circuit breaker is consulted once before a call and records one
//! outcome after the call's retries are spent. Retry attempts never trip it, so
//! an open breaker only turns away calls that have not started yet.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreaker;
use crate::data_source::{
    CarbonSource, Endpoint, FailureClass, FetchRequest, RawPayload, SourceError,
};
use crate::provider_policy::ProviderPolicy;
use crate::retry::{AttemptFailure, RetryConfig, RetryExecutor};
use crate::throttling::Throttle;
use crate::{CiReading, EnvelopeError, ForecastPoint, ProviderId};

/// One adapter plus its rate budget and circuit breaker.
#[derive(Clone)]
pub struct AdapterSlot {
    source: Arc<dyn CarbonSource>,
    throttle: Option<Arc<Throttle>>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AdapterSlot {
    /// Slot throttled and guarded by the provider's default policy, if it has one.
    pub fn new(source: Arc<dyn CarbonSource>) -> Self {
        let provider = source.id();
        match ProviderPolicy::default_for(provider) {
            Some(policy) => Self {
                source,
                throttle: Some(Arc::new(Throttle::from_policy(&policy))),
                circuit_breaker: Arc::new(CircuitBreaker::new(provider, policy.circuit)),
            },
            None => Self::unthrottled(source),
        }
    }

    pub fn unthrottled(source: Arc<dyn CarbonSource>) -> Self {
        let circuit_breaker = Arc::new(CircuitBreaker::for_provider(source.id()));
        Self {
            source,
            throttle: None,
            circuit_breaker,
        }
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(Arc::new(throttle));
        self
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn id(&self) -> ProviderId {
        self.source.id()
    }

    pub fn source(&self) -> &Arc<dyn CarbonSource> {
        &self.source
    }

    /// One breaker outcome per call. Only an upstream that stayed unavailable
    /// through the whole retry budget counts as a failure.
    fn record_call<T>(&self, fetched: &Result<T, AttemptFailure>) {
        match fetched {
            Ok(_) => self.circuit_breaker.record_success(),
            Err(failure) if failure.class == FailureClass::Transient => {
                self.circuit_breaker.record_failure();
            }
            Err(_) => {}
        }
    }
}

/// Successful routed call.
#[derive(Debug, Clone)]
pub struct RouteSuccess<T> {
    pub data: T,
    pub selected_source: ProviderId,
    pub source_chain: Vec<ProviderId>,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
}

/// Every candidate failed (or none could serve the endpoint).
#[derive(Debug, Clone)]
pub struct RouteFailure {
    pub source_chain: Vec<ProviderId>,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
}

impl RouteFailure {
    /// Message of the last error; the one surfaced to callers.
    pub fn headline(&self) -> &str {
        self.errors
            .last()
            .map_or("no provider attempted", |error| error.message.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum RouteError {
    /// The provider answered with nothing for this point; no fallback was tried.
    DataAbsent {
        provider: ProviderId,
        error: SourceError,
        source_chain: Vec<ProviderId>,
    },
    Cancelled,
    Exhausted(RouteFailure),
}

/// A reading together with the payload it was normalized from.
#[derive(Debug, Clone)]
pub struct RoutedReading {
    pub reading: CiReading,
    pub payload: RawPayload,
}

/// Provider fallback state machine.
pub struct FallbackOrchestrator {
    slots: Vec<AdapterSlot>,
    retry: RetryConfig,
}

impl FallbackOrchestrator {
    pub fn new(slots: Vec<AdapterSlot>, retry: RetryConfig) -> Self {
        Self { slots, retry }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.slots.iter().map(AdapterSlot::id).collect()
    }

    /// Providers that would be tried for `endpoint`, in order.
    pub fn chain_for(&self, endpoint: Endpoint) -> Vec<ProviderId> {
        self.candidates(endpoint).map(AdapterSlot::id).collect()
    }

    pub async fn route_reading(
        &self,
        req: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<RouteSuccess<RoutedReading>, RouteError> {
        self.route(req, cancel, |source, payload| {
            source.normalize(payload, req).map(|reading| RoutedReading {
                reading,
                payload: payload.clone(),
            })
        })
        .await
    }

    pub async fn route_series(
        &self,
        req: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<RouteSuccess<Vec<ForecastPoint>>, RouteError> {
        self.route(req, cancel, |source, payload| source.normalize_series(payload))
            .await
    }

    fn candidates(&self, endpoint: Endpoint) -> impl Iterator<Item = &AdapterSlot> {
        self.slots
            .iter()
            .filter(move |slot| slot.source.capabilities().supports(endpoint))
    }

    async fn route<T, N>(
        &self,
        req: &FetchRequest,
        cancel: &CancellationToken,
        normalize: N,
    ) -> Result<RouteSuccess<T>, RouteError>
    where
        N: Fn(&dyn CarbonSource, &RawPayload) -> Result<T, SourceError>,
    {
        let started = Instant::now();
        let endpoint = req.endpoint;
        let mut source_chain = Vec::new();
        let mut errors = Vec::new();

        for slot in self.candidates(endpoint) {
            let provider = slot.id();
            let source = slot.source.as_ref();
            source_chain.push(provider);

            let fetched = match slot.circuit_breaker.guard() {
                Ok(()) => {
                    let fetched = RetryExecutor::new(provider, &self.retry, cancel)
                        .with_throttle(slot.throttle.as_deref())
                        .run(|error| source.classify(error), || source.fetch(req))
                        .await;
                    slot.record_call(&fetched);
                    fetched
                }
                Err(error) => Err(AttemptFailure {
                    class: source.classify(&error),
                    error,
                    attempts: 0,
                }),
            };

            let outcome = match fetched {
                Ok(payload) => normalize(source, &payload).map_err(|error| {
                    let class = source.classify(&error);
                    (error, class)
                }),
                Err(failure) => Err((failure.error, failure.class)),
            };

            match outcome {
                Ok(data) => {
                    let mut warnings = Vec::new();
                    if !errors.is_empty() {
                        warnings.push(format!(
                            "source fallback succeeded with '{}' after {} failed attempt(s)",
                            provider.as_str(),
                            errors.len()
                        ));
                    }
                    tracing::debug!(%provider, %endpoint, chain = ?source_chain, "route resolved");

                    return Ok(RouteSuccess {
                        data,
                        selected_source: provider,
                        source_chain,
                        warnings,
                        errors,
                        latency_ms: elapsed_ms(started),
                    });
                }
                Err((_, FailureClass::Aborted)) => return Err(RouteError::Cancelled),
                Err((error, FailureClass::DataAbsent)) => {
                    tracing::info!(%provider, %endpoint, error = %error, "provider has no data");
                    return Err(RouteError::DataAbsent {
                        provider,
                        error,
                        source_chain,
                    });
                }
                Err((error, class)) => {
                    tracing::warn!(
                        %provider,
                        %endpoint,
                        ?class,
                        error = %error,
                        "provider failed, trying next"
                    );
                    errors.push(to_envelope_error(provider, &error));
                }
            }
        }

        if errors.is_empty() {
            errors.push(
                EnvelopeError::new(
                    "source.no_candidate",
                    format!("no provider supports endpoint '{endpoint}'"),
                )
                .expect("code/message are non-empty"),
            );
        }

        Err(RouteError::Exhausted(RouteFailure {
            source_chain,
            warnings: vec![format!("all providers failed for endpoint '{endpoint}'")],
            errors,
            latency_ms: elapsed_ms(started),
        }))
    }
}

fn to_envelope_error(provider: ProviderId, error: &SourceError) -> EnvelopeError {
    EnvelopeError::new(error.code(), error.message())
        .expect("code/message are non-empty")
        .with_source(provider)
        .with_retryable(error.retryable())
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::adapters::{ElectricityMapsLatestAdapter, FootprintWindowAdapter, MockAdapter};
    use crate::http_client::ScriptedHttpClient;
    use crate::{Location, UtcDateTime};

    fn orchestrator(sources: Vec<Arc<dyn CarbonSource>>) -> FallbackOrchestrator {
        FallbackOrchestrator::new(
            sources.into_iter().map(AdapterSlot::unthrottled).collect(),
            RetryConfig::fixed(Duration::ZERO, 2),
        )
    }

    fn latest_request() -> FetchRequest {
        FetchRequest::latest(
            Location::new(52.0, 5.0).expect("valid location"),
            UtcDateTime::parse("2025-03-01T10:00:00Z").expect("valid time"),
        )
    }

    #[tokio::test]
    async fn missing_token_falls_through_to_the_next_provider() {
        let client = Arc::new(ScriptedHttpClient::new());
        let router = orchestrator(vec![
            Arc::new(ElectricityMapsLatestAdapter::new(client.clone(), None)),
            Arc::new(MockAdapter::fixed(250.0)),
        ]);

        let routed = router
            .route_reading(&latest_request(), &CancellationToken::new())
            .await
            .expect("mock answers");

        assert_eq!(routed.selected_source, ProviderId::Mock);
        assert_eq!(
            routed.source_chain,
            vec![ProviderId::ElectricityMapsLatest, ProviderId::Mock]
        );
        assert_eq!(routed.errors.len(), 1);
        assert_eq!(routed.errors[0].code, "source.auth");
        assert_eq!(routed.data.reading.ci_value(), 250.0);
        assert_eq!(routed.warnings.len(), 1);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn data_absent_stops_the_walk() {
        let client = Arc::new(ScriptedHttpClient::new());
        client.push_json(200, "[]");
        let router = orchestrator(vec![
            Arc::new(FootprintWindowAdapter::new(client.clone(), "https://footprint.test")),
            Arc::new(MockAdapter::fixed(250.0)),
        ]);

        let error = router
            .route_reading(&latest_request(), &CancellationToken::new())
            .await
            .expect_err("no fallback on data absence");

        match error {
            RouteError::DataAbsent {
                provider,
                source_chain,
                ..
            } => {
                assert_eq!(provider, ProviderId::FootprintWindow);
                assert_eq!(source_chain, vec![ProviderId::FootprintWindow]);
            }
            other => panic!("expected data absent, got {other:?}"),
        }
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn capability_filter_leaves_no_candidate() {
        let router = orchestrator(vec![Arc::new(ElectricityMapsLatestAdapter::new(
            Arc::new(ScriptedHttpClient::new()),
            Some(String::from("token")),
        ))]);
        let req = FetchRequest::series(
            Location::new(52.0, 5.0).expect("valid location"),
            UtcDateTime::now(),
        );

        assert!(router.chain_for(Endpoint::Series).is_empty());
        let error = router
            .route_series(&req, &CancellationToken::new())
            .await
            .expect_err("nothing serves series");

        let RouteError::Exhausted(failure) = error else {
            panic!("expected exhaustion");
        };
        assert_eq!(failure.errors[0].code, "source.no_candidate");
        assert!(failure.source_chain.is_empty());
    }

    #[tokio::test]
    async fn exhaustion_keeps_every_error_and_reports_the_last() {
        let em = Arc::new(ScriptedHttpClient::always(Ok(
            crate::http_client::HttpResponse::with_status(503, ""),
        )));
        let footprint = Arc::new(ScriptedHttpClient::always(Ok(
            crate::http_client::HttpResponse::with_status(404, ""),
        )));
        let router = orchestrator(vec![
            Arc::new(ElectricityMapsLatestAdapter::new(em.clone(), Some(String::from("t")))),
            Arc::new(FootprintWindowAdapter::new(footprint.clone(), "https://footprint.test")),
        ]);

        let error = router
            .route_reading(&latest_request(), &CancellationToken::new())
            .await
            .expect_err("both fail");

        let RouteError::Exhausted(failure) = error else {
            panic!("expected exhaustion");
        };
        assert_eq!(failure.errors.len(), 2);
        assert_eq!(failure.errors[0].code, "source.transient");
        assert_eq!(failure.errors[0].retryable, Some(true));
        assert_eq!(failure.errors[1].code, "source.invalid_request");
        assert_eq!(failure.headline(), failure.errors[1].message);
        assert_eq!(em.call_count(), 3);
        assert_eq!(footprint.call_count(), 1);
    }

    #[tokio::test]
    async fn a_retry_budget_above_the_breaker_threshold_is_spent_in_full() {
        let client = Arc::new(ScriptedHttpClient::always(Ok(
            crate::http_client::HttpResponse::with_status(503, ""),
        )));
        let router = FallbackOrchestrator::new(
            vec![AdapterSlot::unthrottled(Arc::new(FootprintWindowAdapter::new(
                client.clone(),
                "https://footprint.test",
            )))],
            RetryConfig::fixed(Duration::ZERO, 5),
        );

        let error = router
            .route_reading(&latest_request(), &CancellationToken::new())
            .await
            .expect_err("always 503");

        let RouteError::Exhausted(failure) = error else {
            panic!("expected exhaustion");
        };
        assert_eq!(client.call_count(), 6);
        assert_eq!(failure.errors.len(), 1);
        assert_eq!(failure.errors[0].code, "source.transient");
    }

    #[tokio::test]
    async fn the_breaker_counts_exhausted_calls_not_attempts() {
        let client = Arc::new(ScriptedHttpClient::always(Ok(
            crate::http_client::HttpResponse::with_status(503, ""),
        )));
        let slot = AdapterSlot::unthrottled(Arc::new(FootprintWindowAdapter::new(
            client.clone(),
            "https://footprint.test",
        )));
        let breaker = Arc::clone(slot.circuit_breaker());
        let router = FallbackOrchestrator::new(vec![slot], RetryConfig::fixed(Duration::ZERO, 2));
        let cancel = CancellationToken::new();

        for expected_failures in 1..=3 {
            router
                .route_reading(&latest_request(), &cancel)
                .await
                .expect_err("always 503");
            assert_eq!(breaker.consecutive_failures(), expected_failures);
        }
        assert_eq!(client.call_count(), 9);
        assert_eq!(breaker.state(), crate::CircuitState::Open);

        let error = router
            .route_reading(&latest_request(), &cancel)
            .await
            .expect_err("breaker is open");
        let RouteError::Exhausted(failure) = error else {
            panic!("expected exhaustion");
        };
        assert_eq!(failure.errors[0].code, "source.circuit_open");
        assert_eq!(client.call_count(), 9);
    }
}
