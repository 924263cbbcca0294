//! Site ranking by effective carbon intensity.
//!
//! Every site is resolved independently on the time-specific endpoint, with at
//! most `concurrency` resolutions in flight. A site that fails never affects the
//! others: it lands in [`RankingReport::failures`], or, when the operator opted
//! in with [`FailSoftPolicy::Substitute`], gets a synthetic intensity flagged as
//! such.

use std::sync::Arc;

use carbonroute_retainment::RecordId;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::calculator::derive;
use crate::config::DEFAULT_RANK_CONCURRENCY;
use crate::domain::ensure_non_negative;
use crate::engine::{CarbonEngine, Resolution, ResolutionOutcome};
use crate::{
    validate_pue, ResolutionRequest, ResolveError, Site, UtcDateTime, ValidationError,
    DEFAULT_PUE,
};

/// Where a substituted intensity comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyntheticCi {
    /// Uniform in `150..=600`.
    Random,
    Fixed(f64),
}

impl SyntheticCi {
    fn sample(self) -> f64 {
        match self {
            Self::Random => f64::from(fastrand::u32(150..=600)),
            Self::Fixed(value) => value,
        }
    }
}

/// What to do with a site whose resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FailSoftPolicy {
    /// Report the site under `failures`.
    #[default]
    Disabled,
    Substitute(SyntheticCi),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankRequest {
    pub target_time: Option<UtcDateTime>,
    pub sites: Vec<Site>,
    pub pue_default: f64,
    pub energy_kwh: Option<f64>,
    pub fail_soft: FailSoftPolicy,
}

impl RankRequest {
    pub fn new(sites: Vec<Site>) -> Self {
        Self {
            target_time: None,
            sites,
            pue_default: DEFAULT_PUE,
            energy_kwh: None,
            fail_soft: FailSoftPolicy::Disabled,
        }
    }

    pub fn at(mut self, target_time: UtcDateTime) -> Self {
        self.target_time = Some(target_time);
        self
    }

    pub fn with_pue_default(mut self, pue_default: f64) -> Self {
        self.pue_default = pue_default;
        self
    }

    pub fn with_energy_kwh(mut self, energy_kwh: Option<f64>) -> Self {
        self.energy_kwh = energy_kwh;
        self
    }

    pub fn with_fail_soft(mut self, fail_soft: FailSoftPolicy) -> Self {
        self.fail_soft = fail_soft;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sites.is_empty() {
            return Err(ValidationError::EmptySites);
        }
        validate_pue(self.pue_default)?;
        for site in &self.sites {
            site.validate().map_err(|reason| ValidationError::InvalidSite {
                name: site.name.clone(),
                reason: Box::new(reason),
            })?;
        }
        if let Some(energy_kwh) = self.energy_kwh {
            ensure_non_negative("energy_kwh", energy_kwh)?;
        }
        if let FailSoftPolicy::Substitute(SyntheticCi::Fixed(value)) = self.fail_soft {
            ensure_non_negative("synthetic_ci", value)?;
        }
        Ok(())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedSite {
    pub site_name: String,
    pub lat: f64,
    pub lon: f64,
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
    #[serde(skip_serializing_if = "is_false")]
    pub synthetic: bool,
}

/// A site without a usable intensity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteFailure {
    pub site_name: String,
    pub lat: f64,
    pub lon: f64,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
}

impl SiteFailure {
    fn new(site: &Site, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            site_name: site.name.clone(),
            lat: site.lat,
            lon: site.lon,
            code: code.into(),
            message: message.into(),
            record_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingReport {
    pub start_time: UtcDateTime,
    pub results: Vec<RankedSite>,
    pub failures: Vec<SiteFailure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub struct SiteRanker {
    engine: Arc<CarbonEngine>,
    concurrency: usize,
}

impl SiteRanker {
    pub fn new(engine: Arc<CarbonEngine>) -> Self {
        Self {
            engine,
            concurrency: DEFAULT_RANK_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Result<Self, ValidationError> {
        if concurrency == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        self.concurrency = concurrency;
        Ok(self)
    }

    /// Rank `request.sites` at the hour of `request.target_time` (default now),
    /// lowest effective intensity first. Equal intensities keep input order.
    ///
    /// # Errors
    ///
    /// Only an invalid request or cancellation fail the ranking as a whole.
    pub async fn rank(
        &self,
        request: &RankRequest,
        cancel: &CancellationToken,
    ) -> Result<RankingReport, ResolveError> {
        request.validate()?;
        let start_time = request
            .target_time
            .unwrap_or_else(UtcDateTime::now)
            .floor_to_hour();

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let handles: Vec<JoinHandle<Result<Resolution, ResolveError>>> = request
            .sites
            .iter()
            .map(|site| {
                let engine = Arc::clone(&self.engine);
                let permits = Arc::clone(&permits);
                let cancel = cancel.clone();
                let resolution = ResolutionRequest {
                    location: site.location(),
                    pue: site.pue.unwrap_or(request.pue_default),
                    target_time: Some(start_time),
                    energy_kwh: request.energy_kwh,
                };

                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|_| ResolveError::Internal(String::from("ranking pool closed")))?;
                    engine.resolve(&resolution, &cancel).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(request.sites.len());
        let mut failures = Vec::new();
        let mut warnings = Vec::new();

        for (site, handle) in request.sites.iter().zip(handles) {
            let pue = site.pue.unwrap_or(request.pue_default);
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(error) => Err(ResolveError::Internal(format!("site task failed: {error}"))),
            };

            match outcome {
                Ok(resolution) => {
                    warnings.extend(
                        resolution
                            .route
                            .warnings
                            .iter()
                            .map(|warning| format!("{}: {warning}", site.name)),
                    );
                    match resolution.outcome {
                        ResolutionOutcome::Resolved(resolved) => results.push(RankedSite {
                            site_name: site.name.clone(),
                            lat: site.lat,
                            lon: site.lon,
                            source: resolved.source,
                            zone: resolved.zone,
                            datetime: resolved.datetime,
                            ci_gco2_per_kwh: resolved.ci_gco2_per_kwh,
                            pue: resolved.pue,
                            effective_ci_gco2_per_kwh: resolved.effective_ci_gco2_per_kwh,
                            cfp_g: resolved.cfp_g,
                            cfp_kg: resolved.cfp_kg,
                            synthetic: false,
                        }),
                        ResolutionOutcome::Pending(pending) => {
                            let mut failure = SiteFailure::new(
                                site,
                                "pending",
                                format!(
                                    "{} reading is not yet valid; retained until {}",
                                    pending.source, pending.expires_at
                                ),
                            );
                            failure.record_id = Some(pending.record_id);
                            failures.push(failure);
                        }
                    }
                }
                Err(ResolveError::Cancelled) => {}
                Err(error) => match request.fail_soft {
                    FailSoftPolicy::Disabled => {
                        tracing::warn!(site = %site.name, code = error.code(), error = %error, "site failed");
                        failures.push(SiteFailure::new(site, error.code(), error.to_string()));
                    }
                    FailSoftPolicy::Substitute(synthetic) => {
                        let ci_value = synthetic.sample();
                        let derived = match derive(ci_value, pue, request.energy_kwh) {
                            Ok(derived) => derived,
                            Err(derive_error) => {
                                failures.push(SiteFailure::new(
                                    site,
                                    "resolve.validation",
                                    format!("synthetic CI {ci_value} rejected: {derive_error}"),
                                ));
                                continue;
                            }
                        };
                        tracing::warn!(
                            site = %site.name,
                            ci_value,
                            error = %error,
                            "substituting synthetic carbon intensity"
                        );
                        warnings.push(format!(
                            "{}: synthetic CI {ci_value} substituted after failure: {error}",
                            site.name
                        ));
                        results.push(RankedSite {
                            site_name: site.name.clone(),
                            lat: site.lat,
                            lon: site.lon,
                            source: String::from("synthetic"),
                            zone: None,
                            datetime: start_time,
                            ci_gco2_per_kwh: ci_value,
                            pue,
                            effective_ci_gco2_per_kwh: derived.effective_ci,
                            cfp_g: derived.footprint.map(|footprint| footprint.cfp_g),
                            cfp_kg: derived.footprint.map(|footprint| footprint.cfp_kg),
                            synthetic: true,
                        });
                    }
                },
            }
        }

        if cancel.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }

        results.sort_by(|left, right| {
            left.effective_ci_gco2_per_kwh
                .total_cmp(&right.effective_ci_gco2_per_kwh)
        });

        Ok(RankingReport {
            start_time,
            results,
            failures,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::engine::EngineBuilder;

    fn site(name: &str, lat: f64) -> Site {
        Site::new(name, lat, 5.0, None).expect("valid site")
    }

    fn ranker(adapter: MockAdapter) -> SiteRanker {
        let engine = EngineBuilder::new()
            .with_mock_mode()
            .with_sources(vec![Arc::new(adapter)])
            .build()
            .expect("engine");
        SiteRanker::new(Arc::new(engine))
    }

    #[test]
    fn empty_site_list_is_invalid() {
        assert_eq!(
            RankRequest::new(Vec::new()).validate(),
            Err(ValidationError::EmptySites)
        );
        assert!(matches!(
            ranker(MockAdapter::new()).with_concurrency(0),
            Err(ValidationError::ZeroConcurrency)
        ));
    }

    #[tokio::test]
    async fn equal_intensities_keep_input_order() {
        let request = RankRequest::new(vec![site("A", 50.0), site("B", 51.0), site("C", 52.0)])
            .at(UtcDateTime::parse("2025-03-01T10:20:00Z").expect("valid time"));

        let report = ranker(MockAdapter::fixed(100.0))
            .rank(&request, &CancellationToken::new())
            .await
            .expect("ranking");

        let names: Vec<&str> = report.results.iter().map(|r| r.site_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(report.start_time.format_rfc3339(), "2025-03-01T10:00:00Z");
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn pending_sites_are_failures_even_with_fail_soft() {
        let request = RankRequest::new(vec![site("A", 50.0)])
            .with_fail_soft(FailSoftPolicy::Substitute(SyntheticCi::Fixed(400.0)));

        let report = ranker(MockAdapter::fixed(100.0).with_valid(false))
            .rank(&request, &CancellationToken::new())
            .await
            .expect("ranking");

        assert!(report.results.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code, "pending");
        assert!(report.failures[0].record_id.is_some());
    }
}
