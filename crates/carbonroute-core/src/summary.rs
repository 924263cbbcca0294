//! Forecast statistics for one location.

use serde::{Deserialize, Serialize};

use crate::calculator::effective_ci;
use crate::{ForecastPoint, UtcDateTime};

/// Aggregate view over a forecast series. Everything except `count` is omitted
/// when the series is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_avg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_ci_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_ci_avg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_ci_max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_hour_effective_ci: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_hour_start: Option<UtcDateTime>,
}

impl ForecastSummary {
    pub fn empty() -> Self {
        Self {
            count: 0,
            start: None,
            end: None,
            ci_min: None,
            ci_avg: None,
            ci_max: None,
            effective_ci_min: None,
            effective_ci_avg: None,
            effective_ci_max: None,
            best_hour_effective_ci: None,
            best_hour_start: None,
        }
    }
}

struct Stats {
    min: f64,
    avg: f64,
    max: f64,
}

fn stats(values: &[f64]) -> Stats {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    Stats { min, avg, max }
}

/// Summarise `points` at the given PUE. Points are ordered by time first; the
/// best hour is the earliest one with the lowest effective intensity.
pub fn summarise(points: &[ForecastPoint], pue: f64) -> ForecastSummary {
    if points.is_empty() {
        return ForecastSummary::empty();
    }

    let mut ordered = points.to_vec();
    ordered.sort_by_key(|point| point.timestamp);

    let raw: Vec<f64> = ordered.iter().map(|point| point.ci_value).collect();
    let effective: Vec<f64> = raw.iter().map(|ci| effective_ci(*ci, pue)).collect();

    let mut best = 0;
    for (index, value) in effective.iter().enumerate() {
        if *value < effective[best] {
            best = index;
        }
    }

    let raw_stats = stats(&raw);
    let effective_stats = stats(&effective);

    ForecastSummary {
        count: ordered.len(),
        start: ordered.first().map(|point| point.timestamp),
        end: ordered.last().map(|point| point.timestamp),
        ci_min: Some(raw_stats.min),
        ci_avg: Some(raw_stats.avg),
        ci_max: Some(raw_stats.max),
        effective_ci_min: Some(effective_stats.min),
        effective_ci_avg: Some(effective_stats.avg),
        effective_ci_max: Some(effective_stats.max),
        best_hour_effective_ci: Some(effective[best]),
        best_hour_start: Some(ordered[best].timestamp),
    }
}
