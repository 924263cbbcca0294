use thiserror::Error;

use crate::{ForecastPoint, UtcDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatchError {
    #[error("forecast series is empty")]
    EmptySeries,
}

/// Pick the forecast point for `target`.
///
/// An exact match on the hour wins (first one in series order). Otherwise the
/// point closest to the hour-floored target is returned; on equal distance the
/// earlier point in the series wins.
pub fn nearest_point(
    points: &[ForecastPoint],
    target: UtcDateTime,
) -> Result<&ForecastPoint, MatchError> {
    let target = target.floor_to_hour();
    let first = points.first().ok_or(MatchError::EmptySeries)?;

    if let Some(exact) = points
        .iter()
        .find(|point| point.timestamp.floor_to_hour() == target)
    {
        return Ok(exact);
    }

    // Strict `<` keeps the first of equally distant points.
    let nearest = points[1..].iter().fold(first, |best, point| {
        if point.timestamp.distance(target) < best.timestamp.distance(target) {
            point
        } else {
            best
        }
    });
    Ok(nearest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(timestamp: &str, ci_value: f64) -> ForecastPoint {
        ForecastPoint::new(UtcDateTime::parse(timestamp).expect("valid time"), ci_value)
            .expect("valid point")
    }

    fn series() -> Vec<ForecastPoint> {
        vec![
            point("2025-03-01T10:00:00Z", 100.0),
            point("2025-03-01T11:00:00Z", 200.0),
            point("2025-03-01T13:00:00Z", 300.0),
        ]
    }

    #[test]
    fn exact_hour_match_wins() {
        let target = UtcDateTime::parse("2025-03-01T11:00:00Z").expect("valid time");
        assert_eq!(nearest_point(&series(), target).expect("match").ci_value, 200.0);
    }

    #[test]
    fn target_minutes_are_floored_before_matching() {
        let target = UtcDateTime::parse("2025-03-01T11:59:59Z").expect("valid time");
        assert_eq!(nearest_point(&series(), target).expect("match").ci_value, 200.0);
    }

    #[test]
    fn equal_distance_prefers_first_occurrence() {
        let target = UtcDateTime::parse("2025-03-01T12:00:00Z").expect("valid time");
        assert_eq!(nearest_point(&series(), target).expect("match").ci_value, 200.0);
    }

    #[test]
    fn outside_the_horizon_picks_the_edge() {
        let target = UtcDateTime::parse("2025-03-02T00:00:00Z").expect("valid time");
        assert_eq!(nearest_point(&series(), target).expect("match").ci_value, 300.0);
    }

    #[test]
    fn empty_series_is_an_error() {
        let target = UtcDateTime::parse("2025-03-01T12:00:00Z").expect("valid time");
        assert_eq!(nearest_point(&[], target), Err(MatchError::EmptySeries));
    }
}
