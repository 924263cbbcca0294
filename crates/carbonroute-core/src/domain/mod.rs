//! # Domain Models
//!
//! Canonical types shared by adapters, the router and the ranking engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`CiReading`] | Normalized carbon-intensity observation |
//! | [`ForecastPoint`] | One hourly point of a forecast series |
//! | [`Location`] | Validated latitude/longitude |
//! | [`RequestWindow`] | The hour a request is about |
//! | [`ResolutionRequest`] | Input to a single resolution |
//! | [`Site`] | Rankable compute site |
//! | [`UtcDateTime`] | UTC timestamp |
//!
//! Constructors validate their invariants; a `CiReading` cannot hold a negative
//! or non-finite value.

mod models;
mod timestamp;

pub use models::{
    validate_pue, CiReading, ForecastPoint, Location, RequestWindow, ResolutionRequest, Site,
    DEFAULT_PUE,
};
pub(crate) use models::ensure_non_negative;
pub use timestamp::UtcDateTime;
