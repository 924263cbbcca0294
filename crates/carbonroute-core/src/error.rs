use thiserror::Error;

use carbonroute_retainment::RetainmentError;

use crate::routing::RouteFailure;
use crate::ProviderId;

/// Validation and contract errors exposed by `carbonroute-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("latitude {value} is outside -90..=90")]
    LatitudeOutOfRange { value: f64 },
    #[error("longitude {value} is outside -180..=180")]
    LongitudeOutOfRange { value: f64 },
    #[error("pue must be >= 1.0, got {value}")]
    PueTooLow { value: f64 },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("timestamp must be RFC3339: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("invalid provider '{value}', expected one of electricitymaps, footprint_window, mock")]
    InvalidSource { value: String },

    #[error("site name cannot be empty")]
    EmptySiteName,
    #[error("site '{name}': {reason}")]
    InvalidSite {
        name: String,
        reason: Box<ValidationError>,
    },
    #[error("ranking requires at least one site")]
    EmptySites,
    #[error("concurrency must be greater than zero")]
    ZeroConcurrency,
    #[error("retainment ttl must be greater than zero")]
    ZeroTtl,

    #[error("request_id must be at least 8 characters")]
    InvalidRequestId,
    #[error("schema_version must match vMAJOR.MINOR.PATCH: '{value}'")]
    InvalidSchemaVersion { value: String },
    #[error("error code cannot be empty")]
    EmptyErrorCode,
    #[error("error message cannot be empty")]
    EmptyErrorMessage,
}

/// Failure of a single resolution.
///
/// `Pending` is not represented here: a retained reading is a successful outcome.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("provider '{provider}' has no data: {message}")]
    DataAbsent { provider: ProviderId, message: String },

    #[error("no provider could answer: {}", .0.headline())]
    Exhausted(RouteFailure),

    #[error("retainment store failed: {0}")]
    Retainment(#[from] RetainmentError),

    #[error("resolution cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ResolveError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "resolve.validation",
            Self::DataAbsent { .. } => "resolve.data_absent",
            Self::Exhausted(_) => "resolve.exhausted",
            Self::Retainment(_) => "resolve.retainment",
            Self::Cancelled => "resolve.cancelled",
            Self::Internal(_) => "resolve.internal",
        }
    }
}

/// Top-level error type for non-resolution core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Retainment(#[from] RetainmentError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(String),
}
