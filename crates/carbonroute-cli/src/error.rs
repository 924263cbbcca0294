use thiserror::Error;

use carbonroute_core::{ConfigError, CoreError, ResolveError, SiteError, ValidationError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sites(#[from] SiteError),

    #[error("retainment store error: {0}")]
    Store(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Sites(SiteError::Io { .. }) => 10,
            Self::Sites(_) => 2,
            Self::Store(_) => 4,
            Self::Cancelled => 130,
            Self::Internal(_) => 1,
            Self::Serialization(_) => 1,
            Self::Io(_) => 10,
        }
    }
}

/// Data-absent and exhausted routes are rendered as envelope errors by the
/// commands; reaching this conversion with one is an internal fault.
impl From<ResolveError> for CliError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::Validation(error) => Self::Validation(error),
            ResolveError::Retainment(error) => Self::Store(error.to_string()),
            ResolveError::Cancelled => Self::Cancelled,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(error: CoreError) -> Self {
        match error {
            CoreError::Validation(error) => Self::Validation(error),
            CoreError::Retainment(error) => Self::Store(error.to_string()),
            CoreError::Serialization(error) => Self::Serialization(error),
            CoreError::Task(message) => Self::Internal(message),
        }
    }
}
