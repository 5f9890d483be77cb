use thiserror::Error;

/// Errors that reach the caller of [`crate::Aggregator::aggregate`].
///
/// Per-provider failures never show up here: they are recorded as
/// [`crate::ProviderStatus::Failure`] on the individual source record.
#[derive(Debug, Error)]
pub enum WeatherError {
    /// Malformed or out-of-range location input.
    #[error("{0}")]
    Validation(String),

    /// Missing upstream credentials or unusable configuration values.
    #[error("{0}")]
    Configuration(String),

    /// Every provider failed for this request.
    #[error("{0}")]
    Provider(String),

    /// The shared outbound HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

impl WeatherError {
    /// Caller-facing message, prefixed by error category.
    pub fn detail(&self) -> String {
        match self {
            Self::Validation(msg) => format!("Invalid input: {msg}"),
            Self::Configuration(msg) => format!("Configuration error: {msg}"),
            Self::Provider(msg) => format!("Service error: {msg}"),
            Self::Http(err) => format!("Server error: {err}"),
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, WeatherError>;
