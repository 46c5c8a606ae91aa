use thiserror::Error;

/// Application error shared by every crate in the workspace.
///
/// Variants map 1:1 to the error kinds surfaced at the service boundary.
/// Request-initiated paths propagate these to the caller; the billing-period
/// monitor recovers at the subscription and tenant boundaries instead.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(anyhow::Error),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Invalid state: {0}")]
    InvalidState(anyhow::Error),

    #[error("Already exists: {0}")]
    AlreadyExists(anyhow::Error),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(anyhow::Error),

    #[error("Storage error: {0}")]
    StorageError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Stable kind label for logs and error objects returned to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidState(_) => "INVALID_STATE",
            AppError::AlreadyExists(_) => "ALREADY_EXISTS",
            AppError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            AppError::StorageError(_) => "STORAGE_ERROR",
            AppError::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Duplicate-invoice creations are expected under overlapping monitor
    /// ticks and are logged at debug rather than treated as failures.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, AppError::AlreadyExists(_))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}
