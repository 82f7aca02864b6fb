//! # errqr Common
//!
//! Shared error type and logging configuration for the errqr crates.
//!
//! ## Features
//!
//! - Unified error type with categories for log fields
//! - Logging configuration and setup
//! - Result extension trait

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for errqr.
#[derive(Error, Debug)]
pub enum ErrqrError {
    /// Network-related errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Named cache store errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Remote data store errors.
    #[error("Data store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ErrqrError {
    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a data store error with source.
    pub fn store_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error with source.
    pub fn config_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is worth retrying by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrqrError::Network { .. })
    }

    /// Get the error category for log fields.
    pub fn category(&self) -> &'static str {
        match self {
            ErrqrError::Network { .. } => "network",
            ErrqrError::Cache { .. } => "cache",
            ErrqrError::Store { .. } => "store",
            ErrqrError::Config { .. } => "config",
            ErrqrError::NotFound(_) => "not_found",
            ErrqrError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for errqr operations.
pub type Result<T> = std::result::Result<T, ErrqrError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Wrap an error as a config error with context.
    fn config_context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn config_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| ErrqrError::config_with_source(message, e))
    }
}
