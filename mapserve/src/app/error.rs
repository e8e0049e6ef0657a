//! Application error types.

use std::fmt;

use super::config::ConfigError;
use crate::catalog::CatalogError;

/// Errors that can occur during application lifecycle.
#[derive(Debug)]
pub enum AppError {
    /// Configuration error.
    Config(ConfigError),

    /// Failed to load the map directory.
    Catalog(CatalogError),

    /// Failed to create the HTTP client for online providers.
    HttpClient(String),

    /// Failed to create the Tokio runtime.
    RuntimeCreation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(e) => write!(f, "Configuration error: {}", e),
            AppError::Catalog(e) => write!(f, "Failed to load map catalog: {}", e),
            AppError::HttpClient(msg) => write!(f, "Failed to create HTTP client: {}", msg),
            AppError::RuntimeCreation(msg) => write!(f, "Failed to create Tokio runtime: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(e) => Some(e),
            AppError::Catalog(e) => Some(e),
            AppError::HttpClient(_) => None,
            AppError::RuntimeCreation(_) => None,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Config(e)
    }
}

impl From<CatalogError> for AppError {
    fn from(e: CatalogError) -> Self {
        AppError::Catalog(e)
    }
}
