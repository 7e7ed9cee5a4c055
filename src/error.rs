// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the log monitor.

use thiserror::Error;

use crate::store::StoreError;
use crate::upstream::UpstreamError;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// The upstream token or base URL is missing or still the placeholder.
    /// A cycle that hits this is skipped, it is not a failure.
    #[error("Upstream credentials are not configured")]
    ConfigNotReady,

    /// Listing the top-level rules failed; no partial rule list is usable.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] UpstreamError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Whether this error means "nothing to do yet" rather than a fault.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, AppError::ConfigNotReady)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
