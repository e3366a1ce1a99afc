//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout askdb.
//! All errors are structured and map to a stable error code and a category
//! for JSON output.
//!
//! # Error Categories
//! - `client`: malformed phrase, missing connection target (no database contact)
//! - `connectivity`: unreachable database, pool construction failure
//! - `guard`: generated SQL failed a safety check, or the generator broke its contract
//! - `execution`: statement timeout, runtime database error, failed introspection
//! - `config`: configuration file or named connection errors
//!
//! Nothing in the pipeline retries. Every error is surfaced to the caller as-is.

use thiserror::Error;

/// Main error type for askdb operations
#[derive(Error, Debug)]
pub enum AskError {
    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Database unreachable or pool construction failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Generated SQL failed a guard check
    #[error("Guard rejected statement: {0}")]
    GuardRejected(String),

    /// Generator response was malformed or incomplete
    #[error("Generator contract violation: {0}")]
    GeneratorContract(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Statement exceeded its declared timeout
    #[error("Query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Catalog introspection failed (snapshot discarded)
    #[error("Introspection failed: {0}")]
    IntrospectionFailed(String),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Coarse error classification reported alongside the error code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Client,
    Connectivity,
    Guard,
    Execution,
    Config,
}

impl ErrorCategory {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Connectivity => "connectivity",
            Self::Guard => "guard",
            Self::Execution => "execution",
            Self::Config => "config",
        }
    }
}

impl AskError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::GuardRejected(_) => "GUARD_REJECTED",
            Self::GeneratorContract(_) => "GENERATOR_CONTRACT",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::Timeout { .. } => "QUERY_TIMEOUT",
            Self::IntrospectionFailed(_) => "INTROSPECTION_FAILED",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Category used by callers to decide how to surface the failure.
    ///
    /// Generator contract violations are classified with guard rejections:
    /// both mean the proposed statement was refused before execution.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput(_) => ErrorCategory::Client,
            Self::ConnectionFailed(_) => ErrorCategory::Connectivity,
            Self::GuardRejected(_) | Self::GeneratorContract(_) => ErrorCategory::Guard,
            Self::QueryFailed(_) | Self::Timeout { .. } | Self::IntrospectionFailed(_) => {
                ErrorCategory::Execution
            }
            Self::ConfigError(_) => ErrorCategory::Config,
        }
    }

    /// Get human-readable error message (no credentials, no raw server text)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a guard rejection error
    pub fn guard_rejected(message: impl Into<String>) -> Self {
        Self::GuardRejected(message.into())
    }

    /// Create a generator contract error
    pub fn generator_contract(message: impl Into<String>) -> Self {
        Self::GeneratorContract(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create a timeout error
    #[must_use]
    pub const fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Create an introspection error
    pub fn introspection_failed(message: impl Into<String>) -> Self {
        Self::IntrospectionFailed(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for askdb operations
pub type Result<T> = std::result::Result<T, AskError>;
