//! JSON Output Envelope Types
//!
//! Every CLI command writes exactly one envelope to stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "command": "...", "error": {"code": "...", "category": "...", "message": "..."}}`
//!
//! Logs go to stderr, so stdout is always a single parseable JSON document.

use serde::{Deserialize, Serialize};

use crate::error::AskError;

/// Success envelope for command results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Command that was executed (ask, explain, schema, check)
    pub command: String,

    /// Command-specific data
    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, command: command.into(), error }
    }

    pub fn from_error(command: impl Into<String>, err: &AskError) -> Self {
        Self::new(command, ErrorInfo::from(err))
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "GUARD_REJECTED", "QUERY_TIMEOUT")
    pub code: String,

    /// Coarse classification (client, connectivity, guard, execution, config)
    pub category: String,

    /// Human-readable message (no credentials, no raw server text)
    pub message: String,
}

impl From<&AskError> for ErrorInfo {
    fn from(err: &AskError) -> Self {
        Self {
            code: err.error_code().to_string(),
            category: err.category().as_str().to_string(),
            message: err.message(),
        }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Wall-clock time of the whole command in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (query results only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None }
    }

    pub const fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_serialization() {
        let envelope = SuccessEnvelope::new(
            "ask",
            serde_json::json!({"rows": [], "rowCount": 0}),
            Metadata::with_rows(42, 0),
        );

        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(json.contains(r#""command":"ask"#));
        assert!(json.contains(r#""execution_ms":42"#));
        assert!(json.contains(r#""rows_returned":0"#));
    }

    #[test]
    fn test_error_envelope_from_error() {
        let err = AskError::guard_rejected("forbidden keyword 'DELETE'");
        let envelope = ErrorEnvelope::from_error("ask", &err);

        assert!(!envelope.ok);
        assert_eq!(envelope.command, "ask");
        assert_eq!(envelope.error.code, "GUARD_REJECTED");
        assert_eq!(envelope.error.category, "guard");
        assert!(envelope.error.message.contains("DELETE"));
    }

    #[test]
    fn test_metadata_without_rows() {
        let json = serde_json::to_string(&Metadata::new(100)).unwrap();
        assert!(json.contains(r#""execution_ms":100"#));
        // rows_returned should be omitted when None
        assert!(!json.contains("rows_returned"));
    }
}
