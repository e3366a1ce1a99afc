//! Query Executor
//!
//! Runs one generated statement through the guard, executes it with a scoped
//! timeout and shapes the result under a response byte budget.
//!
//! # Response shaping
//! The row set is measured as its JSON serialization. While it exceeds the
//! budget and more than one row remains, it is cut to `floor(len * 0.7)` rows
//! (never fewer than one). Shaping slices the fetched rows in memory; the
//! statement is never re-executed.
//!
//! # Row cap
//! The guard's effective limit is declared to the introspector before
//! execution. When more rows come back than the cap (the first LIMIT sat in a
//! subquery), the extra rows are dropped and the response is flagged
//! `truncated`.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::SchemaIntrospector;
use crate::error::{AskError, Result};
use crate::generator::{Explanation, GeneratedSql};
use crate::guard;

type Record = serde_json::Map<String, serde_json::Value>;

/// Bounds applied to every execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Largest LIMIT a statement may declare (also the appended default)
    pub max_limit: u64,

    pub statement_timeout_ms: u64,

    /// Budget for the serialized row set
    pub max_response_bytes: usize,
}

/// Result of a generated query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<Record>,

    #[serde(rename = "rowCount")]
    pub row_count: usize,

    /// Final statement text as executed
    pub sql: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Result of an explanation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainResponse {
    pub answer: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
}

impl From<Explanation> for ExplainResponse {
    fn from(explanation: Explanation) -> Self {
        Self { answer: explanation.answer, references: explanation.references }
    }
}

/// Guard, execute and shape one generated statement.
///
/// A guard rejection returns before the introspector is touched.
pub async fn execute<I: SchemaIntrospector>(
    introspector: &I,
    generated: &GeneratedSql,
    limits: &ExecutionLimits,
) -> Result<QueryResponse> {
    let guarded = guard::validate(&generated.sql, limits.max_limit)?;

    let row_cap = usize::try_from(guarded.effective_limit).unwrap_or(usize::MAX);
    introspector.set_timeout_ms(limits.statement_timeout_ms);
    introspector.set_max_rows(guarded.effective_limit);
    info!(
        sql = %guarded.sql,
        params = generated.params.len(),
        timeout_ms = limits.statement_timeout_ms,
        max_rows = guarded.effective_limit,
        "executing guarded statement"
    );

    let fetched = introspector.run_select(&guarded.sql, &generated.params).await?;

    // The first LIMIT may sit in a subquery and not bound the outer statement
    let mut rows = fetched.rows;
    let capped = rows.len() > row_cap;
    if capped {
        rows.truncate(row_cap);
        warn!(max_rows = row_cap, "result capped at the statement's effective limit");
    }

    let fetched_count = rows.len();
    let (rows, shaped) = shape_rows(rows, limits.max_response_bytes)?;
    if shaped {
        warn!(
            fetched = fetched_count,
            returned = rows.len(),
            budget = limits.max_response_bytes,
            "response truncated to fit byte budget"
        );
    }

    let truncated = capped || shaped;
    Ok(QueryResponse { row_count: rows.len(), rows, sql: guarded.sql, truncated })
}

/// Shrink `rows` until their JSON form fits `max_bytes` or one row remains.
///
/// Returns the kept rows and whether any were dropped.
pub fn shape_rows(mut rows: Vec<Record>, max_bytes: usize) -> Result<(Vec<Record>, bool)> {
    let mut truncated = false;

    while rows.len() > 1 && serialized_len(&rows)? > max_bytes {
        let keep = (rows.len() * 7 / 10).max(1);
        rows.truncate(keep);
        truncated = true;
    }

    Ok((rows, truncated))
}

/// Size of the JSON serialization of `rows`
pub fn serialized_len(rows: &[Record]) -> Result<usize> {
    serde_json::to_vec(rows)
        .map(|bytes| bytes.len())
        .map_err(|e| AskError::query_failed(format!("Failed to serialize result rows: {e}")))
}
