//! Database Engine Traits and Core Types
//!
//! This module defines the schema data model shared by every stage of the
//! pipeline and the two contracts a database backend implements:
//!
//! - [`Backend`] builds and tears down connection pools and hands out
//!   introspectors bound to a pool.
//! - [`SchemaIntrospector`] reads catalog metadata and runs guarded statements.
//!
//! # Engine Isolation
//! Each backend lives in its own submodule and owns its catalog SQL.
//! The pipeline never branches on backend type; new backends are added by
//! implementing both traits.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;

pub mod postgres;

/// Schemas that are never introspected and never referenced by generated SQL
pub const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];

/// Relation kind as exposed on a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// Base, partitioned or foreign table
    Table,
    /// View or materialized view
    View,
}

impl RelationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A relation found by `list_relations`, not yet described
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    pub schema: String,
    pub name: String,
    pub kind: RelationKind,
}

impl RelationRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, kind: RelationKind) -> Self {
        Self { schema: schema.into(), name: name.into(), kind }
    }

    /// `schema.name`, the key used on cards and join hints
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// Column information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,

    /// Backend-native type name (opaque, never parsed)
    pub data_type: String,

    /// Part of the primary key
    #[serde(default)]
    pub primary_key: bool,

    /// Referenced by at least one index
    #[serde(default)]
    pub indexed: bool,

    /// Whether column allows NULL values
    pub nullable: bool,
}

/// Structural and statistical summary of one table or view.
///
/// Cards are immutable once built. `join_hints` is filled by the aggregation
/// step in [`crate::schema`] and never authored by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationCard {
    /// Schema-qualified relation name
    pub name: String,

    pub kind: RelationKind,

    /// Columns in ordinal order
    pub columns: Vec<ColumnDescriptor>,

    /// Outbound foreign keys as `<relation>.<column> -> <relation>.<column>`
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub join_hints: BTreeSet<String>,

    /// Planner row estimate; absent for views and never-analyzed tables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_estimate: Option<u64>,
}

impl RelationCard {
    /// Create a card without join hints (as returned by `describe_relation`)
    pub fn new(
        name: impl Into<String>,
        kind: RelationKind,
        columns: Vec<ColumnDescriptor>,
        row_estimate: Option<u64>,
    ) -> Self {
        Self { name: name.into(), kind, columns, join_hints: BTreeSet::new(), row_estimate }
    }
}

/// Directed foreign-key edge between two relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipEdge {
    pub from_relation: String,
    pub from_column: String,
    pub to_relation: String,
    pub to_column: String,
}

impl RelationshipEdge {
    /// Render the edge as a join hint string
    #[must_use]
    pub fn join_hint(&self) -> String {
        format!(
            "{}.{} -> {}.{}",
            self.from_relation, self.from_column, self.to_relation, self.to_column
        )
    }
}

/// Scalar bind parameter proposed by the generator.
///
/// Only scalars are accepted; arrays and objects fail deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Rows returned by a guarded `SELECT`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    /// Result rows as record objects (column name to value)
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,

    /// Number of rows fetched
    pub row_count: usize,
}

impl QueryRows {
    #[must_use]
    pub fn new(rows: Vec<serde_json::Map<String, serde_json::Value>>) -> Self {
        let row_count = rows.len();
        Self { rows, row_count }
    }
}

/// Catalog access and guarded execution for one backend.
///
/// Implementations are bound to a pool; every call checks out its own
/// connection, so `describe_relation` calls may run concurrently.
pub trait SchemaIntrospector: Send + Sync {
    /// Fast connectivity pre-flight run before a full introspection
    fn test_connection(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Every table and view outside system schemas, ordered by schema then name
    fn list_relations(&self) -> impl std::future::Future<Output = Result<Vec<RelationRef>>> + Send;

    /// Columns, key flags, nullability and row estimate of one relation.
    ///
    /// Join hints are left empty; the aggregation step fills them.
    fn describe_relation(
        &self,
        relation: &RelationRef,
    ) -> impl std::future::Future<Output = Result<RelationCard>> + Send;

    /// Every foreign-key edge between non-system relations
    fn list_relationships(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RelationshipEdge>>> + Send;

    /// Declare the statement timeout for subsequent `run_select` calls.
    ///
    /// This is a declaration only; nothing is sent to the database here.
    fn set_timeout_ms(&self, timeout_ms: u64);

    /// Declare the row cap for subsequent `run_select` calls.
    ///
    /// At most `max_rows + 1` rows are fetched, so the caller can tell a
    /// result that hit the cap from one that fit exactly. 0 means no cap.
    fn set_max_rows(&self, max_rows: u64);

    /// Execute a statement that already passed the guard.
    ///
    /// The declared timeout and row cap apply to this call only. The
    /// connection goes back to the pool with its default timeout on every
    /// exit path.
    fn run_select(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> impl std::future::Future<Output = Result<QueryRows>> + Send;
}

/// Pool factory for one database backend
pub trait Backend: Send + Sync {
    /// Shared pool handle; clones refer to the same pool
    type Pool: Clone + Send + Sync;

    /// Introspector bound to a pool
    type Introspector: SchemaIntrospector;

    /// Build a bounded pool for a connection string.
    ///
    /// Fails with `ConnectionFailed` for malformed connection strings. No retry.
    fn create_pool(&self, connection_string: &str, max_connections: usize) -> Result<Self::Pool>;

    /// Stop handing out connections and drop idle ones.
    ///
    /// Checkouts already in flight complete normally.
    fn close_pool(&self, pool: &Self::Pool);

    /// Introspector that checks out connections from `pool`
    fn introspector(&self, pool: &Self::Pool) -> Self::Introspector;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_kind_serialization() {
        assert_eq!(serde_json::to_string(&RelationKind::Table).unwrap(), r#""table""#);
        assert_eq!(serde_json::to_string(&RelationKind::View).unwrap(), r#""view""#);
    }

    #[test]
    fn test_qualified_name() {
        let relation = RelationRef::new("public", "orders", RelationKind::Table);
        assert_eq!(relation.qualified_name(), "public.orders");
    }

    #[test]
    fn test_join_hint_format() {
        let edge = RelationshipEdge {
            from_relation: "public.orders".to_string(),
            from_column: "customer_id".to_string(),
            to_relation: "public.customers".to_string(),
            to_column: "id".to_string(),
        };
        assert_eq!(edge.join_hint(), "public.orders.customer_id -> public.customers.id");
    }

    #[test]
    fn test_sql_param_accepts_scalars_only() {
        let params: Vec<SqlParam> =
            serde_json::from_str(r#"[null, true, 42, 1.5, "acme"]"#).unwrap();
        assert_eq!(
            params,
            vec![
                SqlParam::Null,
                SqlParam::Bool(true),
                SqlParam::Int(42),
                SqlParam::Float(1.5),
                SqlParam::Text("acme".to_string()),
            ]
        );

        assert!(serde_json::from_str::<SqlParam>(r#"[1, 2]"#).is_err());
        assert!(serde_json::from_str::<SqlParam>(r#"{"a": 1}"#).is_err());
    }

    #[test]
    fn test_card_omits_empty_hints_and_estimate() {
        let card = RelationCard::new("public.v_active", RelationKind::View, Vec::new(), None);
        let json = serde_json::to_string(&card).unwrap();
        assert!(!json.contains("join_hints"));
        assert!(!json.contains("row_estimate"));
    }
}
