//! askdb - Natural-Language Questions over PostgreSQL
//!
//! askdb turns a plain-language question into a single read-only SQL
//! statement, checks it with a static guard, bounds it, and runs it against a
//! pooled PostgreSQL connection. Output is JSON-only, for agents and scripts.
//!
//! # Core Principles
//! - Read-only by construction (guard, read-only transaction, statement timeout)
//! - Bounded results (row limit and a serialized byte budget)
//! - No credentials in logs or responses
//!
//! # Architecture
//! The CLI and the MCP server are thin wrappers over one [`Pipeline`]:
//! cards (cache or introspection) -> relevance -> generator -> guard -> execution.
//!
//! # Module Organization
//! - [`error`] - Error types and stable error codes
//! - [`output`] - JSON output envelope types
//! - [`engine`] - Backend traits, data model and the PostgreSQL backend
//! - [`pool`] - LRU registry of connection pools
//! - [`schema`] - Relation card building and the TTL card cache
//! - [`retrieval`] - Lexical relevance scoring
//! - [`generator`] - SQL generator contract and HTTP client
//! - [`guard`] - Static SQL safety checks
//! - [`executor`] - Bounded execution and result shaping
//! - [`pipeline`] - The request pipeline
//! - [`config`] - Configuration management
//! - [`mcp`] - MCP server over stdio

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod generator;
pub mod guard;
pub mod mcp;
pub mod output;
pub mod pipeline;
pub mod pool;
pub mod retrieval;
pub mod schema;

pub use config::{Config, ConfigLocation, GeneratorSettings, Settings, StoredConnection};
pub use engine::{
    Backend, ColumnDescriptor, QueryRows, RelationCard, RelationKind, RelationRef,
    RelationshipEdge, SchemaIntrospector, SqlParam,
};
pub use error::{AskError, ErrorCategory, Result};
pub use executor::{ExecutionLimits, ExplainResponse, QueryResponse};
pub use generator::{GeneratedSql, GenerationRequest, HttpGenerator, SqlGenerator};
pub use guard::{ensure_limit, has_random_order, is_safe_select, limit_value, validate, GuardedSql};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use pipeline::{Pipeline, SchemaReport};
pub use pool::PoolRegistry;
pub use retrieval::pick_top_k;
pub use schema::{CardCache, CardSnapshot};
