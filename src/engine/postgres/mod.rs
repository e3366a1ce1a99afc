//! `PostgreSQL` Backend Implementation
//!
//! This module implements [`Backend`] and [`SchemaIntrospector`] for `PostgreSQL`.
//!
//! # Features
//! - Pooled connections via `deadpool-postgres`
//! - Schema introspection via `pg_catalog` (relations, columns, keys, FK edges)
//! - Row estimates from planner statistics (`pg_class.reltuples`), never a scan
//! - Guarded execution inside a `READ ONLY` transaction
//! - Row cap enforced through a portal: at most cap + 1 rows leave the server
//!
//! # Implementation Notes
//! - Statement timeouts use `SET LOCAL`, so they end with the transaction
//! - Pools recycle with `RecyclingMethod::Clean`, which resets session state
//!   even if a checkout is dropped mid-statement
//! - A client-side `tokio::time::timeout` backs up the server-side timeout
//! - User-facing errors carry the SQLSTATE only; server text goes to `debug`
//! - JSON/JSONB preserved as nested JSON
//! - BYTEA data is Base64-encoded for JSON safety
//! - NUMERIC values are rendered as decimal strings (no precision loss)

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::debug;

use crate::engine::{
    Backend, ColumnDescriptor, QueryRows, RelationCard, RelationKind, RelationRef,
    RelationshipEdge, SchemaIntrospector, SqlParam, SYSTEM_SCHEMAS,
};
use crate::error::{AskError, Result};

/// Extra time granted to the server-side timeout before the client gives up
const CLIENT_GRACE_MS: u64 = 500;

/// `PostgreSQL` pool factory
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBackend;

impl Backend for PostgresBackend {
    type Pool = Pool;
    type Introspector = PostgresIntrospector;

    fn create_pool(&self, connection_string: &str, max_connections: usize) -> Result<Pool> {
        let mut config = Config::new();
        config.url = Some(connection_string.to_string());
        config.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Clean });
        config.pool = Some(PoolConfig::new(max_connections));

        config.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            debug!(error = %e, "pool construction failed");
            AskError::connection_failed("Failed to create PostgreSQL pool: invalid connection string")
        })
    }

    fn close_pool(&self, pool: &Pool) {
        pool.close();
    }

    fn introspector(&self, pool: &Pool) -> PostgresIntrospector {
        PostgresIntrospector::new(pool.clone())
    }
}

/// Catalog reader and guarded executor bound to one pool
pub struct PostgresIntrospector {
    pool: Pool,
    /// Declared statement timeout; 0 keeps the server default
    timeout_ms: AtomicU64,
    /// Declared row cap; 0 fetches everything
    max_rows: AtomicU64,
}

impl PostgresIntrospector {
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self { pool, timeout_ms: AtomicU64::new(0), max_rows: AtomicU64::new(0) }
    }

    async fn checkout(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| map_pool_error(&e))
    }
}

impl SchemaIntrospector for PostgresIntrospector {
    async fn test_connection(&self) -> Result<()> {
        let client = self.checkout().await?;
        client.simple_query("SELECT 1").await.map_err(|e| {
            debug!(error = %e, "pre-flight query failed");
            AskError::connection_failed(format!(
                "PostgreSQL pre-flight query failed{}",
                db_error_detail(e.code(), e.is_closed())
            ))
        })?;
        Ok(())
    }

    async fn list_relations(&self) -> Result<Vec<RelationRef>> {
        let query = r"
            SELECT n.nspname::text, c.relname::text, c.relkind::text
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p', 'f', 'v', 'm')
              AND NOT c.relispartition
              AND n.nspname::text <> ALL($1::text[])
              AND n.nspname NOT LIKE 'pg\_%'
            ORDER BY n.nspname, c.relname";

        let client = self.checkout().await?;
        let rows = client
            .query(query, &[&SYSTEM_SCHEMAS])
            .await
            .map_err(|e| catalog_error(&e, "Failed to list relations"))?;

        let relations = rows
            .iter()
            .map(|row| {
                let schema: String = row.get(0);
                let name: String = row.get(1);
                let relkind: String = row.get(2);
                RelationRef::new(schema, name, relation_kind(&relkind))
            })
            .collect();

        Ok(relations)
    }

    async fn describe_relation(&self, relation: &RelationRef) -> Result<RelationCard> {
        let client = self.checkout().await?;
        let qualified = relation.qualified_name();

        let stats_query = "
            SELECT c.reltuples::float8
            FROM pg_catalog.pg_class c
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2";

        let stats = client
            .query_opt(stats_query, &[&relation.schema, &relation.name])
            .await
            .map_err(|e| catalog_error(&e, &format!("Failed to read statistics for {qualified}")))?
            .ok_or_else(|| {
                AskError::introspection_failed(format!("Relation '{qualified}' no longer exists"))
            })?;

        let reltuples: f64 = stats.get(0);
        let row_estimate = match relation.kind {
            RelationKind::View => None,
            RelationKind::Table => row_estimate(reltuples),
        };

        let columns = introspect_columns(&client, relation).await?;

        Ok(RelationCard::new(qualified, relation.kind, columns, row_estimate))
    }

    async fn list_relationships(&self) -> Result<Vec<RelationshipEdge>> {
        let query = r"
            SELECT
                sn.nspname::text, sc.relname::text, sa.attname::text,
                tn.nspname::text, tc.relname::text, ta.attname::text
            FROM pg_catalog.pg_constraint con
            JOIN pg_catalog.pg_class sc ON sc.oid = con.conrelid
            JOIN pg_catalog.pg_namespace sn ON sn.oid = sc.relnamespace
            JOIN pg_catalog.pg_class tc ON tc.oid = con.confrelid
            JOIN pg_catalog.pg_namespace tn ON tn.oid = tc.relnamespace
            CROSS JOIN LATERAL unnest(con.conkey, con.confkey) AS k(src_attnum, dst_attnum)
            JOIN pg_catalog.pg_attribute sa
              ON sa.attrelid = con.conrelid AND sa.attnum = k.src_attnum
            JOIN pg_catalog.pg_attribute ta
              ON ta.attrelid = con.confrelid AND ta.attnum = k.dst_attnum
            WHERE con.contype = 'f'
              AND sn.nspname::text <> ALL($1::text[])
              AND tn.nspname::text <> ALL($1::text[])
              AND sn.nspname NOT LIKE 'pg\_%'
              AND tn.nspname NOT LIKE 'pg\_%'
            ORDER BY 1, 2, con.conname, 3";

        let client = self.checkout().await?;
        let rows = client
            .query(query, &[&SYSTEM_SCHEMAS])
            .await
            .map_err(|e| catalog_error(&e, "Failed to list foreign keys"))?;

        let edges = rows
            .iter()
            .map(|row| {
                let from_schema: String = row.get(0);
                let from_table: String = row.get(1);
                let to_schema: String = row.get(3);
                let to_table: String = row.get(4);
                RelationshipEdge {
                    from_relation: format!("{from_schema}.{from_table}"),
                    from_column: row.get(2),
                    to_relation: format!("{to_schema}.{to_table}"),
                    to_column: row.get(5),
                }
            })
            .collect();

        Ok(edges)
    }

    fn set_timeout_ms(&self, timeout_ms: u64) {
        self.timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    fn set_max_rows(&self, max_rows: u64) {
        self.max_rows.store(max_rows, Ordering::Relaxed);
    }

    async fn run_select(&self, sql: &str, params: &[SqlParam]) -> Result<QueryRows> {
        let timeout_ms = self.timeout_ms.load(Ordering::Relaxed);
        let fetch = portal_fetch_size(self.max_rows.load(Ordering::Relaxed));

        if timeout_ms == 0 {
            return self.run_read_only(sql, params, timeout_ms, fetch).await;
        }

        let deadline = Duration::from_millis(timeout_ms + CLIENT_GRACE_MS);
        tokio::time::timeout(deadline, self.run_read_only(sql, params, timeout_ms, fetch))
            .await
            .map_err(|_| AskError::timeout(timeout_ms))?
    }
}

impl PostgresIntrospector {
    /// Run one statement in a read-only transaction scoped to this call.
    ///
    /// `SET LOCAL` ends with the transaction. On any error the transaction is
    /// dropped, which rolls it back and restores the connection default.
    /// At most `fetch` rows are pulled from the portal (0 pulls all of them).
    async fn run_read_only(
        &self,
        sql: &str,
        params: &[SqlParam],
        timeout_ms: u64,
        fetch: i32,
    ) -> Result<QueryRows> {
        let mut client = self.checkout().await?;
        let tx = client
            .build_transaction()
            .read_only(true)
            .start()
            .await
            .map_err(|e| map_execution_error(&e, timeout_ms))?;

        if timeout_ms > 0 {
            tx.batch_execute(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
                .await
                .map_err(|e| map_execution_error(&e, timeout_ms))?;
        }

        let stmt = tx.prepare(sql).await.map_err(|e| map_execution_error(&e, timeout_ms))?;

        check_param_count(stmt.params().len(), params.len())?;

        let bound = params
            .iter()
            .zip(stmt.params())
            .map(|(param, ty)| bind_param(param, ty))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

        let portal = tx.bind(&stmt, &refs).await.map_err(|e| map_execution_error(&e, timeout_ms))?;
        let rows = tx
            .query_portal(&portal, fetch)
            .await
            .map_err(|e| map_execution_error(&e, timeout_ms))?;
        debug!(rows = rows.len(), fetch, "portal fetch complete");

        let column_names: Vec<String> =
            stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let records =
            rows.iter().map(|row| row_to_record(&column_names, row)).collect::<Result<Vec<_>>>()?;

        tx.commit().await.map_err(|e| map_execution_error(&e, timeout_ms))?;

        Ok(QueryRows::new(records))
    }
}

/// Rows to pull from the portal for a declared cap: one extra row tells a
/// capped result from an exact fit. 0 means no cap.
fn portal_fetch_size(max_rows: u64) -> i32 {
    if max_rows == 0 {
        return 0;
    }
    i32::try_from(max_rows.saturating_add(1)).unwrap_or(i32::MAX)
}

/// The generator's parameter list must match the placeholders `prepare` found
fn check_param_count(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        return Ok(());
    }
    Err(AskError::generator_contract(format!(
        "Statement expects {expected} bind parameters, got {got}"
    )))
}

/// Map `pg_class.relkind` to the card kind
fn relation_kind(relkind: &str) -> RelationKind {
    match relkind {
        "v" | "m" => RelationKind::View,
        _ => RelationKind::Table,
    }
}

/// `reltuples` is -1 for never-analyzed tables (PostgreSQL 14+)
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn row_estimate(reltuples: f64) -> Option<u64> {
    if reltuples.is_finite() && reltuples >= 0.0 {
        Some(reltuples.round() as u64)
    } else {
        None
    }
}

/// Introspect columns with key and index flags
async fn introspect_columns(
    client: &deadpool_postgres::Object,
    relation: &RelationRef,
) -> Result<Vec<ColumnDescriptor>> {
    let query = "
        SELECT
            a.attname::text,
            pg_catalog.format_type(a.atttypid, a.atttypmod),
            NOT a.attnotnull,
            EXISTS (
                SELECT 1 FROM pg_catalog.pg_index i
                WHERE i.indrelid = c.oid AND i.indisprimary AND a.attnum = ANY(i.indkey)
            ),
            EXISTS (
                SELECT 1 FROM pg_catalog.pg_index i
                WHERE i.indrelid = c.oid AND a.attnum = ANY(i.indkey)
            )
        FROM pg_catalog.pg_attribute a
        JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relname = $2
          AND a.attnum > 0 AND NOT a.attisdropped
        ORDER BY a.attnum";

    let rows = client.query(query, &[&relation.schema, &relation.name]).await.map_err(|e| {
        catalog_error(&e, &format!("Failed to query columns for {}", relation.qualified_name()))
    })?;

    let columns = rows
        .iter()
        .map(|row| ColumnDescriptor {
            name: row.get(0),
            data_type: row.get(1),
            nullable: row.get(2),
            primary_key: row.get(3),
            indexed: row.get(4),
        })
        .collect();

    Ok(columns)
}

/// User-facing suffix for a driver error: SQLSTATE when the server sent one
fn db_error_detail(code: Option<&SqlState>, closed: bool) -> String {
    match code {
        Some(code) => format!(" (SQLSTATE {})", code.code()),
        None if closed => ": connection closed".to_string(),
        None => String::new(),
    }
}

fn catalog_error(err: &tokio_postgres::Error, context: &str) -> AskError {
    debug!(error = %err, context, "catalog query failed");
    AskError::introspection_failed(format!(
        "{context}{}",
        db_error_detail(err.code(), err.is_closed())
    ))
}

fn map_pool_error(err: &PoolError) -> AskError {
    debug!(error = %err, "connection checkout failed");

    match err {
        PoolError::Backend(e) => AskError::connection_failed(format!(
            "Failed to acquire PostgreSQL connection{}",
            db_error_detail(e.code(), e.is_closed())
        )),
        PoolError::Timeout(_) => {
            AskError::connection_failed("Timed out acquiring a PostgreSQL connection")
        }
        PoolError::Closed => AskError::connection_failed("Connection pool is closed"),
        _ => AskError::connection_failed("Failed to acquire PostgreSQL connection"),
    }
}

/// Classify an execution error without exposing raw server text.
///
/// The full error goes to the debug log only.
fn map_execution_error(err: &tokio_postgres::Error, timeout_ms: u64) -> AskError {
    debug!(error = %err, "statement execution failed");

    match err.code() {
        Some(code) if *code == SqlState::QUERY_CANCELED => AskError::timeout(timeout_ms),
        Some(code) => AskError::query_failed(format!(
            "Database rejected the statement (SQLSTATE {})",
            code.code()
        )),
        None if err.is_closed() => AskError::query_failed("Connection closed during execution"),
        None => AskError::query_failed("Statement could not be executed"),
    }
}

type BoundParam = Box<dyn ToSql + Sync + Send>;

fn is_text_type(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN)
}

/// Coerce a generator-supplied scalar to the type `prepare` inferred
fn bind_param(param: &SqlParam, ty: &Type) -> Result<BoundParam> {
    let mismatch = |what: &str| {
        AskError::query_failed(format!("Cannot bind {what} parameter to type '{}'", ty.name()))
    };

    let bound: BoundParam = match param {
        SqlParam::Null => typed_null(ty),

        SqlParam::Bool(v) => match *ty {
            Type::BOOL => Box::new(*v),
            _ if is_text_type(ty) => Box::new(v.to_string()),
            _ => return Err(mismatch("boolean")),
        },

        SqlParam::Int(v) => match *ty {
            Type::INT2 => Box::new(i16::try_from(*v).map_err(|_| mismatch("out-of-range integer"))?),
            Type::INT4 => Box::new(i32::try_from(*v).map_err(|_| mismatch("out-of-range integer"))?),
            Type::INT8 => Box::new(*v),
            #[allow(clippy::cast_precision_loss)]
            Type::FLOAT4 => Box::new(*v as f32),
            #[allow(clippy::cast_precision_loss)]
            Type::FLOAT8 => Box::new(*v as f64),
            _ if is_text_type(ty) => Box::new(v.to_string()),
            _ => return Err(mismatch("integer")),
        },

        SqlParam::Float(v) => match *ty {
            #[allow(clippy::cast_possible_truncation)]
            Type::FLOAT4 => Box::new(*v as f32),
            Type::FLOAT8 => Box::new(*v),
            _ if is_text_type(ty) => Box::new(v.to_string()),
            _ => return Err(mismatch("float")),
        },

        SqlParam::Text(v) => match *ty {
            _ if is_text_type(ty) => Box::new(v.clone()),
            Type::INT2 => Box::new(v.parse::<i16>().map_err(|_| mismatch("text"))?),
            Type::INT4 => Box::new(v.parse::<i32>().map_err(|_| mismatch("text"))?),
            Type::INT8 => Box::new(v.parse::<i64>().map_err(|_| mismatch("text"))?),
            Type::UUID => Box::new(uuid::Uuid::parse_str(v).map_err(|_| mismatch("text"))?),
            Type::DATE => Box::new(
                chrono::NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| mismatch("text"))?,
            ),
            Type::TIMESTAMP => Box::new(
                v.parse::<chrono::NaiveDateTime>().map_err(|_| mismatch("text"))?,
            ),
            Type::TIMESTAMPTZ => Box::new(
                chrono::DateTime::parse_from_rfc3339(v)
                    .map_err(|_| mismatch("text"))?
                    .with_timezone(&chrono::Utc),
            ),
            Type::JSON | Type::JSONB => {
                Box::new(serde_json::from_str::<serde_json::Value>(v).map_err(|_| mismatch("text"))?)
            }
            _ => return Err(mismatch("text")),
        },
    };

    Ok(bound)
}

/// NULL whose Rust type matches the parameter type (ToSql checks `accepts`)
fn typed_null(ty: &Type) -> BoundParam {
    match *ty {
        Type::BOOL => Box::new(None::<bool>),
        Type::INT2 => Box::new(None::<i16>),
        Type::INT4 => Box::new(None::<i32>),
        Type::INT8 => Box::new(None::<i64>),
        Type::FLOAT4 => Box::new(None::<f32>),
        Type::FLOAT8 => Box::new(None::<f64>),
        Type::UUID => Box::new(None::<uuid::Uuid>),
        Type::DATE => Box::new(None::<chrono::NaiveDate>),
        Type::TIMESTAMP => Box::new(None::<chrono::NaiveDateTime>),
        Type::TIMESTAMPTZ => Box::new(None::<chrono::DateTime<chrono::Utc>>),
        Type::JSON | Type::JSONB => Box::new(None::<serde_json::Value>),
        _ => Box::new(None::<String>),
    }
}

/// Convert a `PostgreSQL` row to a record object
fn row_to_record(
    column_names: &[String],
    row: &Row,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let mut record = serde_json::Map::with_capacity(column_names.len());

    for (idx, name) in column_names.iter().enumerate() {
        record.insert(name.clone(), postgres_value_to_json(row, idx)?);
    }

    Ok(record)
}

/// Read a nullable column, mapping NULL to `None`
fn read<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        debug!(error = %e, column = idx, "column decode failed");
        AskError::query_failed(format!(
            "Failed to read column '{}' of type '{}'",
            row.columns()[idx].name(),
            row.columns()[idx].type_().name()
        ))
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let col_type = row.columns()[idx].type_().clone();

    let value = match col_type {
        Type::BOOL => read::<bool>(row, idx)?.map_or(Value::Null, Value::Bool),

        Type::INT2 => read::<i16>(row, idx)?.map_or(Value::Null, |v| Value::Number(v.into())),
        Type::INT4 => read::<i32>(row, idx)?.map_or(Value::Null, |v| Value::Number(v.into())),
        Type::INT8 => read::<i64>(row, idx)?.map_or(Value::Null, |v| Value::Number(v.into())),
        Type::OID => read::<u32>(row, idx)?.map_or(Value::Null, |v| Value::Number(v.into())),

        // NaN/Infinity become null
        Type::FLOAT4 => read::<f32>(row, idx)?
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(Value::Null, Value::Number),
        Type::FLOAT8 => read::<f64>(row, idx)?
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            read::<String>(row, idx)?.map_or(Value::Null, Value::String)
        }

        Type::JSON | Type::JSONB => read::<Value>(row, idx)?.unwrap_or(Value::Null),

        Type::BYTEA => read::<Vec<u8>>(row, idx)?.map_or(Value::Null, |v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),

        Type::TIMESTAMP => read::<chrono::NaiveDateTime>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => read::<chrono::DateTime<chrono::Utc>>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
        Type::DATE => read::<chrono::NaiveDate>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => read::<chrono::NaiveTime>(row, idx)?
            .map_or(Value::Null, |v| Value::String(v.format("%H:%M:%S%.f").to_string())),

        Type::UUID => read::<uuid::Uuid>(row, idx)?.map_or(Value::Null, |v| Value::String(v.to_string())),

        Type::NUMERIC => read::<RawValue>(row, idx)?
            .and_then(|raw| decode_numeric(raw.0))
            .map_or(Value::Null, Value::String),

        // Enums and other text-encoded types come through as UTF-8; anything
        // else binary is Base64-encoded
        _ => read::<RawValue>(row, idx)?.map_or(Value::Null, |raw| match std::str::from_utf8(raw.0) {
            Ok(text) => Value::String(text.to_string()),
            Err(_) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(raw.0))
            }
        }),
    };

    Ok(value)
}

/// Undecoded wire bytes of a column of any type
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Decode the binary NUMERIC format into a decimal string.
///
/// Layout: ndigits, weight, sign, dscale (all 16-bit), then base-10000 digits.
fn decode_numeric(raw: &[u8]) -> Option<String> {
    let word = |i: usize| raw.get(i..i + 2).map(|b| u16::from_be_bytes([b[0], b[1]]));

    let ndigits = usize::from(word(0)?);
    #[allow(clippy::cast_possible_wrap)]
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => return None,
    }

    let digits = (0..ndigits).map(|i| word(8 + i * 2)).collect::<Option<Vec<u16>>>()?;
    let digit_at = |i: i32| usize::try_from(i).ok().and_then(|i| digits.get(i).copied()).unwrap_or(0);

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                out.push_str(&digit_at(i).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(i)));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Some(out)
}
