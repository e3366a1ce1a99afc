//! SQL Safety Guard
//!
//! Static validation of generator output before anything reaches the database.
//! Every check is a pure function with no I/O. [`validate`] applies them in a
//! fixed order:
//!
//! 1. [`is_safe_select`] - single `SELECT`/`WITH` statement, no write or DDL
//!    keywords, no system-schema references
//! 2. [`has_random_order`] - `ORDER BY RANDOM()` is rejected, never repaired
//! 3. [`ensure_limit`] - append `LIMIT <max>` when no `LIMIT` is present
//! 4. [`limit_value`] - the declared limit, checked against the maximum
//!
//! # Validation Strategy
//! - Syntactic allow-list (regex), not a parser
//! - Conservative approach (fail-safe defaults)
//! - Keywords inside string literals or comments are not distinguished from
//!   executable keywords, so a literal such as `'DROP'` is rejected too

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::engine::SYSTEM_SCHEMAS;
use crate::error::{AskError, Result};

static LEADING_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(select|with)\b").unwrap());

static BANNED_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(insert|update|delete|alter|drop|create|truncate|copy|grant|revoke|vacuum|analyze)\b",
    )
    .unwrap()
});

// Matches RANDOM()/RAND() as the first or a later sort key
static RANDOM_ORDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)\border\s+by\s+(?:[\w."]+(?:\s+(?:asc|desc))?\s*,\s*)*(?:random|rand)\s*\(\s*\)"#,
    )
    .unwrap()
});

static LIMIT_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blimit\b").unwrap());

// The literal must end the LIMIT clause: `LIMIT 10 + 5000` is an expression
static LIMIT_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^limit\s+(\d+)(?:\s*$|\s*\)|\s+offset\b)").unwrap()
});

/// A statement that passed every check, ready for execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardedSql {
    /// Final statement text, with `LIMIT` appended if it had none
    pub sql: String,

    /// Row bound the executor enforces: min(max limit, declared limit)
    pub effective_limit: u64,
}

/// Whether `sql` is a single read-only statement.
///
/// After trimming: starts with `SELECT` or `WITH`, contains no semicolon,
/// no banned keyword as a whole word, and no `<system-schema>.` reference.
#[must_use]
pub fn is_safe_select(sql: &str) -> bool {
    let sql = sql.trim();

    LEADING_KEYWORD.is_match(sql)
        && !sql.contains(';')
        && !BANNED_KEYWORD.is_match(sql)
        && !references_system_schema(sql)
}

fn references_system_schema(sql: &str) -> bool {
    let lowered = sql.to_lowercase();
    SYSTEM_SCHEMAS.iter().any(|schema| lowered.contains(&format!("{schema}.")))
}

/// Whether `sql` orders by `RANDOM()` (or `RAND()`)
#[must_use]
pub fn has_random_order(sql: &str) -> bool {
    RANDOM_ORDER.is_match(sql)
}

/// Append ` LIMIT <max>` unless a `LIMIT` keyword is already present.
///
/// An existing limit is left untouched; its value is checked by [`validate`].
#[must_use]
pub fn ensure_limit(sql: &str, max: u64) -> String {
    let sql = sql.trim();
    if LIMIT_KEYWORD.is_match(sql) {
        sql.to_string()
    } else {
        format!("{sql} LIMIT {max}")
    }
}

/// Integer literal following the first `LIMIT` keyword.
///
/// `None` when there is no `LIMIT`, or the first one is not followed by a
/// plain integer (`LIMIT ALL`, `LIMIT $1`), or the integer is only the start
/// of an expression (`LIMIT 10 + 5000`).
#[must_use]
pub fn limit_value(sql: &str) -> Option<u64> {
    let first = LIMIT_KEYWORD.find(sql)?;
    let caps = LIMIT_LITERAL.captures(&sql[first.start()..])?;
    caps.get(1)?.as_str().parse().ok()
}

/// Run every check in order and produce the statement to execute
pub fn validate(sql: &str, max_limit: u64) -> Result<GuardedSql> {
    let trimmed = sql.trim();

    if trimmed.is_empty() {
        return Err(reject("generated statement is empty"));
    }

    if !is_safe_select(trimmed) {
        return Err(reject(unsafe_reason(trimmed)));
    }

    if has_random_order(trimmed) {
        return Err(reject("ORDER BY RANDOM() is not allowed"));
    }

    let sql = ensure_limit(trimmed, max_limit);

    let effective_limit = match limit_value(&sql) {
        Some(declared) if declared > max_limit => {
            return Err(reject(format!(
                "LIMIT {declared} exceeds the maximum of {max_limit}"
            )));
        }
        Some(declared) => declared.min(max_limit),
        None => return Err(reject("LIMIT must be a plain integer literal")),
    };

    Ok(GuardedSql { sql, effective_limit })
}

fn reject(reason: impl Into<String>) -> AskError {
    let reason = reason.into();
    warn!(%reason, "guard rejected statement");
    AskError::guard_rejected(reason)
}

/// Name the first failing part of [`is_safe_select`]
fn unsafe_reason(sql: &str) -> String {
    if !LEADING_KEYWORD.is_match(sql) {
        return "only SELECT or WITH statements are allowed".to_string();
    }
    if sql.contains(';') {
        return "semicolons are not allowed (single statement only)".to_string();
    }
    if let Some(keyword) = BANNED_KEYWORD.find(sql) {
        return format!("forbidden keyword '{}'", keyword.as_str().to_uppercase());
    }
    "system schemas may not be referenced".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BANNED: &[&str] = &[
        "INSERT", "UPDATE", "DELETE", "ALTER", "DROP", "CREATE", "TRUNCATE", "COPY", "GRANT",
        "REVOKE", "VACUUM", "ANALYZE",
    ];

    // is_safe_select

    #[test]
    fn test_plain_select_and_cte_are_safe() {
        assert!(is_safe_select("SELECT * FROM public.orders"));
        assert!(is_safe_select("  select id from orders  "));
        assert!(is_safe_select(
            "WITH recent AS (SELECT * FROM orders) SELECT count(*) FROM recent"
        ));
    }

    #[test]
    fn test_semicolon_anywhere_is_unsafe() {
        assert!(!is_safe_select("SELECT 1;"));
        assert!(!is_safe_select("SELECT 1; SELECT 2"));
        assert!(!is_safe_select("SELECT ';' AS sep"));
    }

    #[test]
    fn test_banned_keywords_any_case() {
        for keyword in BANNED {
            let upper = format!("{keyword} something");
            let lower = upper.to_lowercase();
            assert!(!is_safe_select(&upper), "{upper}");
            assert!(!is_safe_select(&lower), "{lower}");

            let embedded = format!("SELECT * FROM t WHERE x IN ({keyword} 1)");
            assert!(!is_safe_select(&embedded), "{embedded}");
        }
    }

    #[test]
    fn test_banned_keyword_needs_word_boundary() {
        assert!(is_safe_select("SELECT created_at, updated_by FROM events"));
        assert!(is_safe_select("SELECT * FROM dropship_orders"));
    }

    #[test]
    fn test_other_statements_are_unsafe() {
        assert!(!is_safe_select("EXPLAIN SELECT 1"));
        assert!(!is_safe_select("SHOW search_path"));
        assert!(!is_safe_select("selectx FROM t"));
        assert!(!is_safe_select(""));
    }

    #[test]
    fn test_system_schema_reference_is_unsafe() {
        assert!(!is_safe_select("SELECT * FROM pg_catalog.pg_user"));
        assert!(!is_safe_select("SELECT * FROM INFORMATION_SCHEMA.tables"));
        assert!(!is_safe_select("SELECT * FROM Pg_Toast.pg_toast_1"));
        assert!(is_safe_select("SELECT * FROM public.pg_catalogue"));
    }

    // has_random_order

    #[test]
    fn test_random_order() {
        assert!(has_random_order("select * from a order by random()"));
        assert!(has_random_order("SELECT * FROM a ORDER   BY  RANDOM ( )"));
        assert!(has_random_order("SELECT * FROM a ORDER BY name ASC, rand()"));
        assert!(!has_random_order("select * from a order by name"));
        assert!(!has_random_order("select random() from a"));
    }

    // ensure_limit

    #[test]
    fn test_ensure_limit() {
        assert_eq!(ensure_limit("SELECT * FROM a", 100), "SELECT * FROM a LIMIT 100");
        assert_eq!(ensure_limit("SELECT * FROM a LIMIT 5", 100), "SELECT * FROM a LIMIT 5");
        assert_eq!(ensure_limit("  SELECT 1\n", 10), "SELECT 1 LIMIT 10");
        assert_eq!(ensure_limit("  SELECT 1 LIMIT 5 \n", 10), "SELECT 1 LIMIT 5");
    }

    #[test]
    fn test_ensure_limit_is_idempotent() {
        let once = ensure_limit("SELECT * FROM a", 100);
        assert_eq!(ensure_limit(&once, 100), once);
    }

    // limit_value

    #[test]
    fn test_limit_value() {
        assert_eq!(limit_value("SELECT * FROM a LIMIT 5"), Some(5));
        assert_eq!(limit_value("select * from a limit\n  25 offset 10"), Some(25));
        assert_eq!(limit_value("SELECT * FROM a"), None);
        assert_eq!(limit_value("SELECT * FROM a LIMIT ALL"), None);
        assert_eq!(limit_value("SELECT * FROM a LIMIT $1"), None);
        assert_eq!(limit_value("SELECT * FROM a LIMIT 7 )"), Some(7));
    }

    #[test]
    fn test_limit_value_uses_first_limit() {
        let sql = "SELECT * FROM (SELECT * FROM a LIMIT 3) s LIMIT 500";
        assert_eq!(limit_value(sql), Some(3));
        assert_eq!(limit_value("SELECT * FROM a LIMIT ALL) s LIMIT 5"), None);
    }

    #[test]
    fn test_limit_value_rejects_expressions() {
        assert_eq!(limit_value("SELECT * FROM t LIMIT 10 + 5000"), None);
        assert_eq!(limit_value("SELECT * FROM t LIMIT 1 * 100000"), None);
        assert_eq!(limit_value("SELECT * FROM t LIMIT 10::bigint"), None);
        assert_eq!(limit_value("SELECT * FROM (SELECT * FROM t LIMIT 2 + 2) s"), None);

        for sql in ["SELECT * FROM t LIMIT 10 + 5000", "SELECT * FROM t LIMIT 1 * 100000"] {
            let err = validate(sql, 1000).unwrap_err();
            assert_eq!(err.error_code(), "GUARD_REJECTED", "{sql}");
            assert!(err.message().contains("plain integer literal"), "{sql}");
        }
    }

    // validate

    #[test]
    fn test_validate_appends_limit() {
        let guarded = validate("SELECT * FROM public.orders", 1000).unwrap();
        assert_eq!(guarded.sql, "SELECT * FROM public.orders LIMIT 1000");
        assert_eq!(guarded.effective_limit, 1000);
    }

    #[test]
    fn test_validate_keeps_smaller_limit() {
        let guarded = validate("SELECT * FROM orders LIMIT 10", 1000).unwrap();
        assert_eq!(guarded.sql, "SELECT * FROM orders LIMIT 10");
        assert_eq!(guarded.effective_limit, 10);
    }

    #[test]
    fn test_validate_rejections() {
        let cases = [
            ("", "empty"),
            ("DELETE FROM public.orders", "only SELECT or WITH"),
            ("SELECT 1; DROP TABLE x", "semicolons"),
            ("WITH d AS (DELETE FROM t RETURNING *) SELECT * FROM d", "forbidden keyword 'DELETE'"),
            ("SELECT * FROM pg_catalog.pg_roles", "system schemas"),
            ("SELECT * FROM t ORDER BY random()", "RANDOM()"),
            ("SELECT * FROM t LIMIT 5000", "exceeds the maximum of 1000"),
            ("SELECT * FROM t LIMIT ALL", "plain integer literal"),
        ];

        for (sql, expected) in cases {
            let err = validate(sql, 1000).unwrap_err();
            assert_eq!(err.error_code(), "GUARD_REJECTED", "{sql}");
            assert!(err.message().contains(expected), "{sql}: {}", err.message());
        }
    }

    #[test]
    fn test_literal_keywords_rejected() {
        // Literals are not distinguished from executable keywords
        assert!(validate("SELECT * FROM notes WHERE body = 'please drop by'", 100).is_err());
    }
}
