//! Output Validation Tests
//!
//! Pins the JSON shapes that agents and scripts parse:
//! - Success envelopes (`ok`, `command`, `data`, `meta`)
//! - Error envelopes (`ok`, `command`, `error` with code/category/message)
//! - Query, explain and guard payloads
//!
//! Uses `insta` for snapshot testing to detect unintended output changes.

use askdb::executor::{ExplainResponse, QueryResponse};
use askdb::{validate, AskError, ErrorEnvelope, Metadata, SuccessEnvelope};
use serde_json::json;

fn record(id: i64, name: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut record = serde_json::Map::new();
    record.insert("id".to_string(), json!(id));
    record.insert("name".to_string(), json!(name));
    record
}

// ============================================================================
// Envelope Structure Tests
// ============================================================================

#[test]
fn test_success_envelope_structure() {
    let envelope = SuccessEnvelope::new("schema", json!({"test": "value"}), Metadata::new(42));

    let value = serde_json::to_value(&envelope).unwrap();
    let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();

    // serde_json maps are sorted by key
    assert_eq!(keys, vec!["command", "data", "meta", "ok"]);
    assert_eq!(value["ok"], true);
    assert_eq!(value["meta"]["execution_ms"], 42);
    assert!(value["meta"].get("rows_returned").is_none());
}

#[test]
fn test_error_envelope_structure() {
    let envelope = ErrorEnvelope::from_error("ask", &AskError::timeout(2500));

    let value = serde_json::to_value(&envelope).unwrap();
    let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();

    assert_eq!(keys, vec!["command", "error", "ok"]);
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "QUERY_TIMEOUT");
    assert_eq!(value["error"]["category"], "execution");
}

#[test]
fn test_envelope_is_single_line_json() {
    let envelope =
        SuccessEnvelope::new("ask", json!({"rows": [], "rowCount": 0}), Metadata::with_rows(1, 0));
    let line = serde_json::to_string(&envelope).unwrap();

    assert!(!line.contains('\n'));
    assert!(serde_json::from_str::<serde_json::Value>(&line).is_ok());
}

#[test]
fn test_error_messages_carry_no_connection_string() {
    let err = AskError::connection_failed("Failed to build pool for a8f3c2d1");
    let line = serde_json::to_string(&ErrorEnvelope::from_error("ask", &err)).unwrap();

    assert!(!line.contains("postgres://"));
}

// ============================================================================
// Snapshot Tests
// ============================================================================

#[test]
fn test_query_success_snapshot() {
    let response = QueryResponse {
        rows: vec![record(1, "Ada"), record(2, "Grace")],
        row_count: 2,
        sql: "SELECT id, name FROM public.customers LIMIT 1000".to_string(),
        truncated: false,
    };
    let envelope = SuccessEnvelope::new("ask", response, Metadata::with_rows(17, 2));

    insta::assert_json_snapshot!(envelope, @r#"
    {
      "ok": true,
      "command": "ask",
      "data": {
        "rows": [
          {
            "id": 1,
            "name": "Ada"
          },
          {
            "id": 2,
            "name": "Grace"
          }
        ],
        "rowCount": 2,
        "sql": "SELECT id, name FROM public.customers LIMIT 1000"
      },
      "meta": {
        "execution_ms": 17,
        "rows_returned": 2
      }
    }
    "#);
}

#[test]
fn test_truncated_query_snapshot() {
    let response = QueryResponse {
        rows: vec![record(1, "Ada")],
        row_count: 1,
        sql: "SELECT id, name FROM public.customers LIMIT 1000".to_string(),
        truncated: true,
    };

    insta::assert_json_snapshot!(response, @r#"
    {
      "rows": [
        {
          "id": 1,
          "name": "Ada"
        }
      ],
      "rowCount": 1,
      "sql": "SELECT id, name FROM public.customers LIMIT 1000",
      "truncated": true
    }
    "#);
}

#[test]
fn test_guard_error_snapshot() {
    let err = validate("DELETE FROM public.orders", 1000).unwrap_err();
    let envelope = ErrorEnvelope::from_error("ask", &err);

    insta::assert_json_snapshot!(envelope, @r#"
    {
      "ok": false,
      "command": "ask",
      "error": {
        "code": "GUARD_REJECTED",
        "category": "guard",
        "message": "Guard rejected statement: only SELECT or WITH statements are allowed"
      }
    }
    "#);
}

#[test]
fn test_explain_snapshot() {
    let response = ExplainResponse {
        answer: "Count rows in public.orders grouped by customer_id.".to_string(),
        references: Vec::new(),
    };

    insta::assert_json_snapshot!(response, @r#"
    {
      "answer": "Count rows in public.orders grouped by customer_id."
    }
    "#);
}

#[test]
fn test_check_snapshot() {
    let guarded = validate("SELECT * FROM public.orders LIMIT 25", 1000).unwrap();

    insta::assert_json_snapshot!(guarded, @r#"
    {
      "sql": "SELECT * FROM public.orders LIMIT 25",
      "effective_limit": 25
    }
    "#);
}
