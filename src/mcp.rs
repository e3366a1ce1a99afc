//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Dependencies**: Only `serde_json` and anyhow (no MCP-specific crates)
//! - **State**: One long-lived [`Pipeline`], so pools and cached relation
//!   cards persist across tool calls. Everything is torn down at EOF.
//!
//! # MCP Tools
//!
//! - `ask` - Answer a question with rows from a guarded, bounded SELECT
//! - `explain` - Explain how a question maps onto the schema (no execution)
//! - `schema` - List relation cards, optionally ranked against a phrase
//!
//! # Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "askdb": { "command": "askdb", "args": ["mcp"] }
//!   }
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::Backend;
use crate::error::AskError;
use crate::generator::SqlGenerator;
use crate::output::ErrorInfo;
use crate::pipeline::Pipeline;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    const fn result(id: Option<Value>, value: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(value), error: None }
    }

    const fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(JsonRpcError { code, message }) }
    }
}

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: &'static str,
    text: String,
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    /// Successful tool result carrying pretty-printed JSON data
    fn success(data: &impl Serialize) -> Result<Value> {
        Self::text(serde_json::to_string_pretty(data)?, false)
    }

    /// Tool-level failure; the agent sees the code, category and message
    fn failure(err: &AskError) -> Result<Value> {
        Self::text(serde_json::to_string_pretty(&ErrorInfo::from(err))?, true)
    }

    fn text(text: String, is_error: bool) -> Result<Value> {
        let result = Self { content: vec![TextContent { content_type: "text", text }], is_error };
        Ok(serde_json::to_value(result)?)
    }
}

// ============================================================================
// MCP Server
// ============================================================================

/// Tool server over one shared pipeline
pub struct McpServer<B: Backend, G: SqlGenerator> {
    pipeline: Pipeline<B, G>,
    config: Config,
}

impl<B: Backend, G: SqlGenerator> McpServer<B, G> {
    pub const fn new(pipeline: Pipeline<B, G>, config: Config) -> Self {
        Self { pipeline, config }
    }

    pub const fn pipeline(&self) -> &Pipeline<B, G> {
        &self.pipeline
    }

    /// Run the server loop until stdin closes.
    ///
    /// Each request is a single line of JSON; each response is a single line
    /// of JSON. Notifications get no response.
    pub async fn serve(&self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        info!("MCP server listening on stdio");

        while let Some(line) = lines.next_line().await? {
            if let Some(response) = self.handle_line(&line).await? {
                stdout.write_all(response.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        self.pipeline.shutdown();
        info!("stdin closed, MCP server stopped");
        Ok(())
    }

    /// Handle one line of input, returning the serialized response (if any)
    pub async fn handle_line(&self, line: &str) -> Result<Option<String>> {
        // Skip empty lines
        if line.trim().is_empty() {
            return Ok(None);
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                let response = JsonRpcResponse::error(None, -32700, format!("Parse error: {e}"));
                return Ok(Some(serde_json::to_string(&response)?));
            }
        };

        if request.id.is_none() && request.method.starts_with("notifications/") {
            debug!(method = %request.method, "ignoring notification");
            return Ok(None);
        }

        let response = self.handle_request(request).await;
        Ok(Some(serde_json::to_string(&response)?))
    }

    /// Routes the request to the appropriate handler based on the method name.
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result = match request.method.as_str() {
            "initialize" => Ok(handle_initialize()),
            "tools/list" => Ok(handle_list_tools()),
            "tools/call" => self.handle_call_tool(request.params).await,
            _ => {
                return JsonRpcResponse::error(
                    request.id,
                    -32601,
                    format!("Unknown method: {}", request.method),
                )
            }
        };

        match result {
            Ok(value) => JsonRpcResponse::result(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, -32603, e.to_string()),
        }
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params = params.ok_or_else(|| anyhow!("Missing params"))?;
        let name = params["name"].as_str().ok_or_else(|| anyhow!("Missing tool name"))?;
        let arguments = &params["arguments"];

        debug!(tool = name, "tool call");

        match name {
            "ask" => {
                let outcome = match self.connection_from_args(arguments) {
                    Ok(conn) => {
                        let phrase = required_str(arguments, "phrase")?;
                        self.pipeline.ask(&conn, phrase, top_k_from_args(arguments)?).await
                    }
                    Err(e) => Err(e),
                };
                tool_result(outcome)
            }
            "explain" => {
                let outcome = match self.connection_from_args(arguments) {
                    Ok(conn) => {
                        let phrase = required_str(arguments, "phrase")?;
                        self.pipeline.explain(&conn, phrase, top_k_from_args(arguments)?).await
                    }
                    Err(e) => Err(e),
                };
                tool_result(outcome)
            }
            "schema" => {
                let outcome = match self.connection_from_args(arguments) {
                    Ok(conn) => {
                        let phrase = arguments.get("phrase").and_then(Value::as_str);
                        self.pipeline
                            .schema_report(&conn, phrase, top_k_from_args(arguments)?)
                            .await
                    }
                    Err(e) => Err(e),
                };
                tool_result(outcome)
            }
            _ => Err(anyhow!("Unknown tool: {name}")),
        }
    }

    /// Explicit `url`, else a named connection, else the configured default
    fn connection_from_args(&self, args: &Value) -> crate::error::Result<String> {
        if let Some(url) = args.get("url").and_then(Value::as_str) {
            return Ok(url.to_string());
        }
        self.config.resolve_connection(args.get("connection").and_then(Value::as_str))
    }
}

fn tool_result<T: Serialize>(outcome: crate::error::Result<T>) -> Result<Value> {
    match outcome {
        Ok(data) => CallToolResult::success(&data),
        Err(err) => CallToolResult::failure(&err),
    }
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing required field: {field}"))
}

fn top_k_from_args(args: &Value) -> Result<Option<usize>> {
    match args.get("top_k") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|k| usize::try_from(k).ok())
            .map(Some)
            .ok_or_else(|| anyhow!("top_k must be a positive integer")),
    }
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

fn handle_initialize() -> Value {
    serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "askdb",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn connection_properties() -> Value {
    serde_json::json!({
        "connection": {
            "type": "string",
            "description": "Name of a saved connection from .askdb/config.json or ~/.config/askdb/config.json. If omitted along with 'url', the configured default connection is used."
        },
        "url": {
            "type": "string",
            "description": "Explicit PostgreSQL connection string. Prefer saved connections so credentials are not passed around."
        },
        "top_k": {
            "type": "number",
            "description": "Number of most relevant relations to consider. Defaults to the configured default_top_k."
        }
    })
}

fn tool_schema(extra: Value, required: &[&str]) -> Value {
    let mut properties = connection_properties();
    if let (Some(props), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        props.extend(extra.clone());
    }
    serde_json::json!({ "type": "object", "properties": properties, "required": required })
}

fn handle_list_tools() -> Value {
    let phrase = serde_json::json!({
        "phrase": {
            "type": "string",
            "description": "The question in plain language, e.g. 'top 10 customers by total order value'."
        }
    });

    serde_json::json!({
        "tools": [
            {
                "name": "ask",
                "description": "Answer a natural-language question with rows from the database. The question is turned into a single read-only SELECT, checked by a static guard (no writes, no DDL, no system catalogs, no ORDER BY RANDOM()), bounded by a LIMIT and a statement timeout, then executed. Returns {rows, rowCount, sql, truncated?}. Large results are truncated to fit a byte budget and flagged with truncated: true. Error codes: GUARD_REJECTED, GENERATOR_CONTRACT, QUERY_TIMEOUT, QUERY_FAILED, CONNECTION_FAILED.",
                "inputSchema": tool_schema(phrase.clone(), &["phrase"])
            },
            {
                "name": "explain",
                "description": "Explain in prose how a question maps onto the schema, naming the relations involved. Nothing is executed against the database beyond catalog introspection. Returns {answer, references?}.",
                "inputSchema": tool_schema(phrase, &["phrase"])
            },
            {
                "name": "schema",
                "description": "List relation cards (tables and views with columns, key flags, join hints and row estimates). With 'phrase', only the most relevant relations are returned, each with its relevance score.",
                "inputSchema": tool_schema(serde_json::json!({
                    "phrase": {
                        "type": "string",
                        "description": "Optional: rank relations by relevance to this phrase."
                    }
                }), &[])
            }
        ]
    })
}
