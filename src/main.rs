//! askdb CLI Entry Point
//!
//! Subcommands:
//! - `ask` - Answer a natural-language question with rows
//! - `explain` - Explain how a question maps onto the schema
//! - `schema` - List relation cards, optionally ranked against a phrase
//! - `check` - Run the SQL guard on a statement without touching a database
//! - `mcp` - MCP server mode (hidden, for AI agent integration)
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::process::ExitCode;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use askdb::config::{self, Config};
use askdb::engine::postgres::PostgresBackend;
use askdb::generator::HttpGenerator;
use askdb::mcp::McpServer;
use askdb::output::{ErrorEnvelope, Metadata, SuccessEnvelope};
use askdb::pipeline::Pipeline;
use askdb::{guard, AskError, Result};

/// askdb - natural-language questions to bounded, read-only SQL
#[derive(Parser)]
#[command(name = "askdb")]
#[command(about = "Turn questions into guarded, bounded, read-only SQL and run it")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which database to talk to
#[derive(Args, Debug, Clone)]
struct Target {
    /// Explicit connection string (takes precedence over --connection)
    #[arg(long)]
    url: Option<String>,

    /// Name of a saved connection (defaults to the configured default)
    #[arg(long, short = 'c')]
    connection: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question with rows from a guarded SELECT
    Ask {
        /// The question, in plain language
        phrase: String,

        #[command(flatten)]
        target: Target,

        /// Number of relations passed to the generator
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Explain how a question maps onto the schema (nothing is executed)
    Explain {
        phrase: String,

        #[command(flatten)]
        target: Target,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List relation cards, ranked with scores when --phrase is given
    Schema {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        phrase: Option<String>,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Validate a SQL statement with the guard (offline)
    Check {
        sql: String,

        /// Override the configured maximum LIMIT
        #[arg(long)]
        max_limit: Option<u64>,
    },

    /// Start MCP server (hidden from help, for AI agent integration)
    #[command(hide = true)]
    Mcp,
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Ask { .. } => "ask",
            Self::Explain { .. } => "explain",
            Self::Schema { .. } => "schema",
            Self::Check { .. } => "check",
            Self::Mcp => "mcp",
        }
    }
}

/// Command data plus the row count for metadata
struct Outcome {
    data: serde_json::Value,
    rows: Option<usize>,
}

impl Outcome {
    fn new(data: &impl Serialize, rows: Option<usize>) -> Result<Self> {
        let data = serde_json::to_value(data)
            .map_err(|e| AskError::query_failed(format!("Failed to serialize response: {e}")))?;
        Ok(Self { data, rows })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("askdb=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

type PgPipeline = Pipeline<PostgresBackend, HttpGenerator>;

fn build_pipeline(config: &Config) -> Result<PgPipeline> {
    let generator = HttpGenerator::new(&config.settings.generator)?;
    Pipeline::new(PostgresBackend, generator, &config.settings)
}

fn resolve_target(config: &Config, target: &Target) -> Result<String> {
    match &target.url {
        Some(url) => Ok(url.clone()),
        None => config.resolve_connection(target.connection.as_deref()),
    }
}

async fn run(command: &Commands, config: &Config) -> Result<Outcome> {
    match command {
        Commands::Ask { phrase, target, top_k } => {
            let conn = resolve_target(config, target)?;
            let pipeline = build_pipeline(config)?;
            let result = pipeline.ask(&conn, phrase, *top_k).await;
            pipeline.shutdown();
            let response = result?;
            Outcome::new(&response, Some(response.row_count))
        }
        Commands::Explain { phrase, target, top_k } => {
            let conn = resolve_target(config, target)?;
            let pipeline = build_pipeline(config)?;
            let result = pipeline.explain(&conn, phrase, *top_k).await;
            pipeline.shutdown();
            Outcome::new(&result?, None)
        }
        Commands::Schema { target, phrase, top_k } => {
            let conn = resolve_target(config, target)?;
            let pipeline = build_pipeline(config)?;
            let result = pipeline.schema_report(&conn, phrase.as_deref(), *top_k).await;
            pipeline.shutdown();
            Outcome::new(&result?, None)
        }
        Commands::Check { sql, max_limit } => {
            let guarded = guard::validate(sql, max_limit.unwrap_or(config.settings.max_limit))?;
            Outcome::new(&guarded, None)
        }
        Commands::Mcp => {
            Err(AskError::invalid_input("mcp is a long-running server, not a one-shot command"))
        }
    }
}

async fn serve_mcp() -> anyhow::Result<()> {
    let config = config::load_with_precedence()?;
    let pipeline = build_pipeline(&config)?;
    McpServer::new(pipeline, config).serve().await
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Mcp) {
        return match serve_mcp().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "MCP server failed");
                ExitCode::FAILURE
            }
        };
    }

    let command = cli.command.name();
    let started = Instant::now();

    let outcome = match config::load_with_precedence() {
        Ok(config) => run(&cli.command, &config).await,
        Err(e) => Err(e),
    };

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (json, code) = match outcome {
        Ok(Outcome { data, rows }) => {
            let meta = match rows {
                Some(rows) => Metadata::with_rows(elapsed_ms, rows),
                None => Metadata::new(elapsed_ms),
            };
            (serde_json::to_string(&SuccessEnvelope::new(command, data, meta)), ExitCode::SUCCESS)
        }
        Err(err) => {
            (serde_json::to_string(&ErrorEnvelope::from_error(command, &err)), ExitCode::FAILURE)
        }
    };

    match json {
        Ok(json) => {
            println!("{json}");
            code
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize output envelope");
            ExitCode::FAILURE
        }
    }
}
