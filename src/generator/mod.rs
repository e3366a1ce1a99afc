//! SQL Generator Boundary
//!
//! The natural-language-to-SQL generator is an external service. This module
//! defines the request/response contract and an HTTP client for it.
//!
//! Generator output is untrusted: a response is accepted only if it is
//! well-formed JSON with every required field present and non-empty. Anything
//! else fails closed with `GeneratorContract`; nothing is repaired. A
//! well-formed statement still has to pass the guard before execution.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::GeneratorSettings;
use crate::engine::{RelationCard, SqlParam};
use crate::error::{AskError, Result};

/// Everything the generator sees for one phrase
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub phrase: String,

    /// Selected relation cards, most relevant first
    pub cards: Vec<RelationCard>,

    /// Names of the selected relations, in card order
    pub relations: Vec<String>,
}

impl GenerationRequest {
    pub fn new(phrase: impl Into<String>, cards: Vec<RelationCard>) -> Self {
        let relations = cards.iter().map(|card| card.name.clone()).collect();
        Self { phrase: phrase.into(), cards, relations }
    }
}

/// Candidate statement proposed by the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,

    /// Positional bind parameters (`$1`, `$2`, ...)
    #[serde(default)]
    pub params: Vec<SqlParam>,
}

/// Natural-language explanation of how a phrase maps onto the schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub answer: String,

    /// Relation names the answer refers to
    #[serde(default)]
    pub references: Vec<String>,
}

/// Natural-language front end that proposes SQL and explanations
pub trait SqlGenerator: Send + Sync {
    /// Propose a statement (plus bind parameters) answering the phrase
    fn generate_sql(
        &self,
        request: &GenerationRequest,
    ) -> impl std::future::Future<Output = Result<GeneratedSql>> + Send;

    /// Explain in prose how the phrase relates to the selected relations
    fn explain(
        &self,
        request: &GenerationRequest,
    ) -> impl std::future::Future<Output = Result<Explanation>> + Send;
}

/// Parse a `/sql` response body
pub fn parse_generated_sql(body: &str) -> Result<GeneratedSql> {
    let generated: GeneratedSql = serde_json::from_str(body).map_err(|e| {
        AskError::generator_contract(format!("Malformed SQL generation response: {e}"))
    })?;

    if generated.sql.trim().is_empty() {
        return Err(AskError::generator_contract("Generator returned an empty sql field"));
    }

    Ok(generated)
}

/// Parse an `/explain` response body
pub fn parse_explanation(body: &str) -> Result<Explanation> {
    let explanation: Explanation = serde_json::from_str(body).map_err(|e| {
        AskError::generator_contract(format!("Malformed explanation response: {e}"))
    })?;

    if explanation.answer.trim().is_empty() {
        return Err(AskError::generator_contract("Generator returned an empty answer field"));
    }

    Ok(explanation)
}

/// Generator reached over HTTP (`POST <endpoint>/sql`, `POST <endpoint>/explain`)
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerator {
    /// Build a client with the configured timeout and optional bearer token
    pub fn new(settings: &GeneratorSettings) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(env_var) = &settings.api_key_env {
            let token = std::env::var(env_var).map_err(|_| {
                AskError::config_error(format!(
                    "Environment variable {env_var} not found for generator API key"
                ))
            })?;
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| AskError::config_error(format!("{env_var} is not a valid header value")))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| AskError::config_error(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint: settings.endpoint.trim_end_matches('/').to_string() })
    }

    async fn post(&self, route: &str, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/{route}", self.endpoint);
        debug!(%url, relations = request.relations.len(), "calling generator");

        let response = self.client.post(&url).json(request).send().await.map_err(|e| {
            AskError::generator_contract(format!("Generator request to /{route} failed: {e}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AskError::generator_contract(format!("Could not read generator response: {e}"))
        })?;

        if !status.is_success() {
            return Err(AskError::generator_contract(format!(
                "Generator returned HTTP {status} for /{route}"
            )));
        }

        Ok(body)
    }
}

impl SqlGenerator for HttpGenerator {
    async fn generate_sql(&self, request: &GenerationRequest) -> Result<GeneratedSql> {
        let body = self.post("sql", request).await?;
        parse_generated_sql(&body)
    }

    async fn explain(&self, request: &GenerationRequest) -> Result<Explanation> {
        let body = self.post("explain", request).await?;
        parse_explanation(&body)
    }
}
