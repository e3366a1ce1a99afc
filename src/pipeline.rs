//! Request Pipeline
//!
//! One [`Pipeline`] is built at process start and shared by every request.
//! It owns the pool registry, the card cache and the generator client.
//!
//! Within a request the stages run strictly in order:
//! cards (cache hit or refresh) -> relevance selection -> generator ->
//! guard -> execution. Requests never share locks with each other.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::Settings;
use crate::engine::{Backend, RelationCard};
use crate::error::{AskError, Result};
use crate::executor::{self, ExecutionLimits, ExplainResponse, QueryResponse};
use crate::generator::{GenerationRequest, SqlGenerator};
use crate::pool::PoolRegistry;
use crate::retrieval::{pick_top_k, rank_cards};
use crate::schema::{CardCache, CardSnapshot};

/// Relation cards as listed by the `schema` command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaReport {
    /// Relations in the full snapshot
    pub total_relations: usize,

    /// Seconds since the snapshot was introspected
    pub snapshot_age_secs: u64,

    pub cards: Vec<ScoredCard>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCard {
    #[serde(flatten)]
    pub card: RelationCard,

    /// Relevance score, present when a phrase was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

pub struct Pipeline<B: Backend, G: SqlGenerator> {
    pools: PoolRegistry<B>,
    cards: CardCache,
    generator: G,
    limits: ExecutionLimits,
    default_top_k: usize,
}

impl<B: Backend, G: SqlGenerator> Pipeline<B, G> {
    pub fn new(backend: B, generator: G, settings: &Settings) -> Result<Self> {
        settings.validate()?;

        Ok(Self {
            pools: PoolRegistry::new(
                backend,
                settings.pool_capacity,
                settings.pool_max_connections,
            )?,
            cards: CardCache::new(
                settings.cache_ttl(),
                u64::try_from(settings.pool_capacity).unwrap_or(u64::MAX),
            ),
            generator,
            limits: settings.execution_limits(),
            default_top_k: settings.default_top_k,
        })
    }

    pub const fn pools(&self) -> &PoolRegistry<B> {
        &self.pools
    }

    pub const fn cards(&self) -> &CardCache {
        &self.cards
    }

    pub const fn generator(&self) -> &G {
        &self.generator
    }

    /// Answer `phrase` with rows from the database behind `connection_string`
    pub async fn ask(
        &self,
        connection_string: &str,
        phrase: &str,
        top_k: Option<usize>,
    ) -> Result<QueryResponse> {
        let (phrase, connection_string) = validate_request(phrase, connection_string)?;

        let introspector = self.introspector(connection_string)?;
        let request = self.build_request(connection_string, &introspector, phrase, top_k).await?;

        let generated = self.generator.generate_sql(&request).await?;
        executor::execute(&introspector, &generated, &self.limits).await
    }

    /// Explain how `phrase` maps onto the schema; nothing is executed
    pub async fn explain(
        &self,
        connection_string: &str,
        phrase: &str,
        top_k: Option<usize>,
    ) -> Result<ExplainResponse> {
        let (phrase, connection_string) = validate_request(phrase, connection_string)?;

        let introspector = self.introspector(connection_string)?;
        let request = self.build_request(connection_string, &introspector, phrase, top_k).await?;

        let explanation = self.generator.explain(&request).await?;
        Ok(explanation.into())
    }

    /// Current relation cards for a connection (cached)
    pub async fn schema_cards(&self, connection_string: &str) -> Result<Arc<CardSnapshot>> {
        let connection_string = validate_connection(connection_string)?;
        let introspector = self.introspector(connection_string)?;
        self.cards.get_cards(connection_string, &introspector).await
    }

    /// Cards for a connection, ranked against `phrase` when one is given.
    ///
    /// With a phrase the top `k` cards are returned (default K when `top_k`
    /// is absent); without one, every card in snapshot order, or the first
    /// `top_k` if given.
    pub async fn schema_report(
        &self,
        connection_string: &str,
        phrase: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<SchemaReport> {
        let snapshot = self.schema_cards(connection_string).await?;

        let cards: Vec<ScoredCard> = match phrase.map(str::trim).filter(|p| !p.is_empty()) {
            Some(phrase) => rank_cards(&snapshot.cards, phrase)
                .into_iter()
                .take(top_k.unwrap_or(self.default_top_k).max(1))
                .map(|(score, card)| ScoredCard { card: card.clone(), score: Some(score) })
                .collect(),
            None => snapshot
                .cards
                .iter()
                .take(top_k.unwrap_or(usize::MAX))
                .map(|card| ScoredCard { card: card.clone(), score: None })
                .collect(),
        };

        Ok(SchemaReport {
            total_relations: snapshot.cards.len(),
            snapshot_age_secs: snapshot.age().as_secs(),
            cards,
        })
    }

    /// Drop the cached cards for one connection
    pub async fn invalidate(&self, connection_string: &str) -> bool {
        self.cards.invalidate(connection_string).await
    }

    /// Close every pool and clear the card cache (process shutdown)
    pub fn shutdown(&self) {
        self.pools.close_all();
        self.cards.clear();
    }

    fn introspector(&self, connection_string: &str) -> Result<B::Introspector> {
        let pool = self.pools.get_pool(connection_string)?;
        Ok(self.pools.backend().introspector(&pool))
    }

    async fn build_request(
        &self,
        connection_string: &str,
        introspector: &B::Introspector,
        phrase: &str,
        top_k: Option<usize>,
    ) -> Result<GenerationRequest> {
        let snapshot = self.cards.get_cards(connection_string, introspector).await?;
        let selected = pick_top_k(&snapshot.cards, phrase, top_k.unwrap_or(self.default_top_k));

        debug!(
            selected = ?selected.iter().map(|card| card.name.as_str()).collect::<Vec<_>>(),
            available = snapshot.cards.len(),
            "selected relations"
        );

        Ok(GenerationRequest::new(phrase, selected))
    }
}

fn validate_request<'a>(phrase: &'a str, connection_string: &'a str) -> Result<(&'a str, &'a str)> {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return Err(AskError::invalid_input("Phrase cannot be empty"));
    }
    Ok((phrase, validate_connection(connection_string)?))
}

fn validate_connection(connection_string: &str) -> Result<&str> {
    let connection_string = connection_string.trim();
    if connection_string.is_empty() {
        return Err(AskError::invalid_input("A connection string or connection name is required"));
    }
    Ok(connection_string)
}
