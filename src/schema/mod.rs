//! Schema Introspection Aggregation
//!
//! Builds the full set of relation cards for one database:
//!
//! 1. connectivity pre-flight
//! 2. list relations
//! 3. describe every relation and list every foreign key, concurrently
//! 4. attach join hints to each card from its outbound edges
//!
//! A snapshot is all-or-nothing. If any single step fails, the whole
//! introspection fails and nothing is cached.

pub mod cache;

use std::collections::HashMap;

use futures::future::{try_join, try_join_all};
use tracing::debug;

use crate::engine::{RelationCard, RelationshipEdge, SchemaIntrospector, SYSTEM_SCHEMAS};
use crate::error::Result;

pub use cache::{CardCache, CardSnapshot};

/// Introspect every non-system relation into cards with join hints
pub async fn introspect_cards<I: SchemaIntrospector>(introspector: &I) -> Result<Vec<RelationCard>> {
    introspector.test_connection().await?;

    let relations = introspector.list_relations().await?;
    debug!(relations = relations.len(), "describing relations");

    let describe_all = try_join_all(relations.iter().map(|r| introspector.describe_relation(r)));
    let (mut cards, edges) = try_join(describe_all, introspector.list_relationships()).await?;

    attach_join_hints(&mut cards, &edges);
    Ok(cards)
}

/// Append one hint per outbound edge to the card named by the edge's source.
///
/// Edges touching a system schema on either side are ignored.
pub fn attach_join_hints(cards: &mut [RelationCard], edges: &[RelationshipEdge]) {
    let mut outbound: HashMap<&str, Vec<&RelationshipEdge>> = HashMap::new();
    for edge in edges {
        if is_system_relation(&edge.from_relation) || is_system_relation(&edge.to_relation) {
            continue;
        }
        outbound.entry(edge.from_relation.as_str()).or_default().push(edge);
    }

    for card in cards {
        if let Some(edges) = outbound.get(card.name.as_str()) {
            card.join_hints.extend(edges.iter().map(|edge| edge.join_hint()));
        }
    }
}

fn is_system_relation(qualified: &str) -> bool {
    qualified
        .split_once('.')
        .is_some_and(|(schema, _)| SYSTEM_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(schema)))
}
