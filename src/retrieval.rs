//! Relevance Selector
//!
//! Narrows the full set of relation cards to the `k` most lexically relevant
//! to a phrase. Pure and deterministic: identical inputs always produce the
//! same ordered output, which keeps generator prompts reproducible.
//!
//! # Scoring
//! - +1 per whole-word occurrence of each phrase token in the card haystack
//!   (name, column names, join hints)
//! - +0.5 per token that appears anywhere in the card name
//! - +`1 / log10(row_estimate + 10)` when an estimate is present, favoring
//!   smaller relations
//!
//! Ties are broken by ascending relation name.

use regex::Regex;

use crate::engine::RelationCard;

/// A tokenized phrase with one whole-word matcher per token
struct Query {
    tokens: Vec<(String, Regex)>,
}

impl Query {
    fn new(phrase: &str) -> Self {
        let tokens = tokenize(phrase)
            .into_iter()
            .filter_map(|token| {
                let pattern = format!(r"\b{}\b", regex::escape(&token));
                Regex::new(&pattern).ok().map(|re| (token, re))
            })
            .collect();
        Self { tokens }
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, card: &RelationCard) -> f64 {
        let name = card.name.to_lowercase();
        let haystack = haystack(card);

        let mut score = 0.0;
        for (token, re) in &self.tokens {
            score += re.find_iter(&haystack).count() as f64;
            if name.contains(token.as_str()) {
                score += 0.5;
            }
        }

        if let Some(estimate) = card.row_estimate {
            score += 1.0 / (estimate as f64 + 10.0).log10();
        }

        score
    }
}

/// Lower-case the phrase and split on anything outside `[a-z0-9._]`
#[must_use]
pub fn tokenize(phrase: &str) -> Vec<String> {
    phrase
        .to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn haystack(card: &RelationCard) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(1 + card.columns.len() + card.join_hints.len());
    parts.push(&card.name);
    parts.extend(card.columns.iter().map(|c| c.name.as_str()));
    parts.extend(card.join_hints.iter().map(String::as_str));
    parts.join(" ").to_lowercase()
}

/// Relevance score of one card for `phrase`
#[must_use]
pub fn score_card(card: &RelationCard, phrase: &str) -> f64 {
    Query::new(phrase).score(card)
}

/// Score every card against `phrase`, best first
#[must_use]
pub fn rank_cards<'a>(cards: &'a [RelationCard], phrase: &str) -> Vec<(f64, &'a RelationCard)> {
    let query = Query::new(phrase);
    let mut scored: Vec<(f64, &RelationCard)> =
        cards.iter().map(|card| (query.score(card), card)).collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
    scored
}

/// The `k` cards most relevant to `phrase` (`k` is clamped to at least 1)
#[must_use]
pub fn pick_top_k(cards: &[RelationCard], phrase: &str, k: usize) -> Vec<RelationCard> {
    rank_cards(cards, phrase)
        .into_iter()
        .take(k.max(1))
        .map(|(_, card)| card.clone())
        .collect()
}
