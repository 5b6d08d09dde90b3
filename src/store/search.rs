//! Matching a spoken query against the catalog.
//!
//! Transcripts rarely come back letter-perfect, so items are scored with a
//! mix of exact, prefix, substring, word-overlap and fuzzy similarity and
//! the best scorer wins. Queries that match nothing return `None` rather
//! than a bad guess.

use strsim::jaro_winkler;

use super::Item;

/// Minimum fuzzy similarity threshold (0.0 - 1.0)
const FUZZY_THRESHOLD: f64 = 0.75;

/// An item together with its relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct Match<'a> {
    pub item: &'a Item,
    pub score: u32,
}

/// Scores every catalog item against the query and returns the matches,
/// best first, ties broken by item name.
pub fn search<'a>(items: &'a [Item], query: &str, limit: usize) -> Vec<Match<'a>> {
    let query_lower = query.trim().to_lowercase();
    if query_lower.is_empty() {
        return Vec::new();
    }
    let query_parts: Vec<&str> = query_lower.split_whitespace().collect();

    let mut results: Vec<Match<'a>> = items
        .iter()
        .filter_map(|item| {
            let score = score_item(&item.name.to_lowercase(), &query_lower, &query_parts)?;
            Some(Match { item, score })
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.item.name.cmp(&b.item.name))
    });
    results.truncate(limit);
    results
}

/// Returns the single best match, or `None` when nothing clears the
/// fuzzy gate.
pub fn best_match<'a>(items: &'a [Item], query: &str) -> Option<Match<'a>> {
    search(items, query, 1).into_iter().next()
}

fn score_item(name: &str, query: &str, query_parts: &[&str]) -> Option<u32> {
    let mut score: u32 = 0;
    let mut matched = false;

    // === Exact matching (highest priority) ===
    if name == query {
        score += 1000;
        matched = true;
    } else if name.starts_with(query) {
        score += 500;
        matched = true;
    } else if name.contains(query) {
        score += 300;
        matched = true;
    }

    // === Per-word overlap ===
    let name_words: Vec<&str> = name.split_whitespace().collect();
    for part in query_parts {
        if name_words.iter().any(|w| w == part) {
            score += 100;
            matched = true;
        } else if name_words.iter().any(|w| w.starts_with(part)) {
            score += 40;
            matched = true;
        }
    }

    // === Fuzzy matching (lowest priority) ===
    if !matched {
        let similarity = jaro_winkler(name, query);
        if similarity >= FUZZY_THRESHOLD {
            score += (similarity * 100.0) as u32;
            matched = true;
        }
    }

    matched.then_some(score)
}
