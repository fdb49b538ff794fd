//! Relevance scoring and result merging shared by the tiers.

use crate::types::{AdvancedSearchQuery, MemoryEntry, SearchResult};

/// Fraction of the query's keywords found among the content's words.
///
/// Both sides are lowercased and split on whitespace. A query without
/// keywords scores 0.
pub fn keyword_relevance(query: &str, content: &str) -> f64 {
    let keywords: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if keywords.is_empty() {
        return 0.0;
    }

    let content_lower = content.to_lowercase();
    let words: std::collections::HashSet<&str> = content_lower.split_whitespace().collect();

    let hits = keywords.iter().filter(|k| words.contains(k.as_str())).count();
    hits as f64 / keywords.len() as f64
}

/// Check the non-textual predicates of a query against an entry.
///
/// Context type must be equal, the timestamp must fall inside the inclusive
/// time range, and every metadata filter must be present with an equal value.
pub fn matches_filters(entry: &MemoryEntry, query: &AdvancedSearchQuery) -> bool {
    if let Some(ref context_type) = query.context_type {
        if &entry.context.context_type != context_type {
            return false;
        }
    }

    if let Some(range) = &query.time_range {
        if !range.contains(entry.context.timestamp) {
            return false;
        }
    }

    if let Some(filters) = &query.metadata_filters {
        for (key, expected) in filters {
            if entry.metadata.get(key) != Some(expected) {
                return false;
            }
        }
    }

    true
}

/// Convert distances into relevance scores relative to the farthest hit.
///
/// `score = 1 - d / max_d`; when every distance is zero all scores are 1.
pub fn normalize_distances(distances: &[f64]) -> Vec<f64> {
    let max = distances.iter().copied().fold(0.0_f64, f64::max);
    distances
        .iter()
        .map(|d| {
            if max <= 0.0 {
                1.0
            } else {
                (1.0 - d / max).clamp(0.0, 1.0)
            }
        })
        .collect()
}

/// Drop results under the threshold, order by score (stable), and cap the count.
pub fn rank(mut results: Vec<SearchResult>, threshold: Option<f64>, limit: usize) -> Vec<SearchResult> {
    if let Some(threshold) = threshold {
        results.retain(|r| r.relevance_score >= threshold);
    }
    results.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryContext, MemoryTier};
    use chrono::{Duration, Utc};

    fn result(id: &str, score: f64) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            tier: MemoryTier::ShortTerm,
            memory_entry: MemoryEntry::new(id, MemoryContext::now("test")),
            relevance_score: score,
        }
    }

    #[test]
    fn test_keyword_relevance() {
        assert_eq!(keyword_relevance("coffee", "alpha wants coffee"), 1.0);
        assert_eq!(keyword_relevance("Coffee TEA", "alpha wants coffee"), 0.5);
        assert_eq!(keyword_relevance("", "alpha wants coffee"), 0.0);
        assert_eq!(keyword_relevance("   ", "anything"), 0.0);
        // Whole words only
        assert_eq!(keyword_relevance("cof", "coffee"), 0.0);
    }

    #[test]
    fn test_matches_filters() {
        let now = Utc::now();
        let entry = MemoryEntry::new("x", MemoryContext::new("chat", now))
            .with_meta("even", true)
            .with_meta("user", "ana");

        assert!(matches_filters(&entry, &AdvancedSearchQuery::new("")));
        assert!(matches_filters(&entry, &AdvancedSearchQuery::new("").context_type("chat")));
        assert!(!matches_filters(&entry, &AdvancedSearchQuery::new("").context_type("tool")));

        let window = AdvancedSearchQuery::new("").time_range(now - Duration::minutes(1), now);
        assert!(matches_filters(&entry, &window));
        let past = AdvancedSearchQuery::new("")
            .time_range(now - Duration::hours(2), now - Duration::hours(1));
        assert!(!matches_filters(&entry, &past));

        let both = AdvancedSearchQuery::new("").filter("even", true).filter("user", "ana");
        assert!(matches_filters(&entry, &both));
        let wrong = AdvancedSearchQuery::new("").filter("even", false);
        assert!(!matches_filters(&entry, &wrong));
        let missing = AdvancedSearchQuery::new("").filter("team", "x");
        assert!(!matches_filters(&entry, &missing));
    }

    #[test]
    fn test_normalize_distances() {
        assert_eq!(normalize_distances(&[0.0, 0.5, 1.0]), vec![1.0, 0.5, 0.0]);
        assert_eq!(normalize_distances(&[0.0, 0.0]), vec![1.0, 1.0]);
        assert!(normalize_distances(&[]).is_empty());
    }

    #[test]
    fn test_rank_is_stable_and_bounded() {
        let ranked = rank(
            vec![result("a", 0.5), result("b", 0.9), result("c", 0.5), result("d", 0.1)],
            Some(0.2),
            3,
        );
        let ids: Vec<&str> = ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
