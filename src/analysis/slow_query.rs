//! Clusters captured slow queries by normalized text and classifies each
//! cluster by shape.

use super::query_parser::{parse_query_columns, QueryColumnUsage};
use crate::models::{IndexCandidate, QueryPattern, QueryShape, SlowQuerySample};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static QUOTED_LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#)
        .expect("quoted literal pattern is valid")
});
static INTEGER_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\b").expect("integer literal pattern is valid"));

/// Replaces quoted strings with `'%s'` and integers with `%d`, then
/// collapses whitespace.
pub fn normalize_query(query: &str) -> String {
    let quoted = QUOTED_LITERAL.replace_all(query, "'%s'");
    let normalized = INTEGER_LITERAL.replace_all(&quoted, "%d");
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug)]
struct Cluster {
    first_seen: usize,
    count: u64,
    total: f64,
    max: f64,
    example: String,
}

/// Groups samples by normalized form, ranked by total execution time.
pub fn cluster_slow_queries(samples: &[SlowQuerySample]) -> Vec<QueryPattern> {
    let mut clusters: HashMap<String, Cluster> = HashMap::new();
    for (position, sample) in samples.iter().enumerate() {
        let key = normalize_query(&sample.query);
        let cluster = clusters.entry(key).or_insert_with(|| Cluster {
            first_seen: position,
            count: 0,
            total: 0.0,
            max: 0.0,
            example: sample.query.clone(),
        });
        cluster.count += 1;
        cluster.total += sample.time_seconds;
        cluster.max = cluster.max.max(sample.time_seconds);
    }

    let mut ranked: Vec<(String, Cluster)> = clusters.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(Ordering::Equal)
            .then(a.first_seen.cmp(&b.first_seen))
    });

    ranked
        .into_iter()
        .map(|(pattern, cluster)| {
            let usage = match parse_query_columns(&cluster.example) {
                Ok(usage) => Some(usage),
                Err(err) => {
                    debug!("Slow query example not parsed: {err}");
                    None
                }
            };
            let (shape, index_candidate, recommendation) = classify(&pattern, usage.as_ref());
            QueryPattern {
                avg_execution_time: cluster.total / cluster.count as f64,
                query_pattern: pattern,
                count: cluster.count,
                total_execution_time: cluster.total,
                max_execution_time: cluster.max,
                example: cluster.example,
                shape,
                tables: usage.map(|u| u.tables).unwrap_or_default(),
                index_candidate,
                recommendation,
            }
        })
        .collect()
}

fn classify(
    pattern: &str,
    usage: Option<&QueryColumnUsage>,
) -> (QueryShape, Option<IndexCandidate>, Option<String>) {
    let upper = pattern.to_ascii_uppercase();

    if upper.contains("WHERE") && upper.contains("ORDER BY") {
        let candidate = usage.and_then(filter_sort_candidate);
        let recommendation = match &candidate {
            Some(candidate) => format!(
                "Consider adding an index on ({}) to speed up this query pattern",
                candidate.columns.join(", ")
            ),
            None => "Consider a composite index covering the filtered and sorted columns of this query pattern".to_string(),
        };
        return (QueryShape::FilterSort, candidate, Some(recommendation));
    }

    if upper.contains("JOIN") {
        return (
            QueryShape::Join,
            None,
            Some(
                "This query uses JOIN operations. Ensure all join columns are properly indexed."
                    .to_string(),
            ),
        );
    }

    if upper.contains("GROUP BY") {
        let grouped = usage
            .and_then(|u| u.usage_by_table.values().find(|t| !t.groups.is_empty()))
            .map(|t| format!(" ({})", t.groups.join(", ")))
            .unwrap_or_default();
        return (
            QueryShape::Grouping,
            None,
            Some(format!(
                "This query uses GROUP BY. Consider adding an index on the grouped columns{grouped}."
            )),
        );
    }

    (QueryShape::Other, None, None)
}

/// Filter columns then sort columns, for the first table that has either.
fn filter_sort_candidate(usage: &QueryColumnUsage) -> Option<IndexCandidate> {
    usage.tables.iter().find_map(|table| {
        let columns = usage.usage(table)?;
        let mut combined: Vec<String> = Vec::new();
        for column in columns.filters.iter().chain(columns.orders.iter()) {
            if !combined.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                combined.push(column.clone());
            }
        }
        (!combined.is_empty()).then(|| IndexCandidate {
            table: Some(table.clone()),
            columns: combined,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample(query: &str, secs: f64) -> SlowQuerySample {
        SlowQuerySample {
            query: query.to_string(),
            time_seconds: secs,
            db: None,
        }
    }

    #[rstest]
    #[case(
        "SELECT * FROM wp_posts WHERE ID = 42 AND post_type = 'page'",
        "SELECT * FROM wp_posts WHERE ID = %d AND post_type = '%s'"
    )]
    #[case("SELECT  *\n FROM wp_2_posts", "SELECT * FROM wp_2_posts")]
    #[case("SELECT 'it\\'s'", "SELECT '%s'")]
    fn normalizes_literals(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_query(input), expected);
    }

    #[test]
    fn literal_patterns_compile() {
        assert!(QUOTED_LITERAL.is_match("'a'"));
        assert!(INTEGER_LITERAL.is_match("LIMIT 10"));
        assert!(!INTEGER_LITERAL.is_match("wp_posts"));
    }

    #[test]
    fn clusters_rank_by_total_time() {
        let samples = vec![
            sample("SELECT * FROM wp_users WHERE ID = 1", 3.0),
            sample("SELECT * FROM wp_options WHERE option_name = 'a'", 2.5),
            sample("SELECT * FROM wp_options WHERE option_name = 'b'", 2.5),
            sample("SELECT * FROM wp_users WHERE ID = 2", 3.5),
            sample("SELECT * FROM wp_options WHERE option_name = 'c'", 2.5),
        ];
        let patterns = cluster_slow_queries(&samples);

        assert_eq!(patterns.len(), 2);
        assert!(patterns[0].query_pattern.contains("wp_options"));
        assert_eq!(patterns[0].count, 3);
        assert_eq!(patterns[0].total_execution_time, 7.5);
        assert_eq!(patterns[1].max_execution_time, 3.5);
        assert_eq!(patterns[1].avg_execution_time, 3.25);
    }

    #[test]
    fn filter_sort_shape_names_columns() {
        let patterns = cluster_slow_queries(&[sample(
            "SELECT ID FROM wp_posts WHERE post_type = 'post' AND post_status = 'publish' ORDER BY post_date DESC",
            4.0,
        )]);
        let pattern = &patterns[0];
        assert_eq!(pattern.shape, QueryShape::FilterSort);
        let candidate = pattern.index_candidate.as_ref().unwrap();
        assert_eq!(candidate.table.as_deref(), Some("wp_posts"));
        assert_eq!(candidate.columns, vec!["post_type", "post_status", "post_date"]);
        assert_eq!(
            pattern.recommendation.as_deref(),
            Some("Consider adding an index on (post_type, post_status, post_date) to speed up this query pattern")
        );
    }

    #[rstest]
    #[case("SELECT * FROM wp_posts p JOIN wp_postmeta m ON p.ID = m.post_id", QueryShape::Join)]
    #[case("SELECT post_type, COUNT(*) FROM wp_posts GROUP BY post_type", QueryShape::Grouping)]
    #[case("SELECT COUNT(*) FROM wp_posts", QueryShape::Other)]
    fn classifies_other_shapes(#[case] query: &str, #[case] shape: QueryShape) {
        let patterns = cluster_slow_queries(&[sample(query, 2.0)]);
        assert_eq!(patterns[0].shape, shape);
    }
}
