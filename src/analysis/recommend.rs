//! Cross-table findings: table correlations and the ranked
//! database-wide recommendation list.

use super::health::HousekeepingStats;
use super::rules::Thresholds;
use crate::history::RecentActions;
use crate::models::{
    AiRecommendation, Priority, QueryPattern, RecommendationKind, SuggestionKind,
    TableCorrelation, TableDiagnosis,
};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};

/// Known relationships between core tables, by suffix.
const KNOWN_RELATIONS: &[(&str, &str, Priority)] = &[
    ("posts", "postmeta", Priority::High),
    ("posts", "comments", Priority::Medium),
    ("comments", "commentmeta", Priority::Medium),
    ("users", "usermeta", Priority::Medium),
    ("terms", "term_taxonomy", Priority::High),
    ("term_taxonomy", "term_relationships", Priority::High),
];

pub fn table_correlations(
    tables: &BTreeMap<String, TableDiagnosis>,
    prefix: &str,
    patterns: &[QueryPattern],
) -> Vec<TableCorrelation> {
    KNOWN_RELATIONS
        .iter()
        .filter_map(|(left, right, strength)| {
            let left = format!("{prefix}{left}");
            let right = format!("{prefix}{right}");
            if !tables.contains_key(&left) || !tables.contains_key(&right) {
                return None;
            }
            let joined_in_slow_query = patterns.iter().any(|p| {
                p.tables.iter().any(|t| t == &left) && p.tables.iter().any(|t| t == &right)
            });
            let (strength, description) = if joined_in_slow_query {
                (
                    Priority::High,
                    format!("Slow queries join {left} and {right}; keep their join columns indexed"),
                )
            } else {
                (
                    *strength,
                    format!("{left} and {right} are commonly queried together"),
                )
            };
            Some(TableCorrelation {
                left,
                right,
                strength,
                description,
            })
        })
        .collect()
}

/// Inputs for [`rank_recommendations`].
pub struct RecommendationInputs<'a> {
    pub tables: &'a BTreeMap<String, TableDiagnosis>,
    pub patterns: &'a [QueryPattern],
    pub housekeeping: &'a HousekeepingStats,
    pub advisories: Vec<AiRecommendation>,
    pub thresholds: &'a Thresholds,
}

fn recommendation(
    kind: RecommendationKind,
    priority: Priority,
    description: String,
    table: Option<&str>,
    columns: Vec<String>,
    expected_impact: Option<&str>,
) -> AiRecommendation {
    AiRecommendation {
        kind,
        description,
        priority,
        table: table.map(String::from),
        columns,
        expected_impact: expected_impact.map(String::from),
    }
}

/// Deduplicated, priority-ranked, minus anything recent history already did.
pub fn rank_recommendations(
    inputs: RecommendationInputs<'_>,
    recent: &RecentActions,
) -> Vec<AiRecommendation> {
    let mut candidates = Vec::new();

    for diagnosis in inputs.tables.values() {
        for suggestion in &diagnosis.suggestions {
            if suggestion.kind == SuggestionKind::AddIndex && suggestion.priority == Priority::High
            {
                candidates.push(recommendation(
                    RecommendationKind::IndexOptimization,
                    Priority::High,
                    suggestion.description.clone(),
                    Some(&diagnosis.table),
                    suggestion.columns.clone(),
                    Some("Faster lookups on frequently filtered columns"),
                ));
            }
        }
    }

    for pattern in inputs.patterns {
        let (Some(candidate), Some(text)) = (&pattern.index_candidate, &pattern.recommendation)
        else {
            continue;
        };
        candidates.push(recommendation(
            RecommendationKind::IndexOptimization,
            Priority::Medium,
            text.clone(),
            candidate.table.as_deref(),
            candidate.columns.clone(),
            Some("Shorter execution time for the matching slow query pattern"),
        ));
    }

    let legacy: Vec<&str> = inputs
        .tables
        .values()
        .filter(|t| t.has_issue("myisam_engine"))
        .map(|t| t.table.as_str())
        .collect();
    if !legacy.is_empty() {
        candidates.push(recommendation(
            RecommendationKind::EngineConversion,
            Priority::Medium,
            format!(
                "Convert {} from MyISAM to InnoDB for row-level locking and crash recovery",
                legacy.join(", ")
            ),
            None,
            Vec::new(),
            Some("Fewer lock waits under concurrent writes"),
        ));
    }

    let limit = inputs.thresholds.housekeeping_rows;
    if let Some(revisions) = inputs.housekeeping.revisions.filter(|n| *n > limit) {
        candidates.push(recommendation(
            RecommendationKind::DataArchiving,
            Priority::Medium,
            format!("Archive old post revisions to reduce table size ({revisions} revisions stored)"),
            None,
            Vec::new(),
            Some("Smaller posts table and faster backups"),
        ));
    }
    if let Some(entries) = inputs
        .housekeeping
        .expired_cache_entries
        .filter(|n| *n > limit)
    {
        candidates.push(recommendation(
            RecommendationKind::CacheCleanup,
            Priority::Medium,
            format!("Remove expired cache entries from the options table ({entries} expired entries)"),
            None,
            Vec::new(),
            Some("Smaller options table"),
        ));
    }

    candidates.extend(inputs.advisories);

    let mut seen = HashSet::new();
    let mut ranked: Vec<AiRecommendation> = candidates
        .into_iter()
        .filter(|r| {
            seen.insert((
                r.kind,
                r.table.clone(),
                r.columns.clone(),
                r.description.clone(),
            ))
        })
        .filter(|r| !recent.suppresses(r))
        .collect();
    ranked.sort_by_key(|r| Reverse(r.priority));
    ranked
}
