//! What recent optimization runs already did, so analysis stops
//! recommending finished work.

use crate::db::HistoryStore;
use crate::models::{
    ActionKind, AiRecommendation, OptimizationAction, OptimizationHistoryEntry, RecommendationKind,
};
use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use std::collections::HashSet;
use tracing::warn;

/// Entries examined when deciding what counts as recent.
pub const HISTORY_LOOKBACK: usize = 50;

/// `table:col1,col2` with columns lower-cased and sorted.
pub fn index_signature(table: &str, columns: &[String]) -> String {
    let columns = columns
        .iter()
        .map(|c| c.to_ascii_lowercase())
        .sorted()
        .join(",");
    format!("{}:{}", table.to_ascii_lowercase(), columns)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecentActions {
    kinds: HashSet<ActionKind>,
    index_signatures: HashSet<String>,
}

impl RecentActions {
    pub fn from_entries(entries: &[OptimizationHistoryEntry], since: DateTime<Utc>) -> Self {
        Self::from_actions(
            entries
                .iter()
                .filter(|entry| entry.run_at >= since)
                .flat_map(|entry| entry.optimization_actions.iter()),
        )
    }

    pub fn from_actions<'a>(actions: impl IntoIterator<Item = &'a OptimizationAction>) -> Self {
        let mut recent = Self::default();
        for action in actions {
            recent.kinds.insert(action.kind);
            if action.kind == ActionKind::AddIndex {
                if let Some(table) = &action.table {
                    recent
                        .index_signatures
                        .insert(index_signature(table, &action.columns));
                }
            }
        }
        recent
    }

    pub fn contains_kind(&self, kind: ActionKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn contains_index(&self, table: &str, columns: &[String]) -> bool {
        self.index_signatures
            .contains(&index_signature(table, columns))
    }

    /// Configuration advisories are never suppressed.
    pub fn suppresses(&self, recommendation: &AiRecommendation) -> bool {
        match recommendation.kind {
            RecommendationKind::IndexOptimization => recommendation
                .table
                .as_deref()
                .is_some_and(|table| self.contains_index(table, &recommendation.columns)),
            RecommendationKind::DataArchiving => self.contains_kind(ActionKind::PurgeRevisions),
            RecommendationKind::CacheCleanup => self.contains_kind(ActionKind::PurgeExpiredCache),
            RecommendationKind::EngineConversion => self.contains_kind(ActionKind::ConvertEngine),
            RecommendationKind::ServerConfig | RecommendationKind::QueryCache => false,
        }
    }
}

/// Loads the recent-action view; unreadable history suppresses nothing.
pub async fn load_recent_actions<D>(db: &D, window_days: i64) -> RecentActions
where
    D: HistoryStore + ?Sized,
{
    match db.recent_history(HISTORY_LOOKBACK).await {
        Ok(entries) => {
            RecentActions::from_entries(&entries, Utc::now() - Duration::days(window_days))
        }
        Err(err) => {
            warn!("Optimization history unavailable, nothing suppressed: {err}");
            RecentActions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskLevel;
    use crate::models::Priority;

    fn entry(run_at: DateTime<Utc>, actions: Vec<OptimizationAction>) -> OptimizationHistoryEntry {
        OptimizationHistoryEntry {
            id: 1,
            run_at,
            risk_level: RiskLevel::Medium,
            tables_affected: Vec::new(),
            performance_impact: 0.0,
            recommendations: Vec::new(),
            optimization_actions: actions,
            performance_snapshot: None,
        }
    }

    fn index_action(table: &str, columns: &[&str]) -> OptimizationAction {
        let mut action = OptimizationAction::new(ActionKind::AddIndex, "index".into());
        action.table = Some(table.into());
        action.columns = columns.iter().map(|c| c.to_string()).collect();
        action
    }

    fn recommendation(kind: RecommendationKind, table: Option<&str>, columns: &[&str]) -> AiRecommendation {
        AiRecommendation {
            kind,
            description: "d".into(),
            priority: Priority::High,
            table: table.map(String::from),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            expected_impact: None,
        }
    }

    #[test]
    fn signature_is_order_and_case_insensitive() {
        assert_eq!(
            index_signature("wp_posts", &["Post_Status".into(), "post_type".into()]),
            index_signature("WP_POSTS", &["post_type".into(), "post_status".into()])
        );
    }

    #[test]
    fn suppresses_matching_index_only() {
        let now = Utc::now();
        let recent = RecentActions::from_entries(
            &[entry(now, vec![index_action("wp_postmeta", &["meta_key"])])],
            now - Duration::days(30),
        );
        assert!(recent.suppresses(&recommendation(
            RecommendationKind::IndexOptimization,
            Some("wp_postmeta"),
            &["meta_key"]
        )));
        assert!(!recent.suppresses(&recommendation(
            RecommendationKind::IndexOptimization,
            Some("wp_posts"),
            &["meta_key"]
        )));
        assert!(!recent.suppresses(&recommendation(RecommendationKind::ServerConfig, None, &[])));
    }

    #[test]
    fn entries_outside_window_are_ignored() {
        let now = Utc::now();
        let old = entry(
            now - Duration::days(45),
            vec![OptimizationAction::new(ActionKind::PurgeRevisions, "purge".into())],
        );
        let recent = RecentActions::from_entries(&[old], now - Duration::days(30));
        assert!(!recent.suppresses(&recommendation(RecommendationKind::DataArchiving, None, &[])));
    }
}
