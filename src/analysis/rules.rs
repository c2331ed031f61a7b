//! Rule table: expected indexes, thresholds, and impact weights.
//!
//! Kept as data so a rule can be swapped or tested without touching the
//! pipeline.

use crate::models::{ActionKind, Priority};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Index a recognized table is expected to carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedIndex {
    /// Table name without the configured prefix.
    pub table_suffix: String,
    /// Composite name; `None` for single-column rules.
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub priority: Priority,
}

impl ExpectedIndex {
    fn single(table_suffix: &str, column: &str, priority: Priority) -> Self {
        Self {
            table_suffix: table_suffix.to_string(),
            name: None,
            columns: vec![column.to_string()],
            priority,
        }
    }

    fn composite(table_suffix: &str, name: &str, columns: &[&str], priority: Priority) -> Self {
        Self {
            table_suffix: table_suffix.to_string(),
            name: Some(name.to_string()),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            priority,
        }
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub overhead_bytes: u64,
    pub compress_ratio: f64,
    pub compress_min_len: usize,
    pub query_volume: u64,
    pub query_time_secs: f64,
    pub buffer_pool_bytes: u64,
    pub connection_ratio_pct: f64,
    pub disk_tmp_ratio_pct: f64,
    pub cache_hit_ratio_pct: f64,
    pub lowmem_prunes: u64,
    pub autoload_bytes: u64,
    /// Revision or cache-entry count above which cleanup is recommended.
    pub housekeeping_rows: u64,
    pub slow_query_secs: u64,
    pub slow_query_limit: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            overhead_bytes: MIB,
            compress_ratio: 0.5,
            compress_min_len: 1000,
            query_volume: 1000,
            query_time_secs: 10.0,
            buffer_pool_bytes: 128 * MIB,
            connection_ratio_pct: 70.0,
            disk_tmp_ratio_pct: 25.0,
            cache_hit_ratio_pct: 20.0,
            lowmem_prunes: 100,
            autoload_bytes: 1_000_000,
            housekeeping_rows: 200,
            slow_query_secs: 2,
            slow_query_limit: 10,
        }
    }
}

/// Fixed additive estimates per applied action. Not measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactWeights {
    pub defragment: f64,
    pub engine_conversion: f64,
    pub single_index: f64,
    pub composite_index: f64,
    pub cache_purge: f64,
    pub revision_purge: f64,
    pub draft_purge: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            defragment: 5.0,
            engine_conversion: 20.0,
            single_index: 10.0,
            composite_index: 15.0,
            cache_purge: 3.0,
            revision_purge: 5.0,
            draft_purge: 2.0,
        }
    }
}

impl ImpactWeights {
    pub fn for_action(&self, kind: ActionKind, column_count: usize) -> f64 {
        match kind {
            ActionKind::OptimizeTable => self.defragment,
            ActionKind::ConvertEngine => self.engine_conversion,
            ActionKind::AddIndex if column_count > 1 => self.composite_index,
            ActionKind::AddIndex => self.single_index,
            ActionKind::PurgeExpiredCache => self.cache_purge,
            ActionKind::PurgeRevisions => self.revision_purge,
            ActionKind::PurgeDrafts => self.draft_purge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub expected_indexes: Vec<ExpectedIndex>,
    pub thresholds: Thresholds,
    pub weights: ImpactWeights,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            expected_indexes: vec![
                ExpectedIndex::single("posts", "post_type", Priority::Medium),
                ExpectedIndex::single("posts", "post_status", Priority::Medium),
                ExpectedIndex::single("posts", "post_author", Priority::Medium),
                ExpectedIndex::single("posts", "post_date", Priority::Medium),
                ExpectedIndex::composite(
                    "posts",
                    "type_status_date",
                    &["post_type", "post_status", "post_date"],
                    Priority::Medium,
                ),
                ExpectedIndex::single("postmeta", "meta_key", Priority::High),
                ExpectedIndex::single("comments", "comment_approved", Priority::Medium),
                ExpectedIndex::single("comments", "comment_post_ID", Priority::Medium),
            ],
            thresholds: Thresholds::default(),
            weights: ImpactWeights::default(),
        }
    }
}

impl RuleSet {
    /// Rules that apply to `table` once `prefix` is stripped.
    pub fn expected_for<'a>(
        &'a self,
        table: &'a str,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a ExpectedIndex> + 'a {
        let suffix = table.strip_prefix(prefix);
        self.expected_indexes
            .iter()
            .filter(move |rule| suffix == Some(rule.table_suffix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_match_on_prefixed_name() {
        let rules = RuleSet::default();
        let postmeta: Vec<_> = rules.expected_for("wp_postmeta", "wp_").collect();
        assert_eq!(postmeta.len(), 1);
        assert_eq!(postmeta[0].columns, vec!["meta_key"]);
        assert_eq!(postmeta[0].priority, Priority::High);

        assert_eq!(rules.expected_for("wp_posts", "wp_").count(), 5);
        assert_eq!(rules.expected_for("blog_posts", "wp_").count(), 0);
    }

    #[test]
    fn index_weight_depends_on_width() {
        let weights = ImpactWeights::default();
        assert_eq!(weights.for_action(ActionKind::AddIndex, 1), 10.0);
        assert_eq!(weights.for_action(ActionKind::AddIndex, 3), 15.0);
        assert_eq!(weights.for_action(ActionKind::OptimizeTable, 0), 5.0);
    }
}
