//! Per-table diagnosis: facts in, issues and suggestions out.

mod indexes;
mod storage;

pub use indexes::IndexCatalog;
pub use storage::compressed_len;
pub(crate) use storage::myisam_finding;

use super::rules::RuleSet;
use super::{AnalysisError, MetadataSnafu, TableMissingSnafu};
use crate::cache::AnalysisCache;
use crate::db::{ColumnInfo, IndexRow, MetadataSource, TableStatus};
use crate::identifier::SafeIdent;
use crate::models::{Suggestion, TableDiagnosis, TableMetrics};
use snafu::{OptionExt, ResultExt};
use tracing::{debug, warn};

/// Compressed vs. original size of one sampled value.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSample {
    pub column: String,
    pub original_len: usize,
    pub compressed_len: usize,
}

impl ColumnSample {
    pub fn ratio(&self) -> f64 {
        if self.original_len == 0 {
            return 1.0;
        }
        self.compressed_len as f64 / self.original_len as f64
    }
}

/// Everything a table rule may look at.
#[derive(Debug, Clone, Default)]
pub struct TableFacts {
    pub table: String,
    pub prefix: String,
    pub status: TableStatus,
    pub indexes: Vec<IndexRow>,
    pub columns: Vec<ColumnInfo>,
    pub samples: Vec<ColumnSample>,
}

impl TableFacts {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub issue: String,
    pub suggestion: Suggestion,
}

pub type TableRule = fn(&TableFacts, &RuleSet) -> Vec<Finding>;

pub const DEFAULT_TABLE_RULES: &[TableRule] = &[
    storage::overhead,
    indexes::missing_single_column,
    indexes::missing_composite,
    storage::compressible_columns,
    storage::legacy_engine,
];

pub struct TableAnalyzer {
    rules: RuleSet,
    table_rules: Vec<TableRule>,
}

impl TableAnalyzer {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            table_rules: DEFAULT_TABLE_RULES.to_vec(),
        }
    }

    pub fn with_table_rules(rules: RuleSet, table_rules: Vec<TableRule>) -> Self {
        Self { rules, table_rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Pure: runs every rule over already-fetched facts.
    pub fn analyze(&self, facts: &TableFacts) -> TableDiagnosis {
        let metrics = TableMetrics {
            row_count: facts.status.rows,
            data_size_bytes: facts.status.data_length,
            index_size_bytes: facts.status.index_length,
            overhead_bytes: facts.status.data_free,
            engine: facts.status.engine.clone(),
            collation: facts.status.collation.clone(),
        };
        let mut diagnosis = TableDiagnosis::new(&facts.table, metrics);

        for rule in &self.table_rules {
            for finding in rule(facts, &self.rules) {
                if diagnosis.add_issue(finding.issue) {
                    diagnosis.suggestions.push(finding.suggestion);
                }
            }
        }
        diagnosis
    }
}

/// Reads one table's metadata and runs the analyzer over it.
pub async fn diagnose_table<D>(
    db: &D,
    table: &SafeIdent,
    prefix: &str,
    analyzer: &TableAnalyzer,
    cache: &AnalysisCache,
) -> Result<TableDiagnosis, AnalysisError>
where
    D: MetadataSource + ?Sized,
{
    let name = table.as_str();
    let status = db
        .table_status(table)
        .await
        .context(MetadataSnafu { table: name })?
        .context(TableMissingSnafu { table: name })?;

    let indexes = match cache.indexes.get(&name.to_string()) {
        Some(rows) => rows,
        None => {
            let rows = db
                .indexes(table)
                .await
                .context(MetadataSnafu { table: name })?;
            cache.indexes.insert(name.to_string(), rows.clone());
            rows
        }
    };

    let columns = db
        .columns(table)
        .await
        .context(MetadataSnafu { table: name })?;

    let min_len = analyzer.rules().thresholds.compress_min_len;
    let mut samples = Vec::new();
    for column in columns.iter().filter(|c| c.is_long_text()) {
        let Ok(ident) = SafeIdent::parse(&column.name) else {
            warn!("Skipping column with unsafe name in {}: {:?}", name, column.name);
            continue;
        };
        match db.sample_long_value(table, &ident, min_len).await {
            Ok(Some(bytes)) => {
                if let Some(compressed_len) = compressed_len(&bytes) {
                    samples.push(ColumnSample {
                        column: column.name.clone(),
                        original_len: bytes.len(),
                        compressed_len,
                    });
                }
            }
            Ok(None) => {}
            Err(err) => debug!("Sampling {}.{} skipped: {err}", name, column.name),
        }
    }

    let facts = TableFacts {
        table: name.to_string(),
        prefix: prefix.to_string(),
        status,
        indexes,
        columns,
        samples,
    };
    Ok(analyzer.analyze(&facts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, SuggestionKind};

    const MIB: u64 = 1024 * 1024;

    fn posts_columns() -> Vec<ColumnInfo> {
        ["ID", "post_author", "post_date", "post_status", "post_type"]
            .iter()
            .map(|c| ColumnInfo::new(c, "varchar"))
            .collect()
    }

    #[test]
    fn overhead_only_table_gets_one_high_suggestion() {
        let facts = TableFacts {
            table: "wp_logs".into(),
            prefix: "wp_".into(),
            status: TableStatus {
                engine: Some("InnoDB".into()),
                data_free: 2 * MIB,
                ..Default::default()
            },
            ..Default::default()
        };
        let diagnosis = TableAnalyzer::new(RuleSet::default()).analyze(&facts);

        assert_eq!(diagnosis.issues, vec!["high_overhead"]);
        assert_eq!(diagnosis.suggestions.len(), 1);
        let suggestion = &diagnosis.suggestions[0];
        assert_eq!(suggestion.kind, SuggestionKind::OptimizeTable);
        assert_eq!(suggestion.priority, Priority::High);
        assert!(suggestion.description.contains("2.00 MB"));
    }

    #[test]
    fn bare_posts_table_lists_every_missing_index() {
        let facts = TableFacts {
            table: "wp_posts".into(),
            prefix: "wp_".into(),
            indexes: vec![IndexRow::new("PRIMARY", "ID", 1)],
            columns: posts_columns(),
            ..Default::default()
        };
        let diagnosis = TableAnalyzer::new(RuleSet::default()).analyze(&facts);

        for column in ["post_type", "post_status", "post_author", "post_date"] {
            assert!(diagnosis.has_issue(&format!("missing_index_{column}")));
        }
        assert!(diagnosis.has_issue("missing_composite_index_type_status_date"));
        assert!(diagnosis
            .suggestions
            .iter()
            .all(|s| s.kind == SuggestionKind::AddIndex && s.priority == Priority::Medium));
    }

    #[test]
    fn custom_rule_list_replaces_defaults() {
        let facts = TableFacts {
            table: "wp_logs".into(),
            status: TableStatus {
                data_free: 5 * MIB,
                ..Default::default()
            },
            ..Default::default()
        };
        let analyzer = TableAnalyzer::with_table_rules(RuleSet::default(), Vec::new());
        let diagnosis = analyzer.analyze(&facts);
        assert!(diagnosis.issues.is_empty());
        assert_eq!(diagnosis.metrics.unwrap().overhead_bytes, 5 * MIB);
    }
}
