use super::{Finding, TableFacts};
use crate::analysis::rules::RuleSet;
use crate::db::IndexRow;
use crate::models::{Suggestion, SuggestionKind};
use itertools::Itertools;
use std::collections::BTreeMap;

/// Index rows grouped by key name, columns in index order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexCatalog {
    keys: BTreeMap<String, Vec<String>>,
}

impl IndexCatalog {
    pub fn from_rows(rows: &[IndexRow]) -> Self {
        let keys = rows
            .iter()
            .into_group_map_by(|row| row.key_name.clone())
            .into_iter()
            .map(|(key, parts)| {
                let columns = parts
                    .into_iter()
                    .sorted_by_key(|row| row.seq_in_index)
                    .map(|row| row.column_name.clone())
                    .collect();
                (key, columns)
            })
            .collect();
        Self { keys }
    }

    pub fn has_key(&self, key_name: &str) -> bool {
        self.keys.keys().any(|k| k.eq_ignore_ascii_case(key_name))
    }

    /// True when `column` is part of any index.
    pub fn indexes_column(&self, column: &str) -> bool {
        self.keys
            .values()
            .flatten()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// True when a single key contains every one of `columns`.
    pub fn has_composite(&self, columns: &[String]) -> bool {
        self.keys.values().any(|key_columns| {
            columns
                .iter()
                .all(|wanted| key_columns.iter().any(|c| c.eq_ignore_ascii_case(wanted)))
        })
    }

    /// Whether an index over `columns` would be redundant.
    pub fn covers(&self, columns: &[String]) -> bool {
        match columns {
            [] => true,
            [single] => self.indexes_column(single),
            _ => self.has_composite(columns),
        }
    }
}

pub(super) fn missing_single_column(facts: &TableFacts, rules: &RuleSet) -> Vec<Finding> {
    let catalog = IndexCatalog::from_rows(&facts.indexes);
    rules
        .expected_for(&facts.table, &facts.prefix)
        .filter(|rule| !rule.is_composite())
        .filter_map(|rule| {
            let column = rule.columns.first()?;
            if !facts.has_column(column) || catalog.indexes_column(column) {
                return None;
            }
            Some(Finding {
                issue: format!("missing_index_{column}"),
                suggestion: Suggestion {
                    kind: SuggestionKind::AddIndex,
                    description: format!(
                        "Add index to {}.{} for better query performance",
                        facts.table, column
                    ),
                    columns: vec![column.clone()],
                    priority: rule.priority,
                },
            })
        })
        .collect()
}

pub(super) fn missing_composite(facts: &TableFacts, rules: &RuleSet) -> Vec<Finding> {
    let catalog = IndexCatalog::from_rows(&facts.indexes);
    rules
        .expected_for(&facts.table, &facts.prefix)
        .filter(|rule| rule.is_composite())
        .filter(|rule| rule.columns.iter().all(|c| facts.has_column(c)))
        .filter(|rule| !catalog.has_composite(&rule.columns))
        .map(|rule| {
            let name = rule
                .name
                .clone()
                .unwrap_or_else(|| rule.columns.join("_"));
            Finding {
                issue: format!("missing_composite_index_{name}"),
                suggestion: Suggestion {
                    kind: SuggestionKind::AddIndex,
                    description: format!(
                        "Add composite index ({}) to {} for better query performance",
                        rule.columns.join(", "),
                        facts.table
                    ),
                    columns: rule.columns.clone(),
                    priority: rule.priority,
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ColumnInfo;
    use crate::models::Priority;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn postmeta_facts(indexes: Vec<IndexRow>) -> TableFacts {
        TableFacts {
            table: "wp_postmeta".into(),
            prefix: "wp_".into(),
            indexes,
            columns: ["meta_id", "post_id", "meta_key", "meta_value"]
                .iter()
                .map(|c| ColumnInfo::new(c, "varchar"))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn composite_needs_one_key_with_every_column() {
        // Three separate single-column keys do not make a composite.
        let split = IndexCatalog::from_rows(&[
            IndexRow::new("type_idx", "post_type", 1),
            IndexRow::new("status_idx", "post_status", 1),
            IndexRow::new("date_idx", "post_date", 1),
        ]);
        let wanted = cols(&["post_type", "post_status", "post_date"]);
        assert!(!split.has_composite(&wanted));

        let grouped = IndexCatalog::from_rows(&[
            IndexRow::new("type_status_date", "post_date", 3),
            IndexRow::new("type_status_date", "post_type", 1),
            IndexRow::new("type_status_date", "post_status", 2),
        ]);
        assert!(grouped.has_composite(&wanted));
        assert!(grouped.indexes_column("POST_STATUS"));
    }

    #[test]
    fn postmeta_without_meta_key_index_gets_high_priority() {
        let findings = missing_single_column(
            &postmeta_facts(vec![
                IndexRow::new("PRIMARY", "meta_id", 1),
                IndexRow::new("post_id", "post_id", 1),
            ]),
            &RuleSet::default(),
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].issue, "missing_index_meta_key");
        assert_eq!(findings[0].suggestion.columns, vec!["meta_key"]);
        assert_eq!(findings[0].suggestion.priority, Priority::High);
    }

    #[test]
    fn column_inside_any_index_counts_as_indexed() {
        let findings = missing_single_column(
            &postmeta_facts(vec![
                IndexRow::new("post_meta", "post_id", 1),
                IndexRow::new("post_meta", "meta_key", 2),
            ]),
            &RuleSet::default(),
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn covers_matches_width() {
        let catalog = IndexCatalog::from_rows(&[IndexRow::new("dbm_abc", "meta_key", 1)]);
        assert!(catalog.covers(&cols(&["meta_key"])));
        assert!(!catalog.covers(&cols(&["meta_key", "post_id"])));
        assert!(catalog.has_key("DBM_ABC"));
    }
}
