use super::{Finding, TableFacts};
use crate::analysis::bytes_to_mb;
use crate::analysis::rules::RuleSet;
use crate::models::{Priority, Suggestion, SuggestionKind};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

/// Size of `bytes` after zlib compression at the default level.
pub fn compressed_len(bytes: &[u8]) -> Option<usize> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).ok()?;
    encoder.finish().ok().map(|out| out.len())
}

pub(super) fn overhead(facts: &TableFacts, rules: &RuleSet) -> Vec<Finding> {
    let overhead = facts.status.data_free;
    if overhead <= rules.thresholds.overhead_bytes {
        return Vec::new();
    }

    vec![Finding {
        issue: "high_overhead".to_string(),
        suggestion: Suggestion {
            kind: SuggestionKind::OptimizeTable,
            description: format!(
                "Table has {:.2} MB of overhead. Optimization recommended.",
                bytes_to_mb(overhead)
            ),
            columns: Vec::new(),
            priority: Priority::High,
        },
    }]
}

pub(super) fn compressible_columns(facts: &TableFacts, rules: &RuleSet) -> Vec<Finding> {
    let thresholds = &rules.thresholds;
    facts
        .samples
        .iter()
        .filter(|sample| sample.original_len > thresholds.compress_min_len)
        .filter(|sample| sample.ratio() < thresholds.compress_ratio)
        .map(|sample| Finding {
            issue: format!("compressible_data_{}", sample.column),
            suggestion: Suggestion {
                kind: SuggestionKind::CompressColumn,
                description: format!(
                    "Column {}.{} contains highly compressible data (ratio: {:.2})",
                    facts.table,
                    sample.column,
                    sample.ratio()
                ),
                columns: vec![sample.column.clone()],
                priority: Priority::Medium,
            },
        })
        .collect()
}

pub(super) fn legacy_engine(facts: &TableFacts, _rules: &RuleSet) -> Vec<Finding> {
    if !facts.status.is_myisam() {
        return Vec::new();
    }
    vec![myisam_finding(&facts.table)]
}

pub(crate) fn myisam_finding(table: &str) -> Finding {
    Finding {
        issue: "myisam_engine".to_string(),
        suggestion: Suggestion {
            kind: SuggestionKind::EngineConversion,
            description: format!(
                "Table {table} uses MyISAM engine. Consider converting to InnoDB for better performance and reliability."
            ),
            columns: Vec::new(),
            priority: Priority::Medium,
        },
    }
}
