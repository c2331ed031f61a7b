use crate::config::OptimizerSettings;
use crate::db::MetadataSource;
use crate::identifier::SafeIdent;
use crate::models::{HealthReport, TableDiagnosis};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::warn;

const MIB: u64 = 1024 * 1024;

/// Row counts behind the health score and the cleanup recommendations.
/// `None` means the count could not be read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HousekeepingStats {
    pub expired_cache_entries: Option<u64>,
    pub revisions: Option<u64>,
    pub autoload_bytes: Option<u64>,
}

pub async fn collect_housekeeping<D>(db: &D, settings: &OptimizerSettings) -> HousekeepingStats
where
    D: MetadataSource + ?Sized,
{
    let mut stats = HousekeepingStats::default();
    let (Ok(options), Ok(posts)) = (
        SafeIdent::parse(&settings.table("options")),
        SafeIdent::parse(&settings.table("posts")),
    ) else {
        warn!("Housekeeping counts skipped: unsafe table prefix");
        return stats;
    };

    match db
        .count_expired_cache_entries(&options, Utc::now().timestamp())
        .await
    {
        Ok(count) => stats.expired_cache_entries = Some(count),
        Err(err) => warn!("Expired cache entry count unavailable: {err}"),
    }
    match db.count_revisions(&posts).await {
        Ok(count) => stats.revisions = Some(count),
        Err(err) => warn!("Revision count unavailable: {err}"),
    }
    match db.autoload_bytes(&options).await {
        Ok(bytes) => stats.autoload_bytes = Some(bytes),
        Err(err) => warn!("Autoload size unavailable: {err}"),
    }
    stats
}

fn count_penalty(count: Option<u64>) -> i32 {
    match count {
        Some(n) if n > 1000 => 15,
        Some(n) if n > 500 => 10,
        Some(n) if n > 200 => 5,
        _ => 0,
    }
}

pub fn is_missing_index_issue(issue: &str) -> bool {
    issue.starts_with("missing_index_") || issue.starts_with("missing_composite_index_")
}

/// 0-100 score; unknown inputs carry no penalty.
pub fn health_report(
    tables: &BTreeMap<String, TableDiagnosis>,
    housekeeping: &HousekeepingStats,
) -> HealthReport {
    let total_overhead_bytes: u64 = tables
        .values()
        .filter_map(|t| t.metrics.as_ref())
        .map(|m| m.overhead_bytes)
        .sum();
    let missing_indexes = tables
        .values()
        .flat_map(|t| t.issues.iter())
        .filter(|issue| is_missing_index_issue(issue))
        .count();

    let mut score: i32 = 100;
    if total_overhead_bytes > 10 * MIB {
        score -= 20;
    } else if total_overhead_bytes > MIB {
        score -= 10;
    }
    score -= 5 * missing_indexes.min(20) as i32;
    score -= count_penalty(housekeeping.expired_cache_entries);
    score -= count_penalty(housekeeping.revisions);
    match housekeeping.autoload_bytes {
        Some(bytes) if bytes > 3 * MIB => score -= 20,
        Some(bytes) if bytes > MIB => score -= 10,
        _ => {}
    }

    HealthReport {
        score: score.clamp(0, 100) as u8,
        total_overhead_bytes,
        missing_indexes,
        expired_cache_entries: housekeeping.expired_cache_entries,
        revisions: housekeeping.revisions,
        autoload_bytes: housekeeping.autoload_bytes,
    }
}
