use super::rules::Thresholds;
use super::{bytes_to_mb, value_as_u64};
use crate::models::{AiRecommendation, Priority, QueryCacheInfo, RecommendationKind, ServerInfo};

pub const SERVER_VARIABLES: &[&str] = &[
    "innodb_buffer_pool_size",
    "max_connections",
    "long_query_time",
    "slow_query_log",
    "query_cache_type",
    "query_cache_size",
    "tmp_table_size",
    "max_heap_table_size",
];

pub const SERVER_STATUS: &[&str] = &[
    "Threads_connected",
    "Created_tmp_tables",
    "Created_tmp_disk_tables",
    "Qcache_hits",
    "Qcache_inserts",
    "Qcache_lowmem_prunes",
    "Qcache_free_memory",
    "Qcache_queries_in_cache",
];

fn advisory(kind: RecommendationKind, priority: Priority, description: String) -> AiRecommendation {
    AiRecommendation {
        kind,
        description,
        priority,
        table: None,
        columns: Vec::new(),
        expected_impact: None,
    }
}

/// Database-wide configuration advisories; independent of any table.
pub fn server_advisories(info: &ServerInfo, thresholds: &Thresholds) -> Vec<AiRecommendation> {
    let mut advisories = Vec::new();

    if let Some(buffer_pool) = value_as_u64(&info.variables, "innodb_buffer_pool_size") {
        if buffer_pool < thresholds.buffer_pool_bytes {
            advisories.push(advisory(
                RecommendationKind::ServerConfig,
                Priority::Medium,
                format!(
                    "InnoDB buffer pool size is only {:.0}MB. For better performance, increase to at least {:.0}MB if possible.",
                    bytes_to_mb(buffer_pool),
                    bytes_to_mb(thresholds.buffer_pool_bytes)
                ),
            ));
        }
    }

    if let (Some(max), Some(connected)) = (
        value_as_u64(&info.variables, "max_connections"),
        value_as_u64(&info.status, "Threads_connected"),
    ) {
        if max > 0 {
            let ratio = connected as f64 / max as f64 * 100.0;
            if ratio > thresholds.connection_ratio_pct {
                advisories.push(advisory(
                    RecommendationKind::ServerConfig,
                    Priority::High,
                    format!(
                        "Connection usage is high ({ratio:.0}% of max_connections). Consider increasing max_connections or optimizing connection handling."
                    ),
                ));
            }
        }
    }

    if let (Some(disk), Some(total)) = (
        value_as_u64(&info.status, "Created_tmp_disk_tables"),
        value_as_u64(&info.status, "Created_tmp_tables"),
    ) {
        if total > 0 {
            let ratio = disk as f64 / total as f64 * 100.0;
            if ratio > thresholds.disk_tmp_ratio_pct {
                advisories.push(advisory(
                    RecommendationKind::ServerConfig,
                    Priority::Medium,
                    format!(
                        "{ratio:.0}% of temporary tables are created on disk. Consider increasing tmp_table_size and max_heap_table_size."
                    ),
                ));
            }
        }
    }

    advisories
}

/// Only meaningful while the query cache is enabled.
pub fn query_cache_advisories(
    cache: &QueryCacheInfo,
    thresholds: &Thresholds,
) -> Vec<AiRecommendation> {
    if !cache.enabled {
        return Vec::new();
    }
    let mut advisories = Vec::new();

    if let Some(hit_ratio) = cache.hit_ratio {
        if hit_ratio < thresholds.cache_hit_ratio_pct {
            advisories.push(advisory(
                RecommendationKind::QueryCache,
                Priority::Medium,
                format!(
                    "Query cache hit ratio is low ({hit_ratio:.1}%). Consider disabling the query cache or reviewing your query patterns."
                ),
            ));
        }
    }

    if value_as_u64(&cache.usage, "Qcache_lowmem_prunes")
        .is_some_and(|prunes| prunes > thresholds.lowmem_prunes)
    {
        advisories.push(advisory(
            RecommendationKind::QueryCache,
            Priority::Medium,
            "Query cache is frequently pruning entries due to low memory. Consider increasing query_cache_size.".to_string(),
        ));
    }

    advisories
}
