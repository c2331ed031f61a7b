//! Out-of-band performance data: collected from the server on demand,
//! persisted between runs, and merged into the next analysis.

use crate::analysis::rules::Thresholds;
use crate::analysis::server::{SERVER_STATUS, SERVER_VARIABLES};
use crate::analysis::value_as_u64;
use crate::config::OptimizerSettings;
use crate::db::MetadataSource;
use crate::identifier::SafeIdent;
use crate::models::{
    PerformanceData, QueryCacheInfo, QueryStats, ServerInfo, SlowQueryLog, TableTelemetry,
};
use chrono::Utc;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const SNAPSHOT_FILE: &str = "performance_data.json";

#[derive(Debug, Snafu)]
pub enum TelemetryError {
    #[snafu(display("Failed to create state directory {}: {}", path.display(), source))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write {}: {}", path.display(), source))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to read {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to encode performance data: {}", source))]
    Encode { source: serde_json::Error },

    #[snafu(display("Stored performance data in {} is corrupt: {}", path.display(), source))]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Reads every telemetry section; each one degrades to "not available" on its own.
pub async fn collect_performance_data<D>(
    db: &D,
    settings: &OptimizerSettings,
    thresholds: &Thresholds,
) -> PerformanceData
where
    D: MetadataSource + ?Sized,
{
    info!("Collecting server configuration...");
    let server_info = collect_server_info(db).await;

    info!("Collecting slow query samples...");
    let slow_queries = collect_slow_queries(db, &server_info.variables, thresholds).await;

    info!("Collecting per-table statistics...");
    let table_stats = collect_table_stats(db, &settings.table_prefix).await;

    let query_cache = query_cache_info(&server_info);

    PerformanceData {
        collected_at: Utc::now(),
        slow_queries,
        table_stats,
        server_info,
        query_cache,
    }
}

async fn collect_server_info<D>(db: &D) -> ServerInfo
where
    D: MetadataSource + ?Sized,
{
    let version = match db.server_version().await {
        Ok(version) => Some(version),
        Err(err) => {
            warn!("Server version unavailable: {err}");
            None
        }
    };
    let variables = db
        .server_variables(SERVER_VARIABLES)
        .await
        .unwrap_or_else(|err| {
            warn!("Server variables unavailable: {err}");
            BTreeMap::new()
        });
    let status = db.server_status(SERVER_STATUS).await.unwrap_or_else(|err| {
        warn!("Server status unavailable: {err}");
        BTreeMap::new()
    });

    ServerInfo {
        version,
        variables,
        status,
    }
}

fn variable<'a>(values: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    values
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.trim())
}

fn is_on(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("ON") || v == "1")
}

async fn collect_slow_queries<D>(
    db: &D,
    variables: &BTreeMap<String, String>,
    thresholds: &Thresholds,
) -> SlowQueryLog
where
    D: MetadataSource + ?Sized,
{
    let threshold_seconds = variable(variables, "long_query_time").and_then(|v| v.parse().ok());
    if !is_on(variable(variables, "slow_query_log")) {
        debug!("Slow query log disabled; no samples collected");
        return SlowQueryLog {
            available: false,
            threshold_seconds,
            queries: Vec::new(),
        };
    }

    match db
        .running_queries(thresholds.slow_query_secs, thresholds.slow_query_limit)
        .await
    {
        Ok(queries) => SlowQueryLog {
            available: true,
            threshold_seconds,
            queries,
        },
        Err(err) => {
            warn!("Slow query samples unavailable: {err}");
            SlowQueryLog {
                available: false,
                threshold_seconds,
                queries: Vec::new(),
            }
        }
    }
}

async fn collect_table_stats<D>(db: &D, prefix: &str) -> BTreeMap<String, TableTelemetry>
where
    D: MetadataSource + ?Sized,
{
    let io_stats = match db.table_io_stats().await {
        Ok(stats) => stats,
        Err(err) => {
            warn!("Per-table statistics unavailable: {err}");
            return BTreeMap::new();
        }
    };

    let mut table_stats = BTreeMap::new();
    for stats in io_stats.into_iter().filter(|s| s.table.starts_with(prefix)) {
        let Ok(ident) = SafeIdent::parse(&stats.table) else {
            warn!("Skipping statistics for unsafe table name {:?}", stats.table);
            continue;
        };
        let status = match db.table_status(&ident).await {
            Ok(status) => status,
            Err(err) => {
                debug!("Status for {} unavailable: {err}", stats.table);
                None
            }
        };
        table_stats.insert(
            stats.table,
            TableTelemetry {
                engine: status.as_ref().and_then(|s| s.engine.clone()),
                rows: status.as_ref().map(|s| s.rows),
                query_stats: Some(QueryStats {
                    query_count: stats.query_count,
                    total_time_seconds: stats.total_time_seconds,
                }),
            },
        );
    }
    table_stats
}

/// Derived from the server variables and `Qcache_*` counters.
pub fn query_cache_info(info: &ServerInfo) -> QueryCacheInfo {
    let size_bytes = value_as_u64(&info.variables, "query_cache_size");
    let cache_type = variable(&info.variables, "query_cache_type");
    let enabled = cache_type.is_some_and(|t| !t.eq_ignore_ascii_case("OFF") && t != "0")
        && size_bytes.is_some_and(|s| s > 0);

    let usage: BTreeMap<String, String> = info
        .status
        .iter()
        .filter(|(key, _)| key.to_ascii_lowercase().starts_with("qcache_"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let hit_ratio = match (
        value_as_u64(&usage, "Qcache_hits"),
        value_as_u64(&usage, "Qcache_inserts"),
    ) {
        (Some(hits), Some(inserts)) if hits + inserts > 0 => {
            Some(hits as f64 / (hits + inserts) as f64 * 100.0)
        }
        _ => None,
    };

    QueryCacheInfo {
        enabled,
        size_bytes,
        usage,
        hit_ratio,
    }
}

pub fn snapshot_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SNAPSHOT_FILE)
}

pub fn save_performance_data(state_dir: &Path, data: &PerformanceData) -> Result<PathBuf> {
    fs::create_dir_all(state_dir).context(CreateDirSnafu { path: state_dir })?;
    let path = snapshot_path(state_dir);
    let json = serde_json::to_string_pretty(data).context(EncodeSnafu)?;
    fs::write(&path, json).context(WriteSnafu { path: &path })?;
    Ok(path)
}

/// `None` when no snapshot has been collected yet.
pub fn load_performance_data(state_dir: &Path) -> Result<Option<PerformanceData>> {
    let path = snapshot_path(state_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).context(ReadSnafu { path: &path })?;
    let data = serde_json::from_str(&content).context(DecodeSnafu { path: &path })?;
    Ok(Some(data))
}

pub fn clear_performance_data(state_dir: &Path) -> Result<()> {
    let path = snapshot_path(state_dir);
    if path.exists() {
        fs::remove_file(&path).context(WriteSnafu { path: &path })?;
    }
    Ok(())
}
