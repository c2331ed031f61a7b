//! Whole-database analysis: per-table diagnoses plus everything derived
//! from telemetry, housekeeping counts and history.

use super::health::{collect_housekeeping, health_report};
use super::recommend::{rank_recommendations, table_correlations, RecommendationInputs};
use super::rules::Thresholds;
use super::server::{query_cache_advisories, server_advisories};
use super::slow_query::cluster_slow_queries;
use super::table::{diagnose_table, myisam_finding, TableAnalyzer};
use super::{AnalysisError, ListTablesSnafu};
use crate::cache::AnalysisCache;
use crate::config::OptimizerSettings;
use crate::db::{HistoryStore, MetadataSource};
use crate::history::load_recent_actions;
use crate::identifier::SafeIdent;
use crate::models::{
    DiagnosisDocument, PerformanceData, Priority, Suggestion, SuggestionKind, TableDiagnosis,
    TableTelemetry,
};
use chrono::Utc;
use snafu::ResultExt;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Runs the read-only analysis pipeline. Never issues a mutating statement.
pub async fn analyze_database<D>(
    db: &D,
    settings: &OptimizerSettings,
    analyzer: &TableAnalyzer,
    cache: &AnalysisCache,
    telemetry: Option<PerformanceData>,
) -> Result<DiagnosisDocument, AnalysisError>
where
    D: MetadataSource + HistoryStore + ?Sized,
{
    info!("Running table discovery...");
    let names = db
        .list_tables(&settings.table_prefix)
        .await
        .context(ListTablesSnafu)?;

    let mut tables = BTreeMap::new();
    for name in names.into_iter().filter(|n| !settings.is_excluded(n)) {
        let ident = match SafeIdent::parse(&name) {
            Ok(ident) => ident,
            Err(err) => {
                warn!("Skipping table: {err}");
                continue;
            }
        };

        if let Some(cached) = cache.diagnoses.get(&name) {
            debug!("Using cached diagnosis for {name}");
            tables.insert(name, cached);
            continue;
        }

        match diagnose_table(db, &ident, &settings.table_prefix, analyzer, cache).await {
            Ok(diagnosis) => {
                cache.diagnoses.insert(name.clone(), diagnosis.clone());
                tables.insert(name, diagnosis);
            }
            Err(AnalysisError::TableMissing { table }) => {
                debug!("Table {table} dropped during analysis");
            }
            Err(err) => {
                warn!("Table analysis skipped: {err}");
                tables.insert(name.clone(), TableDiagnosis::unavailable(&name, err.to_string()));
            }
        }
    }

    let thresholds = &analyzer.rules().thresholds;
    let mut document = DiagnosisDocument::empty();
    let mut advisories = Vec::new();

    if let Some(perf) = telemetry.as_ref() {
        info!("Merging collected performance data...");
        for (name, diagnosis) in tables.iter_mut() {
            if let Some(stats) = perf.table_stats.get(name) {
                merge_table_telemetry(diagnosis, stats, thresholds);
            }
        }
        if perf.slow_queries.available {
            document.query_patterns = cluster_slow_queries(&perf.slow_queries.queries);
        }
        advisories.extend(server_advisories(&perf.server_info, thresholds));
        advisories.extend(query_cache_advisories(&perf.query_cache, thresholds));
    }

    info!("Running housekeeping analysis...");
    let housekeeping = collect_housekeeping(db, settings).await;
    document.health = Some(health_report(&tables, &housekeeping));
    document.table_correlations =
        table_correlations(&tables, &settings.table_prefix, &document.query_patterns);

    let recent = load_recent_actions(db, settings.history_window_days).await;
    document.ai_recommendations = rank_recommendations(
        RecommendationInputs {
            tables: &tables,
            patterns: &document.query_patterns,
            housekeeping: &housekeeping,
            advisories,
            thresholds,
        },
        &recent,
    );

    document.generated_at = Utc::now();
    document.tables = tables;
    document.performance_data = telemetry;
    Ok(document)
}

/// Folds per-table telemetry into a diagnosis. Tables without metrics are left alone.
pub fn merge_table_telemetry(
    diagnosis: &mut TableDiagnosis,
    stats: &TableTelemetry,
    thresholds: &Thresholds,
) {
    if diagnosis.metrics.is_none() {
        return;
    }

    if let Some(query_stats) = &stats.query_stats {
        diagnosis.query_stats = Some(query_stats.clone());

        if query_stats.query_count > thresholds.query_volume
            && diagnosis.add_issue("high_query_volume")
        {
            diagnosis.suggestions.push(Suggestion {
                kind: SuggestionKind::PerformanceReview,
                description: format!(
                    "Table {} has high query volume ({} queries). Consider caching or query optimization.",
                    diagnosis.table, query_stats.query_count
                ),
                columns: Vec::new(),
                priority: Priority::Medium,
            });
        }

        if query_stats.total_time_seconds > thresholds.query_time_secs
            && diagnosis.add_issue("high_query_time")
        {
            diagnosis.suggestions.push(Suggestion {
                kind: SuggestionKind::PerformanceReview,
                description: format!(
                    "Table {} has high total query time ({:.2} seconds). Review the queries that touch it.",
                    diagnosis.table, query_stats.total_time_seconds
                ),
                columns: Vec::new(),
                priority: Priority::High,
            });
        }
    }

    let legacy = stats
        .engine
        .as_deref()
        .is_some_and(|e| e.eq_ignore_ascii_case("MyISAM"));
    if legacy {
        let finding = myisam_finding(&diagnosis.table);
        if diagnosis.add_issue(finding.issue) {
            diagnosis.suggestions.push(finding.suggestion);
        }
    }
}
