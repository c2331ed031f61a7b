//! Applies a diagnosis to the database at a given risk level.

pub mod actions;
pub mod phase;

pub use actions::{index_name, ActionSet};
pub use phase::RunPhase;

use crate::analysis::bytes_to_mb;
use crate::analysis::rules::RuleSet;
use crate::analysis::table::IndexCatalog;
use crate::backup::{BackupError, BackupManager};
use crate::cache::AnalysisCache;
use crate::config::{OptimizerSettings, RiskLevel};
use crate::db::{Database, DbError};
use crate::history::RecentActions;
use crate::identifier::{parse_all, SafeIdent};
use crate::models::{
    ActionKind, DiagnosisDocument, Failure, NewHistoryEntry, OptimizationAction,
    OptimizationResult, PerformanceSnapshot, SuggestionKind, TableDiagnosis,
};
use chrono::Utc;
use snafu::Snafu;
use tracing::{debug, info, warn};

pub const AUTOLOAD_ADVICE: &str =
    "Review and optimize autoloaded options which are consuming excessive memory on each page load.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OptimizeError {
    #[snafu(display("Backup failed: {}", source))]
    BackupFailed { source: BackupError },

    #[snafu(display("Another optimization run is already in progress"))]
    RunInProgress,

    #[snafu(display("Run lock unavailable: {}", source))]
    Lock { source: DbError },

    #[snafu(display("Invalid run transition from {} to {}", from, to))]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

impl OptimizeError {
    /// Host-facing failure shape.
    pub fn to_failure(&self) -> Failure {
        Failure::new(
            self.to_string(),
            matches!(self, OptimizeError::BackupFailed { .. }),
        )
    }
}

type Result<T, E = OptimizeError> = std::result::Result<T, E>;

/// Tracks the current phase and rejects out-of-order transitions.
#[derive(Debug, Default)]
struct RunState {
    phase: RunPhase,
}

impl RunState {
    fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return InvalidTransitionSnafu {
                from: self.phase,
                to: next,
            }
            .fail();
        }
        debug!("Run phase: {} -> {}", self.phase, next);
        self.phase = next;
        Ok(())
    }
}

/// Per-table outcome.
#[derive(Debug, Default)]
struct TableOutcome {
    actions: Vec<OptimizationAction>,
    impact: f64,
    warnings: Vec<String>,
}

pub struct OptimizationEngine<'a, D: ?Sized> {
    db: &'a D,
    settings: &'a OptimizerSettings,
    rules: &'a RuleSet,
    cache: &'a AnalysisCache,
}

impl<'a, D> OptimizationEngine<'a, D>
where
    D: Database + ?Sized,
{
    pub fn new(
        db: &'a D,
        settings: &'a OptimizerSettings,
        rules: &'a RuleSet,
        cache: &'a AnalysisCache,
    ) -> Self {
        Self {
            db,
            settings,
            rules,
            cache,
        }
    }

    pub async fn optimize_database(
        &self,
        document: &DiagnosisDocument,
        risk_level: RiskLevel,
    ) -> Result<OptimizationResult> {
        let mut state = RunState::default();
        let allowed = ActionSet::for_level(risk_level);
        info!("Running {} optimization with {:?}", risk_level.as_str(), allowed);

        state.advance(RunPhase::BackupPending)?;
        let mut backup_info = None;
        if self.settings.backup_required(risk_level) {
            match BackupManager::new(self.db, self.settings)
                .create_backup(risk_level)
                .await
            {
                Ok(backup) => backup_info = Some(backup),
                Err(source) => {
                    state.advance(RunPhase::BackupFailed)?;
                    warn!("Optimization aborted before any change: {source}");
                    return Err(OptimizeError::BackupFailed { source });
                }
            }
        }
        state.advance(RunPhase::Optimizing)?;

        let mut result = OptimizationResult {
            risk_level,
            tables_affected: Vec::new(),
            optimization_actions: Vec::new(),
            performance_impact: 0.0,
            recommendations: Vec::new(),
            backup_info,
            warnings: Vec::new(),
        };

        for (name, diagnosis) in &document.tables {
            if diagnosis.metrics.is_none() || self.settings.is_excluded(name) {
                continue;
            }
            let table = match SafeIdent::parse(name) {
                Ok(table) => table,
                Err(err) => {
                    warn!("Skipping table: {err}");
                    continue;
                }
            };

            let outcome = self.optimize_table(&table, diagnosis, allowed).await;
            result.warnings.extend(outcome.warnings);
            if !outcome.actions.is_empty() {
                self.cache.invalidate_table(name);
                result.tables_affected.push(name.clone());
                result.optimization_actions.extend(outcome.actions);
                result.performance_impact += outcome.impact;
            }
        }

        self.run_global_actions(allowed, &mut result).await;
        result.recommendations = self.recommendations(document, &result).await;

        state.advance(RunPhase::RecordingHistory)?;
        self.record_history(&mut result).await;
        state.advance(RunPhase::Done)?;

        info!(
            "Optimization finished: {} actions on {} tables, estimated impact {:.0}",
            result.optimization_actions.len(),
            result.tables_affected.len(),
            result.performance_impact
        );
        Ok(result)
    }

    async fn optimize_table(
        &self,
        table: &SafeIdent,
        diagnosis: &TableDiagnosis,
        allowed: ActionSet,
    ) -> TableOutcome {
        let mut outcome = TableOutcome::default();
        let weights = &self.rules.weights;
        let overhead = diagnosis
            .metrics
            .as_ref()
            .map_or(0, |metrics| metrics.overhead_bytes);

        if allowed.allows_defragment() && overhead > 0 {
            match self.db.table_status(table).await {
                Ok(Some(live)) if live.data_free > 0 => match self.db.optimize_table(table).await {
                    Ok(()) => {
                        let mut action = OptimizationAction::new(
                            ActionKind::OptimizeTable,
                            format!(
                                "Optimized table {}, removed {:.2} MB overhead",
                                table,
                                bytes_to_mb(live.data_free)
                            ),
                        );
                        action.table = Some(table.to_string());
                        action.bytes_reclaimed = Some(live.data_free);
                        outcome.impact += weights.for_action(ActionKind::OptimizeTable, 0);
                        outcome.actions.push(action);
                    }
                    Err(err) => outcome.warnings.push(format!("OPTIMIZE TABLE {table} failed: {err}")),
                },
                Ok(_) => debug!("Defragment of {table} skipped: no overhead left"),
                Err(err) => outcome.warnings.push(format!("Status of {table} unavailable: {err}")),
            }
        }

        if allowed.contains(ActionSet::CONVERT_ENGINE)
            && diagnosis.has_suggestion(SuggestionKind::EngineConversion)
        {
            match self.db.table_status(table).await {
                Ok(Some(live)) if live.is_myisam() => match self.db.convert_to_innodb(table).await {
                    Ok(()) => {
                        let mut action = OptimizationAction::new(
                            ActionKind::ConvertEngine,
                            format!(
                                "Converted table {table} from MyISAM to InnoDB engine for better performance and reliability"
                            ),
                        );
                        action.table = Some(table.to_string());
                        outcome.impact += weights.for_action(ActionKind::ConvertEngine, 0);
                        outcome.actions.push(action);
                    }
                    Err(err) => outcome.warnings.push(format!("Engine conversion of {table} failed: {err}")),
                },
                Ok(_) => debug!("Engine conversion of {table} skipped: no longer MyISAM"),
                Err(err) => outcome.warnings.push(format!("Status of {table} unavailable: {err}")),
            }
        }

        for suggestion in diagnosis
            .suggestions
            .iter()
            .filter(|s| s.kind == SuggestionKind::AddIndex && allowed.allows_index(s.priority))
        {
            if suggestion.columns.is_empty() {
                continue;
            }
            let columns = match parse_all(&suggestion.columns) {
                Ok(columns) => columns,
                Err(err) => {
                    warn!("Index on {table} skipped: {err}");
                    continue;
                }
            };
            let name = index_name(table.as_str(), &suggestion.columns);
            let Ok(name_ident) = SafeIdent::parse(&name) else {
                continue;
            };

            // Never trust the diagnosis for existing indexes.
            let live = match self.db.indexes(table).await {
                Ok(rows) => IndexCatalog::from_rows(&rows),
                Err(err) => {
                    outcome.warnings.push(format!("Indexes of {table} unavailable: {err}"));
                    continue;
                }
            };
            if live.has_key(&name) || live.covers(&suggestion.columns) {
                debug!(
                    "Index on {} ({}) skipped: already present",
                    table,
                    suggestion.columns.join(", ")
                );
                continue;
            }

            match self.db.add_index(table, &name_ident, &columns).await {
                Ok(()) => {
                    self.cache.indexes.invalidate(&table.to_string());
                    let mut action = OptimizationAction::new(
                        ActionKind::AddIndex,
                        format!(
                            "Added index on {} ({}) for better performance",
                            table,
                            suggestion.columns.join(", ")
                        ),
                    );
                    action.table = Some(table.to_string());
                    action.columns = suggestion.columns.clone();
                    action.index_name = Some(name);
                    outcome.impact += weights.for_action(ActionKind::AddIndex, columns.len());
                    outcome.actions.push(action);
                }
                Err(err) => outcome.warnings.push(format!("Adding index {name} on {table} failed: {err}")),
            }
        }

        outcome
    }

    /// Purges; each is a no-op when nothing qualifies.
    async fn run_global_actions(&self, allowed: ActionSet, result: &mut OptimizationResult) {
        let tables = (
            SafeIdent::parse(&self.settings.table("options")),
            SafeIdent::parse(&self.settings.table("posts")),
            SafeIdent::parse(&self.settings.table("postmeta")),
        );
        let (Ok(options), Ok(posts), Ok(postmeta)) = tables else {
            warn!("Global cleanup skipped: unsafe table prefix");
            return;
        };

        if allowed.contains(ActionSet::PURGE_EXPIRED_CACHE) {
            let outcome = self
                .db
                .purge_expired_cache_entries(&options, Utc::now().timestamp())
                .await;
            self.record_purge(
                result,
                ActionKind::PurgeExpiredCache,
                &options,
                outcome,
                |n| format!("Removed {n} expired cache entries"),
            );
        }

        if allowed.contains(ActionSet::PURGE_REVISIONS) {
            let outcome = self
                .db
                .purge_old_revisions(&posts, &postmeta, self.settings.revisions_to_keep)
                .await;
            self.record_purge(
                result,
                ActionKind::PurgeRevisions,
                &posts,
                outcome,
                |n| format!("Removed {n} old post revisions"),
            );
        }

        if allowed.contains(ActionSet::PURGE_DRAFTS) {
            let outcome = self.db.purge_drafts_and_trash(&posts, &postmeta).await;
            self.record_purge(
                result,
                ActionKind::PurgeDrafts,
                &posts,
                outcome,
                |n| format!("Removed {n} auto-drafts and trashed posts"),
            );
        }
    }

    fn record_purge(
        &self,
        result: &mut OptimizationResult,
        kind: ActionKind,
        table: &SafeIdent,
        outcome: std::result::Result<u64, DbError>,
        describe: impl FnOnce(u64) -> String,
    ) {
        match outcome {
            Ok(0) => debug!("{} skipped: nothing to remove", kind.as_str()),
            Ok(removed) => {
                self.cache.invalidate_table(table.as_str());
                let mut action = OptimizationAction::new(kind, describe(removed));
                action.table = Some(table.to_string());
                action.rows_removed = Some(removed);
                result.performance_impact += self.rules.weights.for_action(kind, 0);
                result.optimization_actions.push(action);
            }
            Err(err) => result
                .warnings
                .push(format!("{} failed: {err}", kind.as_str())),
        }
    }

    /// Open advice from the diagnosis minus what this run just did, plus the autoload check.
    async fn recommendations(
        &self,
        document: &DiagnosisDocument,
        result: &OptimizationResult,
    ) -> Vec<String> {
        let done = RecentActions::from_actions(&result.optimization_actions);
        let mut recommendations: Vec<String> = Vec::new();
        let mut push = |text: &str| {
            if !recommendations.iter().any(|r| r == text) {
                recommendations.push(text.to_string());
            }
        };

        for recommendation in document
            .ai_recommendations
            .iter()
            .filter(|r| !done.suppresses(r))
        {
            push(&recommendation.description);
        }
        for pattern in &document.query_patterns {
            if let Some(text) = &pattern.recommendation {
                push(text);
            }
        }

        match SafeIdent::parse(&self.settings.table("options")) {
            Ok(options) => match self.db.autoload_bytes(&options).await {
                Ok(bytes) if bytes > self.rules.thresholds.autoload_bytes => push(AUTOLOAD_ADVICE),
                Ok(_) => {}
                Err(err) => debug!("Autoload size unavailable: {err}"),
            },
            Err(err) => debug!("Autoload check skipped: {err}"),
        }

        recommendations
    }

    /// History failures are logged; the run's changes already happened.
    async fn record_history(&self, result: &mut OptimizationResult) {
        let snapshot = match self.db.database_footprint(&self.settings.table_prefix).await {
            Ok(footprint) => Some(PerformanceSnapshot {
                db_size_mb: bytes_to_mb(footprint.total_bytes),
                table_count: footprint.table_count,
                taken_at: Utc::now(),
            }),
            Err(err) => {
                debug!("Performance snapshot unavailable: {err}");
                None
            }
        };

        let entry = NewHistoryEntry {
            run_at: Utc::now(),
            risk_level: result.risk_level,
            tables_affected: result.tables_affected.clone(),
            performance_impact: result.performance_impact,
            recommendations: result.recommendations.clone(),
            optimization_actions: result.optimization_actions.clone(),
            performance_snapshot: snapshot,
        };
        if let Err(err) = self.db.append_history(entry).await {
            warn!("Optimization history not recorded: {err}");
            result
                .warnings
                .push(format!("Optimization history not recorded: {err}"));
        }
    }
}
