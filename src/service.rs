//! Host-facing entry points. One `Optimizer` owns the database handle,
//! the settings, the rule set and the analysis cache for its lifetime.

use crate::analysis::aggregate;
use crate::analysis::rules::RuleSet;
use crate::analysis::table::TableAnalyzer;
use crate::analysis::AnalysisError;
use crate::backup::{BackupError, BackupManager, RestoreError};
use crate::cache::AnalysisCache;
use crate::config::{OptimizerSettings, RiskLevel};
use crate::db::Database;
use crate::models::{
    BackupRecord, BackupResult, DiagnosisDocument, OptimizationResult, PerformanceData,
    RestoreOutcome,
};
use crate::notify::{LogNotifier, NotificationSink, RunSummary};
use crate::optimizer::{LockSnafu, OptimizationEngine, OptimizeError};
use crate::telemetry::{self, TelemetryError};
use snafu::{ResultExt, Snafu};
use tracing::{info, warn};

pub const RUN_LOCK: &str = "dbmedic_optimize";

#[derive(Debug, Snafu)]
pub enum ServiceError {
    #[snafu(display("Analysis failed: {}", source))]
    Analysis { source: AnalysisError },

    #[snafu(display("{}", source))]
    Optimize { source: OptimizeError },

    #[snafu(display("{}", source))]
    Telemetry { source: TelemetryError },
}

type Result<T, E = ServiceError> = std::result::Result<T, E>;

pub struct Optimizer<D> {
    db: D,
    settings: OptimizerSettings,
    analyzer: TableAnalyzer,
    cache: AnalysisCache,
    notifier: Box<dyn NotificationSink>,
}

impl<D: Database> Optimizer<D> {
    pub fn new(db: D, settings: OptimizerSettings) -> Self {
        Self::with_rules(db, settings, RuleSet::default())
    }

    pub fn with_rules(db: D, settings: OptimizerSettings, rules: RuleSet) -> Self {
        let cache = AnalysisCache::new(settings.cache_ttl());
        Self {
            db,
            settings,
            analyzer: TableAnalyzer::new(rules),
            cache,
            notifier: Box::new(LogNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: impl NotificationSink + 'static) -> Self {
        self.notifier = Box::new(notifier);
        self
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    /// Read-only. Uses the stored telemetry snapshot when one exists.
    pub async fn analyze_database(&self) -> Result<DiagnosisDocument> {
        let telemetry = match telemetry::load_performance_data(&self.settings.state_dir) {
            Ok(data) => data,
            Err(err) => {
                warn!("Ignoring stored performance data: {err}");
                None
            }
        };
        aggregate::analyze_database(
            &self.db,
            &self.settings,
            &self.analyzer,
            &self.cache,
            telemetry,
        )
        .await
        .context(AnalysisSnafu)
    }

    /// Collects telemetry and stores it for the next analysis.
    pub async fn collect_performance_data(&self) -> Result<PerformanceData> {
        let data = telemetry::collect_performance_data(
            &self.db,
            &self.settings,
            &self.analyzer.rules().thresholds,
        )
        .await;
        let path = telemetry::save_performance_data(&self.settings.state_dir, &data)
            .context(TelemetrySnafu)?;
        info!("Performance data saved to {}", path.display());
        Ok(data)
    }

    /// Analyzes, then optimizes at `risk_level`, holding the run lock throughout.
    pub async fn optimize_database(&self, risk_level: RiskLevel) -> Result<OptimizationResult> {
        self.with_run_lock(async {
            let document = self.analyze_database().await?;
            self.apply(&document, risk_level).await
        })
        .await
    }

    /// Optimizes from a document the caller already holds.
    pub async fn optimize_with(
        &self,
        document: &DiagnosisDocument,
        risk_level: RiskLevel,
    ) -> Result<OptimizationResult> {
        self.with_run_lock(self.apply(document, risk_level)).await
    }

    async fn apply(
        &self,
        document: &DiagnosisDocument,
        risk_level: RiskLevel,
    ) -> Result<OptimizationResult> {
        let result = OptimizationEngine::new(
            &self.db,
            &self.settings,
            self.analyzer.rules(),
            &self.cache,
        )
        .optimize_database(document, risk_level)
        .await
        .context(OptimizeSnafu)?;

        if let Err(err) = telemetry::clear_performance_data(&self.settings.state_dir) {
            warn!("Stale performance data not removed: {err}");
        }
        Ok(result)
    }

    async fn with_run_lock<T>(
        &self,
        run: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        let acquired = self
            .db
            .try_acquire_run_lock(RUN_LOCK)
            .await
            .context(LockSnafu)
            .context(OptimizeSnafu)?;
        if !acquired {
            return Err(ServiceError::Optimize {
                source: OptimizeError::RunInProgress,
            });
        }

        let outcome = run.await;
        if let Err(err) = self.db.release_run_lock(RUN_LOCK).await {
            warn!("Run lock not released: {err}");
        }
        outcome
    }

    pub async fn create_backup(&self, risk_level: RiskLevel) -> Result<BackupResult, BackupError> {
        BackupManager::new(&self.db, &self.settings)
            .create_backup(risk_level)
            .await
    }

    pub async fn restore_backup(&self, id: i64) -> Result<RestoreOutcome, RestoreError> {
        let outcome = BackupManager::new(&self.db, &self.settings)
            .restore_backup(id)
            .await?;
        self.cache.clear();
        Ok(outcome)
    }

    pub async fn get_backup_history(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<BackupRecord>, BackupError> {
        BackupManager::new(&self.db, &self.settings)
            .get_backup_history(limit)
            .await
    }

    /// One unattended run. `None` when automatic optimization is off.
    pub async fn run_scheduled(&self) -> Result<Option<RunSummary>> {
        if !self.settings.auto_optimize {
            info!("Automatic optimization is disabled; nothing to do");
            return Ok(None);
        }

        info!(
            "Running scheduled {} optimization",
            self.settings.risk_level.as_str()
        );
        let result = self.optimize_database(self.settings.risk_level).await?;
        let summary = RunSummary::from_result(&result, self.settings.notification_email.clone());
        self.notifier.notify(&summary).await;
        Ok(Some(summary))
    }
}
