use crate::config::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Priority attached to suggestions and recommendations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

/// What a per-table suggestion proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    OptimizeTable,
    AddIndex,
    CompressColumn,
    PerformanceReview,
    EngineConversion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    /// Human-readable, numbers already interpolated.
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMetrics {
    pub row_count: u64,
    pub data_size_bytes: u64,
    pub index_size_bytes: u64,
    /// Reclaimable free space reported by the engine.
    pub overhead_bytes: u64,
    pub engine: Option<String>,
    pub collation: Option<String>,
}

/// Diagnosis for one table from one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDiagnosis {
    pub table: String,
    pub metrics: Option<TableMetrics>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_stats: Option<QueryStats>,
    /// Set when metadata for this table could not be read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableDiagnosis {
    pub fn new(table: &str, metrics: TableMetrics) -> Self {
        Self {
            table: table.to_string(),
            metrics: Some(metrics),
            issues: Vec::new(),
            suggestions: Vec::new(),
            query_stats: None,
            error: None,
        }
    }

    pub fn unavailable(table: &str, error: String) -> Self {
        Self {
            table: table.to_string(),
            metrics: None,
            issues: Vec::new(),
            suggestions: Vec::new(),
            query_stats: None,
            error: Some(error),
        }
    }

    pub fn has_issue(&self, issue: &str) -> bool {
        self.issues.iter().any(|i| i == issue)
    }

    /// Issues form a set; repeats are dropped.
    pub fn add_issue(&mut self, issue: impl Into<String>) -> bool {
        let issue = issue.into();
        if self.has_issue(&issue) {
            return false;
        }
        self.issues.push(issue);
        true
    }

    pub fn has_suggestion(&self, kind: SuggestionKind) -> bool {
        self.suggestions.iter().any(|s| s.kind == kind)
    }
}

/// Full analysis result; the contract between analysis and optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisDocument {
    pub generated_at: DateTime<Utc>,
    /// Keyed by table name; every key names a table that existed at analysis time.
    pub tables: BTreeMap<String, TableDiagnosis>,
    #[serde(default)]
    pub performance_data: Option<PerformanceData>,
    #[serde(default)]
    pub query_patterns: Vec<QueryPattern>,
    #[serde(default)]
    pub table_correlations: Vec<TableCorrelation>,
    #[serde(default)]
    pub ai_recommendations: Vec<AiRecommendation>,
    #[serde(default)]
    pub health: Option<HealthReport>,
}

impl DiagnosisDocument {
    pub fn empty() -> Self {
        Self {
            generated_at: Utc::now(),
            tables: BTreeMap::new(),
            performance_data: None,
            query_patterns: Vec::new(),
            table_correlations: Vec::new(),
            ai_recommendations: Vec::new(),
            health: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryShape {
    FilterSort,
    Join,
    Grouping,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexCandidate {
    pub table: Option<String>,
    pub columns: Vec<String>,
}

/// Cluster of slow queries sharing one normalized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPattern {
    pub query_pattern: String,
    pub count: u64,
    pub total_execution_time: f64,
    pub avg_execution_time: f64,
    pub max_execution_time: f64,
    pub example: String,
    pub shape: QueryShape,
    /// Tables referenced by the example, when it could be parsed.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub index_candidate: Option<IndexCandidate>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCorrelation {
    pub left: String,
    pub right: String,
    pub strength: Priority,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    IndexOptimization,
    EngineConversion,
    DataArchiving,
    CacheCleanup,
    ServerConfig,
    QueryCache,
}

/// Ranked database-wide suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRecommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub description: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_impact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub score: u8,
    pub total_overhead_bytes: u64,
    pub missing_indexes: usize,
    pub expired_cache_entries: Option<u64>,
    pub revisions: Option<u64>,
    pub autoload_bytes: Option<u64>,
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceData {
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub slow_queries: SlowQueryLog,
    #[serde(default)]
    pub table_stats: BTreeMap<String, TableTelemetry>,
    #[serde(default)]
    pub server_info: ServerInfo,
    #[serde(default)]
    pub query_cache: QueryCacheInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlowQueryLog {
    pub available: bool,
    pub threshold_seconds: Option<f64>,
    pub queries: Vec<SlowQuerySample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQuerySample {
    pub query: String,
    pub time_seconds: f64,
    #[serde(default)]
    pub db: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableTelemetry {
    pub engine: Option<String>,
    pub rows: Option<u64>,
    pub query_stats: Option<QueryStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub query_count: u64,
    pub total_time_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: Option<String>,
    pub variables: BTreeMap<String, String>,
    pub status: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryCacheInfo {
    pub enabled: bool,
    pub size_bytes: Option<u64>,
    pub usage: BTreeMap<String, String>,
    pub hit_ratio: Option<f64>,
}

// ---------------------------------------------------------------------------
// Optimization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    OptimizeTable,
    ConvertEngine,
    AddIndex,
    PurgeExpiredCache,
    PurgeRevisions,
    PurgeDrafts,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::OptimizeTable => "optimize_table",
            ActionKind::ConvertEngine => "convert_engine",
            ActionKind::AddIndex => "add_index",
            ActionKind::PurgeExpiredCache => "purge_expired_cache",
            ActionKind::PurgeRevisions => "purge_revisions",
            ActionKind::PurgeDrafts => "purge_drafts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_reclaimed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_removed: Option<u64>,
}

impl OptimizationAction {
    pub fn new(kind: ActionKind, description: String) -> Self {
        Self {
            kind,
            table: None,
            description,
            columns: Vec::new(),
            index_name: None,
            bytes_reclaimed: None,
            rows_removed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub risk_level: RiskLevel,
    pub tables_affected: Vec<String>,
    pub optimization_actions: Vec<OptimizationAction>,
    /// Sum of fixed per-action weights; an estimate, not a measurement.
    pub performance_impact: f64,
    pub recommendations: Vec<String>,
    pub backup_info: Option<BackupResult>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Failure shape handed back to the host when a call does not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub success: bool,
    pub error: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub backup_required: bool,
}

impl Failure {
    pub fn new(error: impl Into<String>, backup_required: bool) -> Self {
        Self {
            success: false,
            error: error.into(),
            backup_required,
        }
    }
}

// ---------------------------------------------------------------------------
// Backup and history records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupResult {
    pub success: bool,
    pub backup_id: i64,
    pub filename: String,
    pub filepath: String,
    pub byte_size: u64,
    pub table_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBackupRecord {
    pub filename: String,
    pub filepath: String,
    pub created_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub byte_size: u64,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: i64,
    pub filename: String,
    pub filepath: String,
    pub created_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub byte_size: u64,
    pub table_count: usize,
    pub tables: Vec<String>,
    pub restored: bool,
    pub restored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub success: bool,
    pub message: String,
    pub statements_executed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub db_size_mb: f64,
    pub table_count: u64,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub run_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub tables_affected: Vec<String>,
    pub performance_impact: f64,
    pub recommendations: Vec<String>,
    pub optimization_actions: Vec<OptimizationAction>,
    pub performance_snapshot: Option<PerformanceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationHistoryEntry {
    pub id: i64,
    pub run_at: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub tables_affected: Vec<String>,
    pub performance_impact: f64,
    pub recommendations: Vec<String>,
    pub optimization_actions: Vec<OptimizationAction>,
    pub performance_snapshot: Option<PerformanceSnapshot>,
}
