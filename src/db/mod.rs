//! Database access: read-only introspection, mutating maintenance, and the
//! two durable record stores (backups and optimization history).
//!
//! Every identifier that reaches a statement arrives as a [`SafeIdent`];
//! values are bound as parameters.

pub mod mysql;
pub mod sql;

use crate::identifier::{IdentError, SafeIdent};
use crate::models::{
    BackupRecord, NewBackupRecord, NewHistoryEntry, OptimizationHistoryEntry, SlowQuerySample,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use snafu::Snafu;
use std::collections::BTreeMap;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DbError {
    #[snafu(display("Failed to connect to database: {}", source))]
    Connection { source: sqlx::Error },

    #[snafu(display("Failed to execute query: {}: {}", query, source))]
    Query { query: String, source: sqlx::Error },

    #[snafu(display("Statement {} failed: {}", index + 1, message))]
    Script { index: usize, message: String },

    #[snafu(display("Stored record {} could not be decoded: {}", id, source))]
    Decode { id: i64, source: serde_json::Error },

    #[snafu(display("Failed to encode record: {}", source))]
    Encode { source: serde_json::Error },

    #[snafu(display("Invalid name: {}", source))]
    InvalidName { source: IdentError },

    #[snafu(display("{}", message))]
    Unavailable { message: String },
}

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Row of `information_schema.TABLES` for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableStatus {
    pub engine: Option<String>,
    pub rows: u64,
    pub data_length: u64,
    pub index_length: u64,
    pub data_free: u64,
    pub collation: Option<String>,
}

impl TableStatus {
    pub fn is_myisam(&self) -> bool {
        self.engine
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case("MyISAM"))
    }
}

/// One column of one index; composite indexes span several rows.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub key_name: String,
    pub column_name: String,
    pub seq_in_index: u32,
    pub non_unique: bool,
}

impl IndexRow {
    pub fn new(key_name: &str, column_name: &str, seq_in_index: u32) -> Self {
        Self {
            key_name: key_name.to_string(),
            column_name: column_name.to_string(),
            seq_in_index,
            non_unique: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub column_type: String,
}

const LONG_TEXT_TYPES: &[&str] = &["text", "mediumtext", "longtext"];
const BINARY_TYPES: &[&str] = &[
    "binary",
    "varbinary",
    "tinyblob",
    "blob",
    "mediumblob",
    "longblob",
    "bit",
    "geometry",
];

impl ColumnInfo {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            column_type: data_type.to_string(),
        }
    }

    pub fn is_long_text(&self) -> bool {
        LONG_TEXT_TYPES
            .iter()
            .any(|t| self.data_type.eq_ignore_ascii_case(t))
    }

    pub fn is_binary(&self) -> bool {
        BINARY_TYPES
            .iter()
            .any(|t| self.data_type.eq_ignore_ascii_case(t))
    }
}

/// Column selected for export, with its encoding decided up front.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportColumn {
    pub name: SafeIdent,
    pub binary: bool,
}

/// A single exported cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Text(String),
    /// Upper-case hex digits, as produced by `HEX()`.
    Hex(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableIoStats {
    pub table: String,
    pub query_count: u64,
    pub total_time_seconds: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DatabaseFootprint {
    pub total_bytes: u64,
    pub table_count: u64,
}

/// Read-only view of the engine's introspection interface.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Base tables whose name starts with `prefix`, sorted.
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>>;

    async fn table_status(&self, table: &SafeIdent) -> Result<Option<TableStatus>>;

    async fn indexes(&self, table: &SafeIdent) -> Result<Vec<IndexRow>>;

    async fn columns(&self, table: &SafeIdent) -> Result<Vec<ColumnInfo>>;

    /// First value of `column` longer than `min_len` bytes, if any.
    async fn sample_long_value(
        &self,
        table: &SafeIdent,
        column: &SafeIdent,
        min_len: usize,
    ) -> Result<Option<Vec<u8>>>;

    async fn server_version(&self) -> Result<String>;

    /// Global variables restricted to `names`.
    async fn server_variables(&self, names: &[&str]) -> Result<BTreeMap<String, String>>;

    /// Global status counters restricted to `names`.
    async fn server_status(&self, names: &[&str]) -> Result<BTreeMap<String, String>>;

    /// Statements currently running for longer than `min_seconds`, longest first.
    async fn running_queries(&self, min_seconds: u64, limit: usize)
        -> Result<Vec<SlowQuerySample>>;

    async fn table_io_stats(&self) -> Result<Vec<TableIoStats>>;

    /// Expired cache entries: the set `purge_expired_cache_entries` removes.
    async fn count_expired_cache_entries(&self, options: &SafeIdent, now_unix: i64)
        -> Result<u64>;

    async fn count_revisions(&self, posts: &SafeIdent) -> Result<u64>;

    async fn autoload_bytes(&self, options: &SafeIdent) -> Result<u64>;

    async fn show_create_table(&self, table: &SafeIdent) -> Result<String>;

    async fn fetch_rows(
        &self,
        table: &SafeIdent,
        columns: &[ExportColumn],
        order_by: &[SafeIdent],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<SqlValue>>>;

    async fn database_footprint(&self, prefix: &str) -> Result<DatabaseFootprint>;
}

/// Mutating statements. Each call is its own unit of work.
#[async_trait]
pub trait Maintenance: MetadataSource {
    async fn optimize_table(&self, table: &SafeIdent) -> Result<()>;

    async fn convert_to_innodb(&self, table: &SafeIdent) -> Result<()>;

    async fn add_index(
        &self,
        table: &SafeIdent,
        index_name: &SafeIdent,
        columns: &[SafeIdent],
    ) -> Result<()>;

    /// Deletes cache entries whose expiry is before `now_unix`; returns the entry count.
    async fn purge_expired_cache_entries(&self, options: &SafeIdent, now_unix: i64)
        -> Result<u64>;

    /// Keeps the newest `keep` revisions per parent document.
    async fn purge_old_revisions(
        &self,
        posts: &SafeIdent,
        postmeta: &SafeIdent,
        keep: u32,
    ) -> Result<u64>;

    async fn purge_drafts_and_trash(&self, posts: &SafeIdent, postmeta: &SafeIdent)
        -> Result<u64>;

    /// Runs statements in order on one connection, stopping at the first failure.
    async fn execute_script(&self, statements: &[String]) -> Result<usize>;

    /// Non-blocking; `false` when another session holds the lock.
    async fn try_acquire_run_lock(&self, name: &str) -> Result<bool>;

    async fn release_run_lock(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait BackupCatalog: Send + Sync {
    async fn insert_backup(&self, record: NewBackupRecord) -> Result<BackupRecord>;

    /// Newest first.
    async fn list_backups(&self, limit: Option<usize>) -> Result<Vec<BackupRecord>>;

    async fn get_backup(&self, id: i64) -> Result<Option<BackupRecord>>;

    async fn mark_restored(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    async fn delete_backup(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_history(&self, entry: NewHistoryEntry) -> Result<OptimizationHistoryEntry>;

    /// Newest first.
    async fn recent_history(&self, limit: usize) -> Result<Vec<OptimizationHistoryEntry>>;
}

/// Everything the pipeline needs from one database.
pub trait Database: Maintenance + BackupCatalog + HistoryStore {}

impl<T: Maintenance + BackupCatalog + HistoryStore> Database for T {}
