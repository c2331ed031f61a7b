//! In-memory database used by unit tests. Mutations change the stored
//! state the way the real engine would, and every statement that would
//! have been sent is recorded.

use crate::db::{
    sql, BackupCatalog, ColumnInfo, DatabaseFootprint, DbError, ExportColumn, HistoryStore,
    IndexRow, Maintenance, MetadataSource, Result, SqlValue, TableIoStats, TableStatus,
};
use crate::identifier::SafeIdent;
use crate::models::{
    BackupRecord, NewBackupRecord, NewHistoryEntry, OptimizationHistoryEntry, SlowQuerySample,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Recorded in place of the catalog insert, so ordering can be asserted.
pub const BACKUP_RECORDED: &str = "-- backup recorded";

const MUTATING_PREFIXES: &[&str] = &["OPTIMIZE", "ALTER", "DELETE", "DROP", "CREATE", "INSERT"];

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub status: TableStatus,
    pub indexes: Vec<IndexRow>,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<SqlValue>>,
    pub samples: HashMap<String, Vec<u8>>,
}

impl FakeTable {
    pub fn innodb() -> Self {
        Self::with_engine("InnoDB")
    }

    pub fn myisam() -> Self {
        Self::with_engine("MyISAM")
    }

    fn with_engine(engine: &str) -> Self {
        Self {
            status: TableStatus {
                engine: Some(engine.to_string()),
                rows: 0,
                data_length: 16 * 1024,
                index_length: 0,
                data_free: 0,
                collation: Some("utf8mb4_unicode_ci".to_string()),
            },
            ..Default::default()
        }
    }

    pub fn overhead(mut self, bytes: u64) -> Self {
        self.status.data_free = bytes;
        self
    }

    pub fn columns(mut self, columns: &[(&str, &str)]) -> Self {
        self.columns = columns
            .iter()
            .map(|(name, data_type)| ColumnInfo::new(name, data_type))
            .collect();
        self
    }

    pub fn index(mut self, key_name: &str, columns: &[&str]) -> Self {
        for (seq, column) in columns.iter().enumerate() {
            self.indexes
                .push(IndexRow::new(key_name, column, seq as u32 + 1));
        }
        self
    }

    pub fn rows(mut self, rows: Vec<Vec<SqlValue>>) -> Self {
        self.status.rows = rows.len() as u64;
        self.rows = rows;
        self
    }

    pub fn sample(mut self, column: &str, value: Vec<u8>) -> Self {
        self.samples.insert(column.to_string(), value);
        self
    }
}

/// Session settings a restore script toggles on its connection.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeSession {
    pub autocommit: bool,
    pub foreign_key_checks: bool,
    pub sql_mode_overridden: bool,
    pub in_transaction: bool,
}

impl Default for FakeSession {
    fn default() -> Self {
        Self {
            autocommit: true,
            foreign_key_checks: true,
            sql_mode_overridden: false,
            in_transaction: false,
        }
    }
}

impl FakeSession {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&mut self, statement: &str) {
        let normalized: String = statement
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "SETAUTOCOMMIT=0" => self.autocommit = false,
            "SETAUTOCOMMIT=1" => {
                self.autocommit = true;
                self.in_transaction = false;
            }
            "SETFOREIGN_KEY_CHECKS=0" => self.foreign_key_checks = false,
            "SETFOREIGN_KEY_CHECKS=1" => self.foreign_key_checks = true,
            "STARTTRANSACTION" => self.in_transaction = true,
            "COMMIT" | "ROLLBACK" => self.in_transaction = false,
            "SETSESSIONSQL_MODE=@DBMEDIC_SQL_MODE" => self.sql_mode_overridden = false,
            other if other.starts_with("SETSQL_MODE=") => self.sql_mode_overridden = true,
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub tables: BTreeMap<String, FakeTable>,
    pub statements: Vec<String>,
    pub backups: Vec<BackupRecord>,
    pub history: Vec<OptimizationHistoryEntry>,
    /// Every stored cache entry, live ones included.
    pub cache_entries: u64,
    pub expired_cache_entries: u64,
    pub revisions: u64,
    pub surplus_revisions: u64,
    pub drafts: u64,
    pub autoload_bytes: u64,
    pub variables: BTreeMap<String, String>,
    pub status: BTreeMap<String, String>,
    pub running: Vec<SlowQuerySample>,
    pub io_stats: Vec<TableIoStats>,
    pub lock_held: bool,
    pub fail_metadata: HashSet<String>,
    pub fail_housekeeping: bool,
    pub fail_history: bool,
    pub fail_script_at: Option<usize>,
    /// Connection state left behind by scripts; the fake has one shared session.
    pub session: FakeSession,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct FakeDatabase {
    state: Mutex<FakeState>,
}

fn id_column() -> Result<SafeIdent> {
    SafeIdent::parse("ID").map_err(|source| DbError::InvalidName { source })
}

fn unavailable(message: &str) -> DbError {
    DbError::Unavailable {
        message: message.to_string(),
    }
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, table: FakeTable) -> Self {
        self.state.lock().tables.insert(name.to_string(), table);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.lock().statements.clone()
    }

    /// Statements that would have changed the database.
    pub fn mutations(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| {
                let upper = s.trim_start().to_ascii_uppercase();
                MUTATING_PREFIXES.iter().any(|p| upper.starts_with(p))
            })
            .collect()
    }

    pub fn clear_statements(&self) {
        self.state.lock().statements.clear();
    }

    fn record(&self, statement: String) {
        self.state.lock().statements.push(statement);
    }

    fn table(&self, name: &SafeIdent) -> Result<FakeTable> {
        let state = self.state.lock();
        if state.fail_metadata.contains(name.as_str()) {
            return Err(unavailable("access denied"));
        }
        state
            .tables
            .get(name.as_str())
            .cloned()
            .ok_or_else(|| unavailable("no such table"))
    }
}

#[async_trait]
impl MetadataSource for FakeDatabase {
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .tables
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn table_status(&self, table: &SafeIdent) -> Result<Option<TableStatus>> {
        let state = self.state.lock();
        if state.fail_metadata.contains(table.as_str()) {
            return Err(unavailable("access denied"));
        }
        Ok(state.tables.get(table.as_str()).map(|t| t.status.clone()))
    }

    async fn indexes(&self, table: &SafeIdent) -> Result<Vec<IndexRow>> {
        Ok(self.table(table)?.indexes)
    }

    async fn columns(&self, table: &SafeIdent) -> Result<Vec<ColumnInfo>> {
        Ok(self.table(table)?.columns)
    }

    async fn sample_long_value(
        &self,
        table: &SafeIdent,
        column: &SafeIdent,
        min_len: usize,
    ) -> Result<Option<Vec<u8>>> {
        self.record(sql::sample_long_value(table, column));
        Ok(self
            .table(table)?
            .samples
            .get(column.as_str())
            .filter(|value| value.len() > min_len)
            .cloned())
    }

    async fn server_version(&self) -> Result<String> {
        Ok("8.0.36".to_string())
    }

    async fn server_variables(&self, names: &[&str]) -> Result<BTreeMap<String, String>> {
        let state = self.state.lock();
        Ok(state
            .variables
            .iter()
            .filter(|(k, _)| names.iter().any(|n| n.eq_ignore_ascii_case(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn server_status(&self, names: &[&str]) -> Result<BTreeMap<String, String>> {
        let state = self.state.lock();
        Ok(state
            .status
            .iter()
            .filter(|(k, _)| names.iter().any(|n| n.eq_ignore_ascii_case(k)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn running_queries(
        &self,
        min_seconds: u64,
        limit: usize,
    ) -> Result<Vec<SlowQuerySample>> {
        Ok(self
            .state
            .lock()
            .running
            .iter()
            .filter(|q| q.time_seconds > min_seconds as f64)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn table_io_stats(&self) -> Result<Vec<TableIoStats>> {
        Ok(self.state.lock().io_stats.clone())
    }

    async fn count_expired_cache_entries(
        &self,
        _options: &SafeIdent,
        _now_unix: i64,
    ) -> Result<u64> {
        let state = self.state.lock();
        if state.fail_housekeeping {
            return Err(unavailable("access denied"));
        }
        Ok(state.expired_cache_entries)
    }

    async fn count_revisions(&self, _posts: &SafeIdent) -> Result<u64> {
        let state = self.state.lock();
        if state.fail_housekeeping {
            return Err(unavailable("access denied"));
        }
        Ok(state.revisions)
    }

    async fn autoload_bytes(&self, _options: &SafeIdent) -> Result<u64> {
        let state = self.state.lock();
        if state.fail_housekeeping {
            return Err(unavailable("access denied"));
        }
        Ok(state.autoload_bytes)
    }

    async fn show_create_table(&self, table: &SafeIdent) -> Result<String> {
        self.record(sql::show_create_table(table));
        let fake = self.table(table)?;
        let columns = fake
            .columns
            .iter()
            .map(|c| format!("  `{}` {}", c.name, c.column_type))
            .collect::<Vec<_>>()
            .join(",\n");
        Ok(format!(
            "CREATE TABLE {} (\n{}\n) ENGINE={}",
            table.quoted(),
            columns,
            fake.status.engine.as_deref().unwrap_or("InnoDB")
        ))
    }

    async fn fetch_rows(
        &self,
        table: &SafeIdent,
        columns: &[ExportColumn],
        order_by: &[SafeIdent],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<SqlValue>>> {
        self.record(sql::select_export(table, columns, order_by));
        Ok(self
            .table(table)?
            .rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn database_footprint(&self, prefix: &str) -> Result<DatabaseFootprint> {
        let state = self.state.lock();
        let tables: Vec<&FakeTable> = state
            .tables
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(_, t)| t)
            .collect();
        Ok(DatabaseFootprint {
            total_bytes: tables
                .iter()
                .map(|t| t.status.data_length + t.status.index_length)
                .sum(),
            table_count: tables.len() as u64,
        })
    }
}

#[async_trait]
impl Maintenance for FakeDatabase {
    async fn optimize_table(&self, table: &SafeIdent) -> Result<()> {
        self.record(sql::optimize_table(table));
        let mut state = self.state.lock();
        if let Some(fake) = state.tables.get_mut(table.as_str()) {
            fake.status.data_free = 0;
        }
        Ok(())
    }

    async fn convert_to_innodb(&self, table: &SafeIdent) -> Result<()> {
        self.record(sql::convert_to_innodb(table));
        let mut state = self.state.lock();
        if let Some(fake) = state.tables.get_mut(table.as_str()) {
            fake.status.engine = Some("InnoDB".to_string());
        }
        Ok(())
    }

    async fn add_index(
        &self,
        table: &SafeIdent,
        index_name: &SafeIdent,
        columns: &[SafeIdent],
    ) -> Result<()> {
        self.record(sql::add_index(table, index_name, columns));
        let mut state = self.state.lock();
        let fake = state
            .tables
            .get_mut(table.as_str())
            .ok_or_else(|| unavailable("no such table"))?;
        if fake.indexes.iter().any(|i| i.key_name == index_name.as_str()) {
            return Err(unavailable("Duplicate key name"));
        }
        for (seq, column) in columns.iter().enumerate() {
            fake.indexes
                .push(IndexRow::new(index_name.as_str(), column.as_str(), seq as u32 + 1));
        }
        Ok(())
    }

    async fn purge_expired_cache_entries(&self, options: &SafeIdent, _now_unix: i64) -> Result<u64> {
        let mut state = self.state.lock();
        let removed = state.expired_cache_entries;
        if removed > 0 {
            state.statements.push(sql::delete_option_pair(options));
            state.expired_cache_entries = 0;
            state.cache_entries = state.cache_entries.saturating_sub(removed);
        }
        Ok(removed)
    }

    async fn purge_old_revisions(
        &self,
        posts: &SafeIdent,
        _postmeta: &SafeIdent,
        _keep: u32,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let removed = state.surplus_revisions;
        if removed > 0 {
            state.statements.push(sql::delete_by_ids(posts, &id_column()?, removed as usize));
            state.surplus_revisions = 0;
            state.revisions = state.revisions.saturating_sub(removed);
        }
        Ok(removed)
    }

    async fn purge_drafts_and_trash(&self, posts: &SafeIdent, _postmeta: &SafeIdent) -> Result<u64> {
        let mut state = self.state.lock();
        let removed = state.drafts;
        if removed > 0 {
            state.statements.push(sql::delete_by_ids(posts, &id_column()?, removed as usize));
            state.drafts = 0;
        }
        Ok(removed)
    }

    async fn execute_script(&self, statements: &[String]) -> Result<usize> {
        let mut state = self.state.lock();
        state.statements.push(sql::SAVE_SESSION.to_string());

        let mut outcome = Ok(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            if state.fail_script_at == Some(index) {
                outcome = Err(DbError::Script {
                    index,
                    message: "You have an error in your SQL syntax".to_string(),
                });
                break;
            }
            state.session.apply(statement);
            state.statements.push(statement.clone());
        }

        for statement in sql::finish_script(outcome.is_err()) {
            state.session.apply(statement);
            state.statements.push(statement.to_string());
        }
        outcome
    }

    async fn try_acquire_run_lock(&self, _name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        if state.lock_held {
            return Ok(false);
        }
        state.lock_held = true;
        Ok(true)
    }

    async fn release_run_lock(&self, _name: &str) -> Result<()> {
        self.state.lock().lock_held = false;
        Ok(())
    }
}

#[async_trait]
impl BackupCatalog for FakeDatabase {
    async fn insert_backup(&self, record: NewBackupRecord) -> Result<BackupRecord> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let stored = BackupRecord {
            id: state.next_id,
            filename: record.filename,
            filepath: record.filepath,
            created_at: record.created_at,
            risk_level: record.risk_level,
            byte_size: record.byte_size,
            table_count: record.tables.len(),
            tables: record.tables,
            restored: false,
            restored_at: None,
        };
        state.backups.push(stored.clone());
        state.statements.push(BACKUP_RECORDED.to_string());
        Ok(stored)
    }

    async fn list_backups(&self, limit: Option<usize>) -> Result<Vec<BackupRecord>> {
        let mut backups = self.state.lock().backups.clone();
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            backups.truncate(limit);
        }
        Ok(backups)
    }

    async fn get_backup(&self, id: i64) -> Result<Option<BackupRecord>> {
        Ok(self.state.lock().backups.iter().find(|b| b.id == id).cloned())
    }

    async fn mark_restored(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(record) = state.backups.iter_mut().find(|b| b.id == id) {
            record.restored = true;
            record.restored_at = Some(at);
        }
        Ok(())
    }

    async fn delete_backup(&self, id: i64) -> Result<()> {
        self.state.lock().backups.retain(|b| b.id != id);
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FakeDatabase {
    async fn append_history(&self, entry: NewHistoryEntry) -> Result<OptimizationHistoryEntry> {
        let mut state = self.state.lock();
        if state.fail_history {
            return Err(unavailable("history table is read-only"));
        }
        state.next_id += 1;
        let stored = OptimizationHistoryEntry {
            id: state.next_id,
            run_at: entry.run_at,
            risk_level: entry.risk_level,
            tables_affected: entry.tables_affected,
            performance_impact: entry.performance_impact,
            recommendations: entry.recommendations,
            optimization_actions: entry.optimization_actions,
            performance_snapshot: entry.performance_snapshot,
        };
        state.history.push(stored.clone());
        Ok(stored)
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<OptimizationHistoryEntry>> {
        let state = self.state.lock();
        if state.fail_history {
            return Err(unavailable("history table is read-only"));
        }
        Ok(state.history.iter().rev().take(limit).cloned().collect())
    }
}
