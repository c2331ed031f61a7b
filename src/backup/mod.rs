//! Snapshots of the tables an optimization run may touch, written as
//! restorable SQL scripts and tracked in the backup catalog.

pub mod script;

use crate::config::{OptimizerSettings, RiskLevel};
use crate::db::{Database, DbError, ExportColumn, IndexRow};
use crate::identifier::SafeIdent;
use crate::models::{BackupRecord, BackupResult, NewBackupRecord, RestoreOutcome};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use script::CHUNK_ROWS;
use snafu::{ResultExt, Snafu};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BackupError {
    #[snafu(display("Could not create backup directory {}: {}", path.display(), source))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Could not write backup file {}: {}", path.display(), source))]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to list tables for backup: {}", source))]
    ListTables { source: DbError },

    #[snafu(display("No tables found to back up"))]
    NoTables,

    #[snafu(display("Failed to export {}: {}", table, source))]
    Export { table: String, source: DbError },

    #[snafu(display(
        "Cannot export {}: column {:?} is not a safe identifier",
        table,
        column
    ))]
    UnsafeColumn { table: String, column: String },

    #[snafu(display("Backup catalog error: {}", source))]
    Catalog { source: DbError },
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RestoreError {
    #[snafu(display("Backup {} not found", id))]
    NotFound { id: i64 },

    #[snafu(display("Backup file not found: {}", path.display()))]
    FileMissing { path: PathBuf },

    #[snafu(display("Could not read backup file {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Restore stopped at statement {}: {}", index + 1, message))]
    Statement { index: usize, message: String },

    #[snafu(display("Backup catalog error: {}", source))]
    RestoreCatalog { source: DbError },
}

type Result<T, E = BackupError> = std::result::Result<T, E>;

/// Creates, restores, lists and prunes backups for one database.
pub struct BackupManager<'a, D: ?Sized> {
    db: &'a D,
    settings: &'a OptimizerSettings,
}

impl<'a, D> BackupManager<'a, D>
where
    D: Database + ?Sized,
{
    pub fn new(db: &'a D, settings: &'a OptimizerSettings) -> Self {
        Self { db, settings }
    }

    /// All eligible tables at `high`; the core tables otherwise.
    pub async fn tables_to_backup(&self, risk_level: RiskLevel) -> Result<Vec<SafeIdent>> {
        let core = self.settings.core_tables();
        let names = self
            .db
            .list_tables(&self.settings.table_prefix)
            .await
            .context(ListTablesSnafu)?;

        Ok(names
            .into_iter()
            .filter(|name| !self.settings.is_excluded(name))
            .filter(|name| risk_level == RiskLevel::High || core.contains(name))
            .filter_map(|name| match SafeIdent::parse(&name) {
                Ok(ident) => Some(ident),
                Err(err) => {
                    warn!("Not backing up table: {err}");
                    None
                }
            })
            .collect())
    }

    pub async fn create_backup(&self, risk_level: RiskLevel) -> Result<BackupResult> {
        let dir = &self.settings.backup_dir;
        fs::create_dir_all(dir).context(CreateDirSnafu { path: dir })?;

        let tables = self.tables_to_backup(risk_level).await?;
        if tables.is_empty() {
            return NoTablesSnafu.fail();
        }

        let now = Utc::now();
        let filename = unique_filename(dir, risk_level, now);
        let path = dir.join(&filename);
        let partial = dir.join(format!("{filename}.partial"));
        info!("Writing backup of {} tables to {}", tables.len(), path.display());

        if let Err(err) = self.write_script(&partial, &tables, now).await {
            if let Err(cleanup) = fs::remove_file(&partial) {
                debug!("Partial backup {} not removed: {cleanup}", partial.display());
            }
            return Err(err);
        }
        fs::rename(&partial, &path).context(WriteFileSnafu { path: &path })?;
        let byte_size = fs::metadata(&path)
            .context(WriteFileSnafu { path: &path })?
            .len();

        let record = NewBackupRecord {
            filename: filename.clone(),
            filepath: path.display().to_string(),
            created_at: now,
            risk_level,
            byte_size,
            tables: tables.iter().map(|t| t.to_string()).collect(),
        };
        let stored = match self.db.insert_backup(record).await {
            Ok(stored) => stored,
            Err(source) => {
                if let Err(cleanup) = fs::remove_file(&path) {
                    warn!("Unrecorded backup {} not removed: {cleanup}", path.display());
                }
                return Err(BackupError::Catalog { source });
            }
        };

        if let Err(err) = self.prune().await {
            warn!("Backup pruning skipped: {err}");
        }

        info!("Backup {} created ({} bytes)", stored.filename, byte_size);
        Ok(BackupResult {
            success: true,
            backup_id: stored.id,
            filename: stored.filename,
            filepath: stored.filepath,
            byte_size,
            table_count: stored.table_count,
        })
    }

    async fn write_script(
        &self,
        path: &Path,
        tables: &[SafeIdent],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let file = File::create(path).context(WriteFileSnafu { path })?;
        let mut out = BufWriter::new(file);

        let version = self.db.server_version().await.ok();
        write!(out, "{}{}", script::header(now, version.as_deref()), script::PREAMBLE)
            .context(WriteFileSnafu { path })?;

        for table in tables {
            self.write_table(&mut out, path, table).await?;
        }

        out.write_all(script::FOOTER.as_bytes())
            .context(WriteFileSnafu { path })?;
        out.flush().context(WriteFileSnafu { path })?;
        out.get_ref().sync_all().context(WriteFileSnafu { path })?;
        Ok(())
    }

    async fn write_table(
        &self,
        out: &mut BufWriter<File>,
        path: &Path,
        table: &SafeIdent,
    ) -> Result<()> {
        let name = table.as_str();
        let create = self
            .db
            .show_create_table(table)
            .await
            .context(ExportSnafu { table: name })?;
        out.write_all(script::table_definition(table, &create).as_bytes())
            .context(WriteFileSnafu { path })?;

        let columns = self
            .db
            .columns(table)
            .await
            .context(ExportSnafu { table: name })?;
        let mut export = Vec::with_capacity(columns.len());
        for column in &columns {
            let ident = SafeIdent::parse(&column.name).map_err(|_| BackupError::UnsafeColumn {
                table: name.to_string(),
                column: column.name.clone(),
            })?;
            export.push(ExportColumn {
                name: ident,
                binary: column.is_binary(),
            });
        }
        let column_names: Vec<SafeIdent> = export.iter().map(|c| c.name.clone()).collect();

        let indexes = self
            .db
            .indexes(table)
            .await
            .context(ExportSnafu { table: name })?;
        let order_by = primary_key(&indexes);

        let mut offset = 0;
        loop {
            let rows = self
                .db
                .fetch_rows(table, &export, &order_by, CHUNK_ROWS, offset)
                .await
                .context(ExportSnafu { table: name })?;
            if !rows.is_empty() {
                out.write_all(script::insert_statement(table, &column_names, &rows).as_bytes())
                    .context(WriteFileSnafu { path })?;
            }
            if rows.len() < CHUNK_ROWS {
                break;
            }
            offset += CHUNK_ROWS;
        }
        Ok(())
    }

    /// Keeps the newest `max_backups` records; older files and records go.
    pub async fn prune(&self) -> Result<usize> {
        let backups = self.db.list_backups(None).await.context(CatalogSnafu)?;
        let mut removed = 0;
        for old in backups.iter().skip(self.settings.max_backups) {
            let path = Path::new(&old.filepath);
            if path.exists() {
                if let Err(err) = fs::remove_file(path) {
                    warn!("Could not delete old backup file {}: {err}", path.display());
                }
            }
            self.db.delete_backup(old.id).await.context(CatalogSnafu)?;
            debug!("Pruned backup {}", old.filename);
            removed += 1;
        }
        Ok(removed)
    }

    pub async fn get_backup_history(&self, limit: Option<usize>) -> Result<Vec<BackupRecord>> {
        self.db.list_backups(limit).await.context(CatalogSnafu)
    }

    /// Replays a stored script. Stops at the first failing statement; nothing is rolled back.
    pub async fn restore_backup(&self, id: i64) -> std::result::Result<RestoreOutcome, RestoreError> {
        let record = self
            .db
            .get_backup(id)
            .await
            .context(RestoreCatalogSnafu)?
            .ok_or(RestoreError::NotFound { id })?;

        let path = PathBuf::from(&record.filepath);
        if !path.is_file() {
            return FileMissingSnafu { path }.fail();
        }
        let content = fs::read_to_string(&path).context(ReadSnafu { path: &path })?;
        let statements = script::split_statements(&content);
        info!("Restoring {} ({} statements)", record.filename, statements.len());

        let executed = match self.db.execute_script(&statements).await {
            Ok(executed) => executed,
            Err(DbError::Script { index, message }) => {
                return StatementSnafu { index, message }.fail();
            }
            Err(source) => return Err(RestoreError::RestoreCatalog { source }),
        };

        self.db
            .mark_restored(id, Utc::now())
            .await
            .context(RestoreCatalogSnafu)?;

        Ok(RestoreOutcome {
            success: true,
            message: format!("Backup {} restored", record.filename),
            statements_executed: executed,
        })
    }
}

/// Columns of the primary key in key order, for stable paging.
fn primary_key(indexes: &[IndexRow]) -> Vec<SafeIdent> {
    indexes
        .iter()
        .filter(|row| row.key_name == "PRIMARY")
        .sorted_by_key(|row| row.seq_in_index)
        .filter_map(|row| SafeIdent::parse(&row.column_name).ok())
        .collect()
}

/// `dbmedic-backup_<risk>_<timestamp>.sql`, suffixed `-N` when taken.
pub fn unique_filename(dir: &Path, risk_level: RiskLevel, at: DateTime<Utc>) -> String {
    let stem = format!(
        "dbmedic-backup_{}_{}",
        risk_level.as_str(),
        at.format("%Y-%m-%d_%H-%M-%S")
    );
    let taken = |name: &str| dir.join(name).exists() || dir.join(format!("{name}.partial")).exists();

    let first = format!("{stem}.sql");
    if !taken(&first) {
        return first;
    }
    (1..)
        .map(|n| format!("{stem}-{n}.sql"))
        .find(|name| !taken(name))
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{sql, BackupCatalog, SqlValue};
    use crate::testing::{FakeDatabase, FakeTable};
    use chrono::TimeZone;

    fn settings(dir: &Path) -> OptimizerSettings {
        OptimizerSettings {
            backup_dir: dir.join("backups"),
            ..Default::default()
        }
    }

    fn options_table(rows: usize) -> FakeTable {
        FakeTable::innodb()
            .columns(&[("option_id", "bigint"), ("option_name", "varchar"), ("option_value", "longtext")])
            .index("PRIMARY", &["option_id"])
            .rows(
                (0..rows)
                    .map(|i| {
                        vec![
                            SqlValue::Text(i.to_string()),
                            SqlValue::Text(format!("opt_{i}")),
                            SqlValue::Text("it's; here".into()),
                        ]
                    })
                    .collect(),
            )
    }

    fn database() -> FakeDatabase {
        FakeDatabase::new()
            .with_table("wp_options", options_table(2500))
            .with_table("wp_posts", FakeTable::innodb().columns(&[("ID", "bigint")]))
            .with_table("wp_redirects", FakeTable::innodb().columns(&[("id", "bigint")]))
            .with_table("wp_bad-name", FakeTable::innodb())
    }

    #[test]
    fn filename_gets_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 5).unwrap();
        let first = unique_filename(dir.path(), RiskLevel::Medium, at);
        assert_eq!(first, "dbmedic-backup_medium_2026-10-19_08-30-05.sql");
        fs::write(dir.path().join(&first), "").unwrap();
        assert_eq!(
            unique_filename(dir.path(), RiskLevel::Medium, at),
            "dbmedic-backup_medium_2026-10-19_08-30-05-1.sql"
        );
    }

    #[tokio::test]
    async fn medium_backup_covers_core_tables_only() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();
        let manager = BackupManager::new(&db, &settings);

        let result = manager.create_backup(RiskLevel::Medium).await.unwrap();
        assert!(result.success);
        assert_eq!(result.table_count, 2);

        let content = fs::read_to_string(&result.filepath).unwrap();
        assert!(content.starts_with("-- dbmedic backup"));
        assert!(content.contains("DROP TABLE IF EXISTS `wp_options`;"));
        assert!(!content.contains("wp_redirects"));
        assert_eq!(content.matches("INSERT INTO `wp_options`").count(), 3);
        assert!(content.trim_end().ends_with("SET FOREIGN_KEY_CHECKS=1;"));
        assert_eq!(result.byte_size, content.len() as u64);
        assert!(db.statements().iter().any(|s| s.contains("ORDER BY `option_id`")));
    }

    #[tokio::test]
    async fn high_backup_covers_every_safe_table() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();
        let manager = BackupManager::new(&db, &settings);

        let result = manager.create_backup(RiskLevel::High).await.unwrap();
        assert_eq!(result.table_count, 3);
        let record = db.get_backup(result.backup_id).await.unwrap().unwrap();
        assert!(record.tables.contains(&"wp_redirects".to_string()));
        assert!(db.statements().iter().all(|s| !s.contains("bad-name")));
    }

    #[tokio::test]
    async fn unwritable_directory_fails_without_record() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "").unwrap();
        let settings = OptimizerSettings {
            backup_dir: blocker.join("backups"),
            ..Default::default()
        };
        let db = database();

        let err = BackupManager::new(&db, &settings)
            .create_backup(RiskLevel::High)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::CreateDir { .. }));
        assert!(db.state().backups.is_empty());
    }

    #[tokio::test]
    async fn failed_export_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();
        db.state().fail_metadata.insert("wp_posts".into());

        let err = BackupManager::new(&db, &settings)
            .create_backup(RiskLevel::Medium)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Export { .. }));
        assert_eq!(fs::read_dir(&settings.backup_dir).unwrap().count(), 0);
        assert!(db.state().backups.is_empty());
    }

    #[tokio::test]
    async fn unsafe_column_names_the_table_and_column() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database().with_table(
            "wp_posts",
            FakeTable::innodb().columns(&[("ID", "bigint"), ("post title", "text")]),
        );

        let err = BackupManager::new(&db, &settings)
            .create_backup(RiskLevel::Medium)
            .await
            .unwrap_err();
        match &err {
            BackupError::UnsafeColumn { table, column } => {
                assert_eq!(table, "wp_posts");
                assert_eq!(column, "post title");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.to_string(),
            "Cannot export wp_posts: column \"post title\" is not a safe identifier"
        );
        assert_eq!(fs::read_dir(&settings.backup_dir).unwrap().count(), 0);
        assert!(db.state().backups.is_empty());
    }

    #[tokio::test]
    async fn retention_keeps_newest_records_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let settings = OptimizerSettings {
            max_backups: 2,
            ..settings(dir.path())
        };
        let db = database();
        let manager = BackupManager::new(&db, &settings);

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(manager.create_backup(RiskLevel::Low).await.unwrap().backup_id);
        }

        let remaining: Vec<i64> = manager
            .get_backup_history(None)
            .await
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(remaining, vec![ids[4], ids[3]]);
        assert_eq!(fs::read_dir(&settings.backup_dir).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn restore_unknown_id_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();

        let err = BackupManager::new(&db, &settings)
            .restore_backup(404)
            .await
            .unwrap_err();
        assert!(matches!(err, RestoreError::NotFound { id: 404 }));
        assert_eq!(err.to_string(), "Backup 404 not found");
        assert!(db.statements().is_empty());
    }

    #[tokio::test]
    async fn restore_replays_script_and_flags_record() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();
        let manager = BackupManager::new(&db, &settings);
        let backup = manager.create_backup(RiskLevel::Medium).await.unwrap();
        db.clear_statements();

        let outcome = manager.restore_backup(backup.backup_id).await.unwrap();
        assert!(outcome.success);
        let executed = db.statements();
        assert_eq!(executed[0], sql::SAVE_SESSION);
        let script = &executed[1..executed.len() - 3];
        assert_eq!(script.len(), outcome.statements_executed);
        assert_eq!(script[0], "SET FOREIGN_KEY_CHECKS=0");
        assert!(script.iter().any(|s| s.contains("'it\\'s; here'")));
        assert_eq!(executed[executed.len() - 3..], sql::finish_script(false));
        assert!(!executed.iter().any(|s| s == sql::ROLLBACK));
        assert!(db.state().session.is_default());
        let record = db.get_backup(backup.backup_id).await.unwrap().unwrap();
        assert!(record.restored);
        assert!(record.restored_at.is_some());
    }

    #[tokio::test]
    async fn restore_stops_at_first_failing_statement() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();
        let manager = BackupManager::new(&db, &settings);
        let backup = manager.create_backup(RiskLevel::Medium).await.unwrap();
        db.clear_statements();
        db.state().fail_script_at = Some(4);

        let err = manager.restore_backup(backup.backup_id).await.unwrap_err();
        assert!(matches!(err, RestoreError::Statement { index: 4, .. }));
        let executed = db.statements();
        assert_eq!(executed.len(), 1 + 4 + 4);
        assert_eq!(
            executed[1..5],
            [
                "SET FOREIGN_KEY_CHECKS=0",
                "SET SQL_MODE='NO_AUTO_VALUE_ON_ZERO'",
                "SET AUTOCOMMIT=0",
                "START TRANSACTION",
            ]
        );
        assert_eq!(executed[5..], sql::finish_script(true));
        assert!(!db.get_backup(backup.backup_id).await.unwrap().unwrap().restored);
    }

    #[tokio::test]
    async fn failed_restore_leaves_the_session_at_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();
        let manager = BackupManager::new(&db, &settings);
        let backup = manager.create_backup(RiskLevel::Medium).await.unwrap();
        db.state().fail_script_at = Some(6);

        manager.restore_backup(backup.backup_id).await.unwrap_err();

        let session = db.state().session.clone();
        assert!(session.autocommit);
        assert!(session.foreign_key_checks);
        assert!(!session.sql_mode_overridden);
        assert!(!session.in_transaction);
    }

    #[tokio::test]
    async fn restore_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let db = database();
        let manager = BackupManager::new(&db, &settings);
        let backup = manager.create_backup(RiskLevel::Medium).await.unwrap();
        fs::remove_file(&backup.filepath).unwrap();

        let err = manager.restore_backup(backup.backup_id).await.unwrap_err();
        assert!(matches!(err, RestoreError::FileMissing { .. }));
    }
}
