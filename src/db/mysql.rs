use super::{
    sql, BackupCatalog, ColumnInfo, ConnectionSnafu, DatabaseFootprint, DbError, DecodeSnafu,
    EncodeSnafu, ExportColumn, HistoryStore, IndexRow, InvalidNameSnafu, Maintenance,
    MetadataSource, QuerySnafu, Result, SqlValue, TableIoStats, TableStatus,
};
use crate::config::{DbConfig, OptimizerSettings, RiskLevel};
use crate::identifier::SafeIdent;
use crate::models::{
    BackupRecord, NewBackupRecord, NewHistoryEntry, OptimizationHistoryEntry, SlowQuerySample,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;
use snafu::ResultExt;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Pool, Row};
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DELETE_CHUNK: usize = 500;

pub struct MySqlDatabase {
    pool: Pool<MySql>,
    backup_table: SafeIdent,
    history_table: SafeIdent,
    lock_conn: Mutex<Option<PoolConnection<MySql>>>,
}

impl MySqlDatabase {
    pub async fn connect(config: &DbConfig, settings: &OptimizerSettings) -> Result<Self> {
        info!("Connecting to MySQL at {}:{}", config.host, config.port);

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(&config.connection_string())
            .await
            .context(ConnectionSnafu)?;

        info!("Successfully connected to database: {}", config.database);

        let db = Self {
            pool,
            backup_table: SafeIdent::parse(&settings.backup_history_table())
                .context(InvalidNameSnafu)?,
            history_table: SafeIdent::parse(&settings.optimization_history_table())
                .context(InvalidNameSnafu)?,
            lock_conn: Mutex::new(None),
        };
        db.ensure_record_tables().await?;
        Ok(db)
    }

    async fn ensure_record_tables(&self) -> Result<()> {
        let backups = format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT,
                filename VARCHAR(255) NOT NULL,
                filepath TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                risk_level VARCHAR(16) NOT NULL,
                byte_size BIGINT UNSIGNED NOT NULL DEFAULT 0,
                table_count INT UNSIGNED NOT NULL DEFAULT 0,
                tables LONGTEXT NOT NULL,
                restored TINYINT(1) NOT NULL DEFAULT 0,
                restored_at DATETIME NULL,
                PRIMARY KEY (id),
                KEY created_at (created_at),
                KEY risk_level (risk_level)
            ) DEFAULT CHARSET=utf8mb4"#,
            self.backup_table.quoted()
        );
        let history = format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT,
                run_at DATETIME NOT NULL,
                risk_level VARCHAR(16) NOT NULL,
                tables_affected LONGTEXT NOT NULL,
                performance_impact DOUBLE NOT NULL DEFAULT 0,
                recommendations LONGTEXT NOT NULL,
                optimization_actions LONGTEXT NOT NULL,
                performance_data LONGTEXT NULL,
                PRIMARY KEY (id),
                KEY run_at (run_at)
            ) DEFAULT CHARSET=utf8mb4"#,
            self.history_table.quoted()
        );

        for statement in [backups, history] {
            sqlx::raw_sql(&statement)
                .execute(&self.pool)
                .await
                .context(QuerySnafu { query: &statement })?;
        }
        debug!("Record tables are in place");
        Ok(())
    }

    async fn select_ids(&self, query: &str, bind: Option<i64>) -> Result<Vec<i64>> {
        let mut q = sqlx::query(query);
        if let Some(value) = bind {
            q = q.bind(value);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query })?;
        Ok(rows.iter().map(|row| row.get::<i64, _>("id")).collect())
    }

    async fn delete_ids(&self, table: &SafeIdent, column: &SafeIdent, ids: &[i64]) -> Result<u64> {
        let mut removed = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let statement = sql::delete_by_ids(table, column, chunk.len());
            let mut q = sqlx::query(&statement);
            for id in chunk {
                q = q.bind(*id);
            }
            let result = q
                .execute(&self.pool)
                .await
                .context(QuerySnafu { query: &statement })?;
            removed += result.rows_affected();
        }
        Ok(removed)
    }

    /// Removes posts plus their meta rows.
    async fn delete_posts(&self, posts: &SafeIdent, postmeta: &SafeIdent, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let post_id = SafeIdent::parse("post_id").context(InvalidNameSnafu)?;
        let id = SafeIdent::parse("ID").context(InvalidNameSnafu)?;
        self.delete_ids(postmeta, &post_id, ids).await?;
        self.delete_ids(posts, &id, ids).await
    }

    async fn scalar_u64(&self, query: &str) -> Result<u64> {
        let value: i64 = sqlx::query_scalar(query)
            .fetch_one(&self.pool)
            .await
            .context(QuerySnafu { query })?;
        Ok(value.max(0) as u64)
    }

    async fn key_values(&self, query: &str, names: &[&str]) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query })?;

        let mut values = BTreeMap::new();
        for row in rows {
            let (Some(name), Some(value)) = (text_at(&row, 0), text_at(&row, 1)) else {
                continue;
            };
            if names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                values.insert(name, value);
            }
        }
        Ok(values)
    }
}

/// SHOW statements return VARCHAR or VARBINARY depending on server version.
fn text_at(row: &MySqlRow, index: usize) -> Option<String> {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value;
    }
    row.try_get::<Option<Vec<u8>>, _>(index)
        .ok()
        .flatten()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn non_negative(value: Option<i64>) -> u64 {
    value.unwrap_or(0).max(0) as u64
}

fn parse_risk(value: &str) -> RiskLevel {
    RiskLevel::from_str(value, true).unwrap_or_default()
}

#[async_trait]
impl MetadataSource for MySqlDatabase {
    async fn list_tables(&self, prefix: &str) -> Result<Vec<String>> {
        const QUERY: &str = r#"
            SELECT CAST(TABLE_NAME AS CHAR) AS table_name
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE()
              AND TABLE_TYPE = 'BASE TABLE'
              AND TABLE_NAME LIKE ?
            ORDER BY TABLE_NAME
        "#;

        let rows = sqlx::query(QUERY)
            .bind(sql::like_prefix(prefix))
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(rows
            .iter()
            .map(|row| row.get::<String, _>("table_name"))
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    async fn table_status(&self, table: &SafeIdent) -> Result<Option<TableStatus>> {
        const QUERY: &str = r#"
            SELECT
                CAST(ENGINE AS CHAR) AS engine,
                CAST(TABLE_ROWS AS SIGNED) AS table_rows,
                CAST(DATA_LENGTH AS SIGNED) AS data_length,
                CAST(INDEX_LENGTH AS SIGNED) AS index_length,
                CAST(DATA_FREE AS SIGNED) AS data_free,
                CAST(TABLE_COLLATION AS CHAR) AS collation
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
        "#;

        let row = sqlx::query(QUERY)
            .bind(table.as_str())
            .fetch_optional(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(row.map(|row| TableStatus {
            engine: row.get("engine"),
            rows: non_negative(row.get("table_rows")),
            data_length: non_negative(row.get("data_length")),
            index_length: non_negative(row.get("index_length")),
            data_free: non_negative(row.get("data_free")),
            collation: row.get("collation"),
        }))
    }

    async fn indexes(&self, table: &SafeIdent) -> Result<Vec<IndexRow>> {
        const QUERY: &str = r#"
            SELECT
                CAST(INDEX_NAME AS CHAR) AS key_name,
                CAST(COLUMN_NAME AS CHAR) AS column_name,
                CAST(SEQ_IN_INDEX AS SIGNED) AS seq_in_index,
                CAST(NON_UNIQUE AS SIGNED) AS non_unique
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
        "#;

        let rows = sqlx::query(QUERY)
            .bind(table.as_str())
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                // Functional index parts have no column name.
                let column_name: Option<String> = row.get("column_name");
                Some(IndexRow {
                    key_name: row.get("key_name"),
                    column_name: column_name?,
                    seq_in_index: row.get::<i64, _>("seq_in_index").max(0) as u32,
                    non_unique: row.get::<i64, _>("non_unique") != 0,
                })
            })
            .collect())
    }

    async fn columns(&self, table: &SafeIdent) -> Result<Vec<ColumnInfo>> {
        const QUERY: &str = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR) AS column_name,
                CAST(DATA_TYPE AS CHAR) AS data_type,
                CAST(COLUMN_TYPE AS CHAR) AS column_type
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows = sqlx::query(QUERY)
            .bind(table.as_str())
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("column_name"),
                data_type: row.get("data_type"),
                column_type: row.get("column_type"),
            })
            .collect())
    }

    async fn sample_long_value(
        &self,
        table: &SafeIdent,
        column: &SafeIdent,
        min_len: usize,
    ) -> Result<Option<Vec<u8>>> {
        let query = sql::sample_long_value(table, column);
        let row = sqlx::query(&query)
            .bind(min_len as i64)
            .fetch_optional(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        Ok(row.and_then(|row| row.get::<Option<Vec<u8>>, _>("sample")))
    }

    async fn server_version(&self) -> Result<String> {
        const QUERY: &str = "SELECT CAST(VERSION() AS CHAR)";
        sqlx::query_scalar(QUERY)
            .fetch_one(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })
    }

    async fn server_variables(&self, names: &[&str]) -> Result<BTreeMap<String, String>> {
        self.key_values("SHOW GLOBAL VARIABLES", names).await
    }

    async fn server_status(&self, names: &[&str]) -> Result<BTreeMap<String, String>> {
        self.key_values("SHOW GLOBAL STATUS", names).await
    }

    async fn running_queries(
        &self,
        min_seconds: u64,
        limit: usize,
    ) -> Result<Vec<SlowQuerySample>> {
        const QUERY: &str = r#"
            SELECT
                CAST(INFO AS CHAR) AS query,
                CAST(TIME AS SIGNED) AS time,
                CAST(DB AS CHAR) AS db
            FROM information_schema.PROCESSLIST
            WHERE COMMAND <> 'Sleep' AND INFO IS NOT NULL AND TIME > ?
            ORDER BY TIME DESC
            LIMIT ?
        "#;

        let rows = sqlx::query(QUERY)
            .bind(min_seconds as i64)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let query: Option<String> = row.get("query");
                Some(SlowQuerySample {
                    query: query?,
                    time_seconds: row.get::<i64, _>("time") as f64,
                    db: row.get("db"),
                })
            })
            .collect())
    }

    async fn table_io_stats(&self) -> Result<Vec<TableIoStats>> {
        // Timer columns are in picoseconds.
        const QUERY: &str = r#"
            SELECT
                CAST(OBJECT_NAME AS CHAR) AS table_name,
                CAST(COUNT_STAR AS SIGNED) AS query_count,
                CAST(SUM_TIMER_WAIT DIV 1000000 AS SIGNED) AS wait_us
            FROM performance_schema.table_io_waits_summary_by_table
            WHERE OBJECT_SCHEMA = DATABASE()
        "#;

        let rows = sqlx::query(QUERY)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(rows
            .iter()
            .map(|row| TableIoStats {
                table: row.get("table_name"),
                query_count: non_negative(row.get("query_count")),
                total_time_seconds: non_negative(row.get("wait_us")) as f64 / 1_000_000.0,
            })
            .collect())
    }

    async fn count_expired_cache_entries(
        &self,
        options: &SafeIdent,
        now_unix: i64,
    ) -> Result<u64> {
        let query = sql::count_expired_cache_entries(options);
        let value: i64 = sqlx::query_scalar(&query)
            .bind(now_unix)
            .fetch_one(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        Ok(value.max(0) as u64)
    }

    async fn count_revisions(&self, posts: &SafeIdent) -> Result<u64> {
        self.scalar_u64(&sql::count_revisions(posts)).await
    }

    async fn autoload_bytes(&self, options: &SafeIdent) -> Result<u64> {
        self.scalar_u64(&sql::autoload_bytes(options)).await
    }

    async fn show_create_table(&self, table: &SafeIdent) -> Result<String> {
        let query = sql::show_create_table(table);
        let row = sqlx::query(&query)
            .fetch_one(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        text_at(&row, 1).ok_or_else(|| DbError::Unavailable {
            message: format!("no definition returned for {}", table),
        })
    }

    async fn fetch_rows(
        &self,
        table: &SafeIdent,
        columns: &[ExportColumn],
        order_by: &[SafeIdent],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Vec<SqlValue>>> {
        let query = sql::select_export(table, columns, order_by);
        let rows = sqlx::query(&query)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;

        Ok(rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, column)| match text_at(row, i) {
                        None => SqlValue::Null,
                        Some(value) if column.binary => SqlValue::Hex(value),
                        Some(value) => SqlValue::Text(value),
                    })
                    .collect()
            })
            .collect())
    }

    async fn database_footprint(&self, prefix: &str) -> Result<DatabaseFootprint> {
        const QUERY: &str = r#"
            SELECT
                CAST(COALESCE(SUM(DATA_LENGTH + INDEX_LENGTH), 0) AS SIGNED) AS total_bytes,
                CAST(COUNT(*) AS SIGNED) AS table_count
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME LIKE ?
        "#;

        let row = sqlx::query(QUERY)
            .bind(sql::like_prefix(prefix))
            .fetch_one(&self.pool)
            .await
            .context(QuerySnafu { query: QUERY })?;

        Ok(DatabaseFootprint {
            total_bytes: non_negative(row.get("total_bytes")),
            table_count: non_negative(row.get("table_count")),
        })
    }
}

#[async_trait]
impl Maintenance for MySqlDatabase {
    async fn optimize_table(&self, table: &SafeIdent) -> Result<()> {
        let statement = sql::optimize_table(table);
        sqlx::raw_sql(&statement)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query: &statement })?;
        Ok(())
    }

    async fn convert_to_innodb(&self, table: &SafeIdent) -> Result<()> {
        let statement = sql::convert_to_innodb(table);
        sqlx::raw_sql(&statement)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query: &statement })?;
        Ok(())
    }

    async fn add_index(
        &self,
        table: &SafeIdent,
        index_name: &SafeIdent,
        columns: &[SafeIdent],
    ) -> Result<()> {
        let statement = sql::add_index(table, index_name, columns);
        sqlx::raw_sql(&statement)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query: &statement })?;
        Ok(())
    }

    async fn purge_expired_cache_entries(
        &self,
        options: &SafeIdent,
        now_unix: i64,
    ) -> Result<u64> {
        let select = sql::expired_cache_entries(options);
        let rows = sqlx::query(&select)
            .bind(now_unix)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: &select })?;

        let delete = sql::delete_option_pair(options);
        let mut removed = 0;
        for row in rows {
            let timeout_name: String = row.get("option_name");
            let value_name = timeout_name.replacen("_transient_timeout_", "_transient_", 1);
            sqlx::query(&delete)
                .bind(&timeout_name)
                .bind(&value_name)
                .execute(&self.pool)
                .await
                .context(QuerySnafu { query: &delete })?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn purge_old_revisions(
        &self,
        posts: &SafeIdent,
        postmeta: &SafeIdent,
        keep: u32,
    ) -> Result<u64> {
        let ids = self
            .select_ids(&sql::surplus_revisions(posts), Some(keep as i64))
            .await?;
        self.delete_posts(posts, postmeta, &ids).await
    }

    async fn purge_drafts_and_trash(&self, posts: &SafeIdent, postmeta: &SafeIdent) -> Result<u64> {
        let ids = self.select_ids(&sql::drafts_and_trash(posts), None).await?;
        self.delete_posts(posts, postmeta, &ids).await
    }

    async fn execute_script(&self, statements: &[String]) -> Result<usize> {
        let mut conn = self.pool.acquire().await.context(ConnectionSnafu)?;
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql::SAVE_SESSION))
            .await
            .context(QuerySnafu {
                query: sql::SAVE_SESSION,
            })?;

        let mut outcome = Ok(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            if let Err(err) = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement)).await {
                outcome = Err(DbError::Script {
                    index,
                    message: err.to_string(),
                });
                break;
            }
        }

        // The script turns off autocommit and FK checks for its session;
        // that session must not go back to the pool half-configured.
        let mut reset = true;
        for statement in sql::finish_script(outcome.is_err()) {
            if let Err(err) = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement)).await {
                warn!("Session reset failed at `{statement}`: {err}");
                reset = false;
                break;
            }
        }
        if !reset {
            debug!("Closing restore connection instead of returning it to the pool");
            if let Err(err) = sqlx::Connection::close(conn.detach()).await {
                debug!("Restore connection did not close cleanly: {err}");
            }
        }
        outcome
    }

    async fn try_acquire_run_lock(&self, name: &str) -> Result<bool> {
        const QUERY: &str = "SELECT CAST(GET_LOCK(?, 0) AS SIGNED)";
        let mut conn = self.pool.acquire().await.context(ConnectionSnafu)?;
        let acquired: Option<i64> = sqlx::query_scalar(QUERY)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .context(QuerySnafu { query: QUERY })?;

        if acquired == Some(1) {
            // The lock lives as long as this session.
            *self.lock_conn.lock().await = Some(conn);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_run_lock(&self, name: &str) -> Result<()> {
        const QUERY: &str = "SELECT CAST(RELEASE_LOCK(?) AS SIGNED)";
        let Some(mut conn) = self.lock_conn.lock().await.take() else {
            return Ok(());
        };
        let _: Option<i64> = sqlx::query_scalar(QUERY)
            .bind(name)
            .fetch_one(&mut *conn)
            .await
            .context(QuerySnafu { query: QUERY })?;
        Ok(())
    }
}

fn backup_from_row(row: &MySqlRow) -> Result<BackupRecord> {
    let id: i64 = row.get("id");
    let tables: String = row.get("tables");
    let created_at: NaiveDateTime = row.get("created_at");
    let restored_at: Option<NaiveDateTime> = row.get("restored_at");
    let risk_level: String = row.get("risk_level");

    Ok(BackupRecord {
        id,
        filename: row.get("filename"),
        filepath: row.get("filepath"),
        created_at: created_at.and_utc(),
        risk_level: parse_risk(&risk_level),
        byte_size: non_negative(row.get("byte_size")),
        table_count: non_negative(row.get("table_count")) as usize,
        tables: serde_json::from_str(&tables).context(DecodeSnafu { id })?,
        restored: row.get::<i64, _>("restored") != 0,
        restored_at: restored_at.map(|at| at.and_utc()),
    })
}

fn history_from_row(row: &MySqlRow) -> Result<OptimizationHistoryEntry> {
    let id: i64 = row.get("id");
    let run_at: NaiveDateTime = row.get("run_at");
    let risk_level: String = row.get("risk_level");
    let tables_affected: String = row.get("tables_affected");
    let recommendations: String = row.get("recommendations");
    let actions: String = row.get("optimization_actions");
    let snapshot: Option<String> = row.get("performance_data");

    Ok(OptimizationHistoryEntry {
        id,
        run_at: run_at.and_utc(),
        risk_level: parse_risk(&risk_level),
        tables_affected: serde_json::from_str(&tables_affected).context(DecodeSnafu { id })?,
        performance_impact: row.get("performance_impact"),
        recommendations: serde_json::from_str(&recommendations).context(DecodeSnafu { id })?,
        optimization_actions: serde_json::from_str(&actions).context(DecodeSnafu { id })?,
        performance_snapshot: match snapshot {
            Some(json) => serde_json::from_str(&json).context(DecodeSnafu { id })?,
            None => None,
        },
    })
}

const BACKUP_COLUMNS: &str = r#"
    CAST(id AS SIGNED) AS id,
    CAST(filename AS CHAR) AS filename,
    CAST(filepath AS CHAR) AS filepath,
    created_at,
    CAST(risk_level AS CHAR) AS risk_level,
    CAST(byte_size AS SIGNED) AS byte_size,
    CAST(table_count AS SIGNED) AS table_count,
    CAST(tables AS CHAR) AS tables,
    CAST(restored AS SIGNED) AS restored,
    restored_at
"#;

#[async_trait]
impl BackupCatalog for MySqlDatabase {
    async fn insert_backup(&self, record: NewBackupRecord) -> Result<BackupRecord> {
        let query = format!(
            "INSERT INTO {} (filename, filepath, created_at, risk_level, byte_size, table_count, tables) VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.backup_table.quoted()
        );
        let tables = serde_json::to_string(&record.tables).context(EncodeSnafu)?;
        let result = sqlx::query(&query)
            .bind(&record.filename)
            .bind(&record.filepath)
            .bind(record.created_at.naive_utc())
            .bind(record.risk_level.as_str())
            .bind(record.byte_size as i64)
            .bind(record.tables.len() as i64)
            .bind(tables)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;

        Ok(BackupRecord {
            id: result.last_insert_id() as i64,
            filename: record.filename,
            filepath: record.filepath,
            created_at: record.created_at,
            risk_level: record.risk_level,
            byte_size: record.byte_size,
            table_count: record.tables.len(),
            tables: record.tables,
            restored: false,
            restored_at: None,
        })
    }

    async fn list_backups(&self, limit: Option<usize>) -> Result<Vec<BackupRecord>> {
        let query = format!(
            "SELECT {} FROM {} ORDER BY created_at DESC, id DESC LIMIT ?",
            BACKUP_COLUMNS,
            self.backup_table.quoted()
        );
        let rows = sqlx::query(&query)
            .bind(limit.map(|l| l as i64).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn get_backup(&self, id: i64) -> Result<Option<BackupRecord>> {
        let query = format!(
            "SELECT {} FROM {} WHERE id = ?",
            BACKUP_COLUMNS,
            self.backup_table.quoted()
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        row.as_ref().map(backup_from_row).transpose()
    }

    async fn mark_restored(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let query = format!(
            "UPDATE {} SET restored = 1, restored_at = ? WHERE id = ?",
            self.backup_table.quoted()
        );
        sqlx::query(&query)
            .bind(at.naive_utc())
            .bind(id)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        Ok(())
    }

    async fn delete_backup(&self, id: i64) -> Result<()> {
        let query = format!("DELETE FROM {} WHERE id = ?", self.backup_table.quoted());
        sqlx::query(&query)
            .bind(id)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MySqlDatabase {
    async fn append_history(&self, entry: NewHistoryEntry) -> Result<OptimizationHistoryEntry> {
        let query = format!(
            "INSERT INTO {} (run_at, risk_level, tables_affected, performance_impact, recommendations, optimization_actions, performance_data) VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.history_table.quoted()
        );
        let tables = serde_json::to_string(&entry.tables_affected).context(EncodeSnafu)?;
        let recommendations = serde_json::to_string(&entry.recommendations).context(EncodeSnafu)?;
        let actions = serde_json::to_string(&entry.optimization_actions).context(EncodeSnafu)?;
        let snapshot = entry
            .performance_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context(EncodeSnafu)?;

        let result = sqlx::query(&query)
            .bind(entry.run_at.naive_utc())
            .bind(entry.risk_level.as_str())
            .bind(tables)
            .bind(entry.performance_impact)
            .bind(recommendations)
            .bind(actions)
            .bind(snapshot)
            .execute(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;

        Ok(OptimizationHistoryEntry {
            id: result.last_insert_id() as i64,
            run_at: entry.run_at,
            risk_level: entry.risk_level,
            tables_affected: entry.tables_affected,
            performance_impact: entry.performance_impact,
            recommendations: entry.recommendations,
            optimization_actions: entry.optimization_actions,
            performance_snapshot: entry.performance_snapshot,
        })
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<OptimizationHistoryEntry>> {
        let query = format!(
            r#"SELECT
                CAST(id AS SIGNED) AS id,
                run_at,
                CAST(risk_level AS CHAR) AS risk_level,
                CAST(tables_affected AS CHAR) AS tables_affected,
                performance_impact,
                CAST(recommendations AS CHAR) AS recommendations,
                CAST(optimization_actions AS CHAR) AS optimization_actions,
                CAST(performance_data AS CHAR) AS performance_data
            FROM {}
            ORDER BY run_at DESC, id DESC
            LIMIT ?"#,
            self.history_table.quoted()
        );
        let rows = sqlx::query(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .context(QuerySnafu { query: &query })?;
        rows.iter().map(history_from_row).collect()
    }
}
