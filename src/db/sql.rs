//! Statement builders. Identifiers come in as [`SafeIdent`] only; every
//! value is left as a `?` placeholder for the driver to bind.

use super::ExportColumn;
use crate::identifier::SafeIdent;
use itertools::Itertools;

pub fn optimize_table(table: &SafeIdent) -> String {
    format!("OPTIMIZE TABLE {}", table.quoted())
}

pub fn convert_to_innodb(table: &SafeIdent) -> String {
    format!("ALTER TABLE {} ENGINE=InnoDB", table.quoted())
}

pub fn add_index(table: &SafeIdent, index_name: &SafeIdent, columns: &[SafeIdent]) -> String {
    format!(
        "ALTER TABLE {} ADD INDEX {} ({})",
        table.quoted(),
        index_name.quoted(),
        quoted_list(columns)
    )
}

pub fn show_create_table(table: &SafeIdent) -> String {
    format!("SHOW CREATE TABLE {}", table.quoted())
}

pub fn drop_table_if_exists(table: &SafeIdent) -> String {
    format!("DROP TABLE IF EXISTS {}", table.quoted())
}

pub fn sample_long_value(table: &SafeIdent, column: &SafeIdent) -> String {
    format!(
        "SELECT CAST({col} AS BINARY) AS sample FROM {table} WHERE LENGTH({col}) > ? LIMIT 1",
        col = column.quoted(),
        table = table.quoted()
    )
}

/// Page of rows for export. Binary columns come back hex-encoded.
pub fn select_export(table: &SafeIdent, columns: &[ExportColumn], order_by: &[SafeIdent]) -> String {
    let select_list = columns
        .iter()
        .map(|c| {
            if c.binary {
                format!("HEX({})", c.name.quoted())
            } else {
                format!("CAST({} AS CHAR)", c.name.quoted())
            }
        })
        .join(", ");
    let mut statement = format!("SELECT {} FROM {}", select_list, table.quoted());
    if !order_by.is_empty() {
        statement.push_str(&format!(" ORDER BY {}", quoted_list(order_by)));
    }
    statement.push_str(" LIMIT ? OFFSET ?");
    statement
}

/// `INSERT INTO t (a, b) VALUES` with the row tuples left to the caller.
pub fn insert_prefix(table: &SafeIdent, columns: &[SafeIdent]) -> String {
    format!(
        "INSERT INTO {} ({}) VALUES",
        table.quoted(),
        quoted_list(columns)
    )
}

/// Timeout rows of cache entries that expired before the bound timestamp.
const EXPIRED_TIMEOUTS: &str =
    r#"option_name LIKE '\_transient\_timeout\_%' AND CAST(option_value AS UNSIGNED) < ?"#;

pub fn count_expired_cache_entries(options: &SafeIdent) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE {}",
        options.quoted(),
        EXPIRED_TIMEOUTS
    )
}

pub fn expired_cache_entries(options: &SafeIdent) -> String {
    format!(
        "SELECT CAST(option_name AS CHAR) AS option_name FROM {} WHERE {}",
        options.quoted(),
        EXPIRED_TIMEOUTS
    )
}

pub fn delete_option_pair(options: &SafeIdent) -> String {
    format!(
        "DELETE FROM {} WHERE option_name IN (?, ?)",
        options.quoted()
    )
}

pub fn count_revisions(posts: &SafeIdent) -> String {
    format!(
        "SELECT COUNT(*) FROM {} WHERE post_type = 'revision'",
        posts.quoted()
    )
}

pub fn autoload_bytes(options: &SafeIdent) -> String {
    format!(
        "SELECT CAST(COALESCE(SUM(LENGTH(option_value)), 0) AS SIGNED) FROM {} WHERE autoload IN ('yes', 'on', 'auto-on', 'auto')",
        options.quoted()
    )
}

/// Revisions ranked per parent, newest first; rows past `?` are surplus.
pub fn surplus_revisions(posts: &SafeIdent) -> String {
    format!(
        r#"SELECT CAST(ID AS SIGNED) AS id FROM (
            SELECT ID, ROW_NUMBER() OVER (PARTITION BY post_parent ORDER BY post_date DESC, ID DESC) AS rn
            FROM {}
            WHERE post_type = 'revision'
        ) ranked WHERE rn > ?"#,
        posts.quoted()
    )
}

pub fn drafts_and_trash(posts: &SafeIdent) -> String {
    format!(
        "SELECT CAST(ID AS SIGNED) AS id FROM {} WHERE post_status IN ('auto-draft', 'trash')",
        posts.quoted()
    )
}

pub fn delete_by_ids(table: &SafeIdent, column: &SafeIdent, count: usize) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({})",
        table.quoted(),
        column.quoted(),
        placeholders(count)
    )
}

pub fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).join(", ")
}

/// LIKE pattern matching names that start with `prefix`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '_' | '%' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Remembers the session `sql_mode` before a script overrides it.
pub const SAVE_SESSION: &str = "SET @dbmedic_sql_mode = @@SESSION.sql_mode";

pub const ROLLBACK: &str = "ROLLBACK";

const RESET_SESSION: &[&str] = &[
    "SET SESSION sql_mode = @dbmedic_sql_mode",
    "SET AUTOCOMMIT=1",
    "SET FOREIGN_KEY_CHECKS=1",
];

/// Statements that return a script's connection to default session state.
/// A failed script has its open transaction rolled back first.
pub fn finish_script(failed: bool) -> Vec<&'static str> {
    let mut statements = Vec::with_capacity(RESET_SESSION.len() + 1);
    if failed {
        statements.push(ROLLBACK);
    }
    statements.extend_from_slice(RESET_SESSION);
    statements
}

fn quoted_list(idents: &[SafeIdent]) -> String {
    idents.iter().map(SafeIdent::quoted).join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> SafeIdent {
        SafeIdent::parse(name).unwrap()
    }

    #[test]
    fn composite_index_is_one_statement() {
        let statement = add_index(
            &ident("wp_posts"),
            &ident("dbm_0123456789"),
            &[ident("post_type"), ident("post_status")],
        );
        assert_eq!(
            statement,
            "ALTER TABLE `wp_posts` ADD INDEX `dbm_0123456789` (`post_type`, `post_status`)"
        );
    }

    #[test]
    fn export_select_encodes_binary_columns() {
        let columns = vec![
            ExportColumn {
                name: ident("id"),
                binary: false,
            },
            ExportColumn {
                name: ident("payload"),
                binary: true,
            },
        ];
        let statement = select_export(&ident("wp_blobs"), &columns, &[ident("id")]);
        assert_eq!(
            statement,
            "SELECT CAST(`id` AS CHAR), HEX(`payload`) FROM `wp_blobs` ORDER BY `id` LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("wp_"), "wp\\_%");
        assert_eq!(like_prefix(""), "%");
    }

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }

    #[test]
    fn failed_script_rolls_back_before_resetting_the_session() {
        assert_eq!(
            finish_script(true),
            vec![
                "ROLLBACK",
                "SET SESSION sql_mode = @dbmedic_sql_mode",
                "SET AUTOCOMMIT=1",
                "SET FOREIGN_KEY_CHECKS=1",
            ]
        );
    }

    #[test]
    fn finished_script_only_resets_the_session() {
        assert_eq!(
            finish_script(false),
            vec![
                "SET SESSION sql_mode = @dbmedic_sql_mode",
                "SET AUTOCOMMIT=1",
                "SET FOREIGN_KEY_CHECKS=1",
            ]
        );
    }
}
