//! Restorable SQL script format: writing values and splitting a stored
//! script back into statements.

use crate::db::{sql, SqlValue};
use crate::identifier::SafeIdent;
use chrono::{DateTime, Utc};
use itertools::Itertools;

/// Rows per `INSERT` statement and per export page.
pub const CHUNK_ROWS: usize = 1000;

pub const PREAMBLE: &str = "SET FOREIGN_KEY_CHECKS=0;\n\
SET SQL_MODE='NO_AUTO_VALUE_ON_ZERO';\n\
SET AUTOCOMMIT=0;\n\
START TRANSACTION;\n\n";

pub const FOOTER: &str = "\nCOMMIT;\nSET FOREIGN_KEY_CHECKS=1;\n";

pub fn header(generated_at: DateTime<Utc>, server_version: Option<&str>) -> String {
    format!(
        "-- dbmedic backup\n-- Generated: {}\n-- Server version: {}\n\n",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        server_version.unwrap_or("unknown")
    )
}

/// Comment, drop, and definition for one table.
pub fn table_definition(table: &SafeIdent, create_statement: &str) -> String {
    format!(
        "\n-- Table: {}\n{};\n{};\n\n",
        table,
        sql::drop_table_if_exists(table),
        create_statement.trim_end().trim_end_matches(';')
    )
}

/// Single-quoted literal with MySQL backslash escapes.
pub fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for ch in value.chars() {
        match ch {
            '\0' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\x1a' => escaped.push_str("\\Z"),
            other => escaped.push(other),
        }
    }
    escaped.push('\'');
    escaped
}

pub fn format_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Text(text) => escape_text(text),
        SqlValue::Hex(hex) if hex.is_empty() => "''".to_string(),
        SqlValue::Hex(hex) => format!("X'{hex}'"),
    }
}

/// One multi-row `INSERT` with an explicit column list.
pub fn insert_statement(table: &SafeIdent, columns: &[SafeIdent], rows: &[Vec<SqlValue>]) -> String {
    let tuples = rows
        .iter()
        .map(|row| format!("({})", row.iter().map(format_value).join(",")))
        .join(",\n");
    format!("{}\n{};\n\n", sql::insert_prefix(table, columns), tuples)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Normal,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Splits a script on `;` outside quotes and comments. Comments are
/// dropped; fragments left empty are skipped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = script.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            State::Normal => match ch {
                ';' => {
                    let statement = current.trim();
                    if !statement.is_empty() {
                        statements.push(statement.to_string());
                    }
                    current.clear();
                }
                '\'' | '"' | '`' => {
                    state = State::Quoted(ch);
                    current.push(ch);
                }
                '#' => state = State::LineComment,
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    match chars.peek() {
                        None => state = State::LineComment,
                        Some(next) if next.is_whitespace() => state = State::LineComment,
                        Some(_) => current.push_str("--"),
                    }
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                _ => current.push(ch),
            },
            State::Quoted(quote) => {
                current.push(ch);
                if ch == '\\' && quote != '`' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if ch == quote {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if ch == '\n' {
                    current.push('\n');
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    current.push(' ');
                    state = State::Normal;
                }
            }
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }
    statements
}
