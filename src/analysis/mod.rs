pub mod aggregate;
pub mod health;
pub mod recommend;
pub mod rules;
pub mod server;
pub mod slow_query;
pub mod table;

pub(crate) mod query_parser;

use crate::db::DbError;
use snafu::Snafu;
use std::collections::BTreeMap;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AnalysisError {
    #[snafu(display("Failed to list tables: {}", source))]
    ListTables { source: DbError },

    #[snafu(display("Metadata for {} unavailable: {}", table, source))]
    Metadata { table: String, source: DbError },

    #[snafu(display("Table {} no longer exists", table))]
    TableMissing { table: String },
}

pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Looks up a server variable or status counter; names match case-insensitively.
pub(crate) fn value_as_u64(values: &BTreeMap<String, String>, name: &str) -> Option<u64> {
    values
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok())
}
