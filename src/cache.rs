//! Expiring in-memory cache for analysis results.
//!
//! Entries speed up repeated analysis only. Nothing that mutates the schema
//! reads from here.

use crate::db::IndexRow;
use crate::models::TableDiagnosis;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Unexpired value for `key`; expired entries are dropped on read.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().insert(key, entry);
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.lock().remove(key);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.insert(key, value.clone());
        value
    }
}

/// Per-table diagnoses and index listings, both keyed by table name.
#[derive(Debug)]
pub struct AnalysisCache {
    pub diagnoses: TtlCache<String, TableDiagnosis>,
    pub indexes: TtlCache<String, Vec<IndexRow>>,
}

impl AnalysisCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            diagnoses: TtlCache::new(ttl),
            indexes: TtlCache::new(ttl),
        }
    }

    /// Drops everything cached for `table`.
    pub fn invalidate_table(&self, table: &str) {
        let key = table.to_string();
        self.diagnoses.invalidate(&key);
        self.indexes.invalidate(&key);
    }

    pub fn clear(&self) {
        self.diagnoses.clear();
        self.indexes.clear();
    }
}
