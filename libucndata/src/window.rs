use fxhash::FxHashMap;
use std::sync::{Arc, Mutex};

use super::error::MissingDataError;
use super::table::{normalize_key, Table, TableSet};

/// A lazy time-restricted view over a table set.
///
/// `get` returns the named table with rows limited to the window
/// `[start, stop]`, inclusive on both ends. Restriction happens on first
/// access per name and the result is cached; instrument dumps carry
/// hundreds of channels per run, so nothing is filtered eagerly. Tables
/// without a time index pass through unfiltered.
#[derive(Debug)]
pub struct TimeWindowView {
    tables: Arc<TableSet>,
    start: f64,
    stop: f64,
    cache: Mutex<FxHashMap<String, Arc<Table>>>,
}

impl TimeWindowView {
    pub fn new(tables: Arc<TableSet>, start: f64, stop: f64) -> Self {
        Self {
            tables,
            start,
            stop,
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Build a narrower view over the same canonical tables.
    pub fn narrowed(&self, start: f64, stop: f64) -> Self {
        Self::new(self.tables.clone(), start.max(self.start), stop.min(self.stop))
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn stop(&self) -> f64 {
        self.stop
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tables.names()
    }

    /// The canonical, unrestricted table set.
    pub fn unfiltered(&self) -> &Arc<TableSet> {
        &self.tables
    }

    pub fn get(&self, name: &str) -> Result<Arc<Table>, MissingDataError> {
        let key = normalize_key(name);
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(table) = cache.get(&key) {
            return Ok(table.clone());
        }

        let table = self.tables.get(&key)?;
        let unbounded = self.start == f64::NEG_INFINITY && self.stop == f64::INFINITY;
        let restricted = if table.is_time_indexed() && !unbounded {
            Arc::new(table.range(self.start, self.stop))
        } else {
            table
        };
        cache.insert(key, restricted.clone());
        Ok(restricted)
    }
}
