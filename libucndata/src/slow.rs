use fxhash::FxHashMap;
use std::sync::Arc;

use super::error::MissingDataError;
use super::table::Table;

/// A time-indexed series pulled out of a slow control table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub time: Vec<f64>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn min(&self) -> f64 {
        self.values.iter().cloned().fold(f64::INFINITY, f64::min)
    }
}

/// Aggregator over the EPICS slow control tables.
///
/// The column-to-table registry is built once at construction, so a lookup
/// miss is an explicit error rather than a fallthrough. When two tables
/// carry the same column name the first registered table wins.
#[derive(Debug, Clone)]
pub struct SlowControl {
    tables: Vec<Arc<Table>>,
    registry: FxHashMap<String, usize>,
    window: Option<(f64, f64)>,
}

impl SlowControl {
    pub fn new(tables: Vec<Arc<Table>>) -> Self {
        let mut registry: FxHashMap<String, usize> = FxHashMap::default();
        for (i, table) in tables.iter().enumerate() {
            for col in &table.columns {
                if registry.contains_key(&col.name) {
                    log::debug!(
                        "Slow control column \"{}\" appears in more than one table, keeping \"{}\"",
                        col.name,
                        tables[registry[&col.name]].name
                    );
                    continue;
                }
                registry.insert(col.name.clone(), i);
            }
        }
        Self {
            tables,
            registry,
            window: None,
        }
    }

    /// A copy of this aggregator restricted to `[start, stop]`. The
    /// registry is shared state rebuilt cheaply; the underlying tables are
    /// not copied.
    pub fn sliced(&self, start: f64, stop: f64) -> Self {
        let window = match self.window {
            Some((s0, s1)) => (start.max(s0), stop.min(s1)),
            None => (start, stop),
        };
        Self {
            tables: self.tables.clone(),
            registry: self.registry.clone(),
            window: Some(window),
        }
    }

    pub fn columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.registry.keys().map(|k| k.as_str()).collect();
        cols.sort_unstable();
        cols
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.registry.contains_key(column)
    }

    /// Fetch a column as a time-indexed series, restricted to the window.
    pub fn get(&self, column: &str) -> Result<Series, MissingDataError> {
        let &idx = self
            .registry
            .get(column)
            .ok_or_else(|| MissingDataError::SlowColumn(column.to_string()))?;
        let table = &self.tables[idx];
        let table = match self.window {
            Some((start, stop)) => Arc::new(table.range(start, stop)),
            None => table.clone(),
        };
        let values = table.column(column)?.to_vec();
        let time = table.time.clone().unwrap_or_default();
        Ok(Series { time, values })
    }

    /// Observed time range across every registered table, ignoring the
    /// window. Returns None when no table has a time index.
    pub fn observed_range(&self) -> Option<(f64, f64)> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for table in &self.tables {
            if let (Some(min), Some(max)) = (table.time_min(), table.time_max()) {
                lo = lo.min(min);
                hi = hi.max(max);
            }
        }
        if lo.is_finite() {
            Some((lo, hi))
        } else {
            None
        }
    }
}
