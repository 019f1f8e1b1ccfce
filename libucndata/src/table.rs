use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::error::{MissingDataError, RunError};
use super::histogram::{Hist1d, Hist2d};

/// Table kind metadata, consumed by the merger to pick a combination rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    EventList,
    Hist1d,
    Hist2d,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// A columnar table with an optional ascending time index in epoch seconds.
/// Tables without a time index (static configuration, histograms) pass
/// through window restriction unfiltered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    #[serde(default, skip_serializing)]
    pub name: String,
    pub kind: TableKind,
    #[serde(default)]
    pub time: Option<Vec<f64>>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub sum: f64,
    #[serde(default)]
    pub entries: u64,
}

impl Table {
    pub fn new_event_list(name: &str, time: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            kind: TableKind::EventList,
            time: Some(time),
            columns: Vec::new(),
            sum: 0.0,
            entries: 0,
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        if let Some(t) = &self.time {
            t.len()
        } else {
            self.columns.first().map(|c| c.values.len()).unwrap_or(0)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_time_indexed(&self) -> bool {
        self.time.is_some()
    }

    pub fn column(&self, name: &str) -> Result<&[f64], MissingDataError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| MissingDataError::Column(name.to_string(), self.name.clone()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Restrict to rows whose time index lies in `[start, stop]`, inclusive
    /// on both ends. Non-time-indexed tables are returned unchanged.
    pub fn range(&self, start: f64, stop: f64) -> Table {
        let time = match &self.time {
            Some(t) => t,
            None => return self.clone(),
        };
        let keep: Vec<usize> = time
            .iter()
            .enumerate()
            .filter(|(_, &t)| t >= start && t <= stop)
            .map(|(i, _)| i)
            .collect();
        self.take_rows(&keep)
    }

    /// Keep rows where `column == value` (used e.g. to extract a marker
    /// channel from a hits table).
    pub fn filter_eq(&self, column: &str, value: f64) -> Result<Table, MissingDataError> {
        let col = self.column(column)?;
        let keep: Vec<usize> = col
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == value)
            .map(|(i, _)| i)
            .collect();
        Ok(self.take_rows(&keep))
    }

    fn take_rows(&self, keep: &[usize]) -> Table {
        Table {
            name: self.name.clone(),
            kind: self.kind,
            time: self
                .time
                .as_ref()
                .map(|t| keep.iter().map(|&i| t[i]).collect()),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: keep.iter().map(|&i| c.values[i]).collect(),
                })
                .collect(),
            sum: self.sum,
            entries: self.entries,
        }
    }

    pub fn time_min(&self) -> Option<f64> {
        self.time
            .as_ref()
            .and_then(|t| t.iter().cloned().reduce(f64::min))
    }

    pub fn time_max(&self) -> Option<f64> {
        self.time
            .as_ref()
            .and_then(|t| t.iter().cloned().reduce(f64::max))
    }

    pub fn col_mean(&self, name: &str) -> Result<f64, MissingDataError> {
        let col = self.column(name)?;
        if col.is_empty() {
            return Ok(f64::NAN);
        }
        Ok(col.iter().sum::<f64>() / col.len() as f64)
    }

    pub fn col_std(&self, name: &str) -> Result<f64, MissingDataError> {
        let col = self.column(name)?;
        if col.len() < 2 {
            return Ok(0.0);
        }
        let mean = self.col_mean(name)?;
        let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (col.len() - 1) as f64;
        Ok(var.sqrt())
    }

    pub fn col_min(&self, name: &str) -> Result<f64, MissingDataError> {
        Ok(self
            .column(name)?
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min))
    }

    pub fn col_max(&self, name: &str) -> Result<f64, MissingDataError> {
        Ok(self
            .column(name)?
            .iter()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max))
    }

    /// Histogram the time index with a fixed bin width in seconds.
    pub fn hist1d(&self, step_s: f64) -> Hist1d {
        match &self.time {
            Some(t) => Hist1d::fill(t, step_s),
            None => Hist1d::default(),
        }
    }

    /// Histogram the time index with explicit bin edges.
    pub fn hist1d_edges(&self, edges: &[f64]) -> Hist1d {
        match &self.time {
            Some(t) => Hist1d::fill_edges(t, edges),
            None => Hist1d::default(),
        }
    }

    /// 2-D histogram of two named columns.
    pub fn hist2d(
        &self,
        xcol: &str,
        ycol: &str,
        xstep: f64,
        ystep: f64,
    ) -> Result<Hist2d, MissingDataError> {
        let xs = self.column(xcol)?;
        let ys = self.column(ycol)?;
        Ok(Hist2d::fill(xs, ys, xstep, ystep))
    }
}

/// Named tables behind `Arc`, keyed by normalized name.
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    tables: FxHashMap<String, Arc<Table>>,
}

/// Source names may contain spaces and hyphens (e.g. "UCNHits_Li-6");
/// collapse them so lookups are uniform.
pub fn normalize_key(name: &str) -> String {
    name.replace(' ', "_").replace('-', "")
}

impl TableSet {
    pub fn insert(&mut self, mut table: Table) {
        let key = normalize_key(&table.name);
        table.name = key.clone();
        self.tables.insert(key, Arc::new(table));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Table>, MissingDataError> {
        self.tables
            .get(&normalize_key(name))
            .cloned()
            .ok_or_else(|| MissingDataError::Table(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(&normalize_key(name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Header fields entered by the users at data-taking time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunHeader {
    pub run_number: i32,
    #[serde(default)]
    pub experiment_number: String,
    #[serde(default)]
    pub run_title: String,
    #[serde(default)]
    pub shifter: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub stop_time: f64,
}

/// Serde model of a run dump on disk: a header plus named tables.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunFile {
    pub header: RunHeader,
    pub tables: std::collections::BTreeMap<String, Table>,
}

impl RunFile {
    pub fn read(path: &Path) -> Result<RunFile, RunError> {
        if !path.exists() {
            return Err(RunError::BadFilePath(path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str::<RunFile>(&yaml_str)?)
    }

    pub fn into_table_set(self) -> (RunHeader, TableSet) {
        let mut set = TableSet::default();
        for (name, mut table) in self.tables {
            table.name = name;
            set.insert(table);
        }
        (self.header, set)
    }
}
