//! Operations shared by every level of the run/cycle/period/frame tree.
//!
//! Each node is a view: same tables, different time window. The operations
//! here read through the node's `TimeWindowView` so the window is applied
//! uniformly no matter which level the caller holds.

use std::sync::{Arc, Mutex, MutexGuard};

use super::config::RunConfig;
use super::error::MissingDataError;
use super::histogram::Hist1d;
use super::slow::{Series, SlowControl};
use super::window::TimeWindowView;

/// Seconds of proton beam delivered per KSM bucket readback count.
pub const BEAM_BUCKET_DURATION_S: f64 = 0.000926;

/// Full-run hits histogram, computed once per (detector, bin width) and
/// shared by every node of the run. Nodes trim the cached copy to their
/// own window.
#[derive(Debug, Default)]
pub struct HitsHistCache {
    detector: String,
    bin_ms: u32,
    hist: Arc<Hist1d>,
}

pub type SharedHitsHist = Arc<Mutex<Option<HitsHistCache>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Window-scoped telemetry access. Implementors supply their window view
/// and slow control slice; everything else is derived.
pub trait NodeAccess {
    fn config(&self) -> &RunConfig;
    fn run_number(&self) -> i32;
    fn view(&self) -> &TimeWindowView;
    fn epics(&self) -> &SlowControl;
    fn hits_hist_cache(&self) -> &SharedHitsHist;

    /// Timestamps of detector hits inside this node's window.
    fn get_hits(&self, detector: &str) -> Result<Vec<f64>, MissingDataError> {
        let tables = self.config().detector(detector).map_err(|_| {
            MissingDataError::Table(format!("hits table for detector {detector}"))
        })?;
        let table = self.view().get(&tables.hits)?;
        Ok(table.time.clone().unwrap_or_default())
    }

    /// Number of detector hits inside this node's window.
    fn get_nhits(&self, detector: &str) -> Result<usize, MissingDataError> {
        Ok(self.get_hits(detector)?.len())
    }

    /// Histogram of detector hit times with `bin_ms` wide bins, trimmed to
    /// this node's window. The full-run histogram is cached at run scope;
    /// asking with a different detector or bin width recomputes it.
    fn get_hits_histogram(
        &self,
        detector: &str,
        bin_ms: u32,
    ) -> Result<Hist1d, MissingDataError> {
        let tables = self.config().detector(detector).map_err(|_| {
            MissingDataError::Table(format!("hits table for detector {detector}"))
        })?;

        let full = {
            let mut cache = lock(self.hits_hist_cache());
            match cache.as_ref() {
                Some(c) if c.detector == detector && c.bin_ms == bin_ms => c.hist.clone(),
                _ => {
                    let table = self.view().unfiltered().get(&tables.hits)?;
                    let hist = Arc::new(table.hist1d(bin_ms as f64 / 1000.0));
                    *cache = Some(HitsHistCache {
                        detector: detector.to_string(),
                        bin_ms,
                        hist: hist.clone(),
                    });
                    hist
                }
            }
        };

        let (start, stop) = (self.view().start(), self.view().stop());
        if start == f64::NEG_INFINITY && stop == f64::INFINITY {
            Ok((*full).clone())
        } else {
            Ok(full.trimmed(start, stop))
        }
    }

    /// Beamline 1A current in uA, inside this node's window.
    fn beam1a_current_ua(&self) -> Result<Series, MissingDataError> {
        self.epics().get("B1_FOIL_ADJCUR")
    }

    /// Beamline 1U current in uA: predicted 1U current gated by the
    /// beam-on-production flag.
    fn beam1u_current_ua(&self) -> Result<Series, MissingDataError> {
        let predcur = self.epics().get("B1V_KSM_PREDCUR")?;
        let bonprd = self.epics().get("B1V_KSM_BONPRD")?;
        let values = predcur
            .values
            .iter()
            .zip(&bonprd.values)
            .map(|(&p, &b)| p * b)
            .collect();
        Ok(Series {
            time: predcur.time,
            values,
        })
    }

    /// Times where the binned hit rate crosses `thresh`, rising or falling.
    /// Returns an empty list when the rate never crosses.
    fn trigger_edge(
        &self,
        detector: &str,
        thresh: f64,
        bin_ms: u32,
        rising: bool,
    ) -> Result<Vec<f64>, MissingDataError> {
        let hist = self.get_hits_histogram(detector, bin_ms)?;
        if hist.x.is_empty() {
            return Err(MissingDataError::Empty(format!("{detector} hits histogram")));
        }

        // edge detection by differencing the thresholded rate
        let sign: Vec<i8> = hist.y.iter().map(|&n| i8::from(n >= thresh)).collect();
        let searched: i8 = if rising { 1 } else { -1 };
        let mut edges = Vec::new();
        for i in 0..=sign.len() {
            let prev = if i == 0 { 0 } else { sign[i - 1] };
            let here = if i < sign.len() { sign[i] } else { 0 };
            if here - prev == searched {
                edges.push(hist.x[i.min(sign.len() - 1)]);
            }
        }
        Ok(edges)
    }
}

/// Beam-on or beam-off duration from the KSM readback nearest `at`,
/// converted from bucket counts to seconds.
pub fn beam_duration_at(
    epics: &SlowControl,
    at: f64,
    on: bool,
) -> Result<f64, MissingDataError> {
    let column = if on {
        "B1V_KSM_RDBEAMON_VAL1"
    } else {
        "B1V_KSM_RDBEAMOFF_VAL1"
    };
    let series = epics.get(column)?;
    if series.is_empty() {
        return Err(MissingDataError::SlowColumn(column.to_string()));
    }
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &t) in series.time.iter().enumerate() {
        let dist = (t - at).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    Ok(series.values[best] * BEAM_BUCKET_DURATION_S)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, Table, TableKind, TableSet};

    struct HitsNode {
        config: RunConfig,
        view: TimeWindowView,
        epics: SlowControl,
        cache: SharedHitsHist,
    }

    impl HitsNode {
        fn with_hits(hits: Vec<f64>) -> Self {
            let mut set = TableSet::default();
            set.insert(Table::new_event_list("UCNHits_Li6", hits));
            Self {
                config: RunConfig::default(),
                view: TimeWindowView::new(Arc::new(set), f64::NEG_INFINITY, f64::INFINITY),
                epics: SlowControl::new(Vec::new()),
                cache: Arc::new(Mutex::new(None)),
            }
        }
    }

    impl NodeAccess for HitsNode {
        fn config(&self) -> &RunConfig {
            &self.config
        }

        fn run_number(&self) -> i32 {
            1846
        }

        fn view(&self) -> &TimeWindowView {
            &self.view
        }

        fn epics(&self) -> &SlowControl {
            &self.epics
        }

        fn hits_hist_cache(&self) -> &SharedHitsHist {
            &self.cache
        }
    }

    fn epics_with(cols: Vec<(&str, Vec<f64>)>, time: Vec<f64>) -> SlowControl {
        SlowControl::new(vec![Arc::new(Table {
            name: String::from("BeamlineEpics"),
            kind: TableKind::EventList,
            time: Some(time),
            columns: cols
                .into_iter()
                .map(|(name, values)| Column {
                    name: name.to_string(),
                    values,
                })
                .collect(),
            sum: 0.0,
            entries: 0,
        })])
    }

    #[test]
    fn test_beam_duration_nearest_readback() {
        let epics = epics_with(
            vec![("B1V_KSM_RDBEAMON_VAL1", vec![1000.0, 2000.0, 3000.0])],
            vec![10.0, 20.0, 30.0],
        );
        let dur = beam_duration_at(&epics, 21.0, true).unwrap();
        assert!((dur - 2000.0 * BEAM_BUCKET_DURATION_S).abs() < 1e-9);
    }

    #[test]
    fn test_beam_duration_missing_column() {
        let epics = epics_with(vec![("B1_FOIL_ADJCUR", vec![1.0])], vec![10.0]);
        assert!(beam_duration_at(&epics, 10.0, true).is_err());
    }

    #[test]
    fn test_trigger_edge_interior_crossings() {
        // 1 s bins at x = 0/1/2 counting 1, 4, 1 hits
        let node = HitsNode::with_hits(vec![0.0, 1.0, 1.1, 1.2, 1.3, 2.9]);
        let rising = node.trigger_edge("Li6", 4.0, 1000, true).unwrap();
        assert_eq!(rising, vec![1.0]);
        let falling = node.trigger_edge("Li6", 4.0, 1000, false).unwrap();
        assert_eq!(falling, vec![2.0]);
    }

    #[test]
    fn test_trigger_edge_open_at_end_of_data() {
        // rate stays above threshold through the final bin; the falling
        // edge closes on that bin's label
        let node = HitsNode::with_hits(vec![0.0, 2.0, 2.1, 2.2, 2.3, 3.0, 3.1, 3.2, 3.3, 4.0]);
        let rising = node.trigger_edge("Li6", 4.0, 1000, true).unwrap();
        assert_eq!(rising, vec![2.0]);
        let falling = node.trigger_edge("Li6", 4.0, 1000, false).unwrap();
        assert_eq!(falling, vec![3.0]);
    }

    #[test]
    fn test_trigger_edge_no_hits() {
        let node = HitsNode::with_hits(Vec::new());
        assert!(node.trigger_edge("Li6", 1.0, 1000, true).is_err());
    }
}
