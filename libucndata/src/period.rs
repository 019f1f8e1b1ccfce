use fxhash::FxHashMap;
use std::sync::{Arc, Mutex};

use super::broadcast::BroadcastList;
use super::config::RunConfig;
use super::error::{ConfigError, MissingDataError};
use super::frame::Frame;
use super::node::{NodeAccess, SharedHitsHist};
use super::slow::SlowControl;
use super::window::TimeWindowView;

/// A single period of a cycle: one step of the irradiate/store/count
/// pattern. Construction snapshots the parent cycle's state restricted
/// to `[start, stop]`; the period outlives the cycle object it came from.
#[derive(Debug)]
pub struct Period {
    config: Arc<RunConfig>,
    run_number: i32,
    pub cycle: usize,
    pub index: usize,
    pub start: f64,
    pub stop: f64,
    pub duration: f64,
    view: TimeWindowView,
    epics: SlowControl,
    frame_times: Vec<f64>,
    hits_hist: SharedHitsHist,
    frame_cache: Mutex<FxHashMap<usize, Arc<Frame>>>,
}

impl Period {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<RunConfig>,
        run_number: i32,
        cycle: usize,
        index: usize,
        start: f64,
        stop: f64,
        view: TimeWindowView,
        epics: SlowControl,
        frame_times: Vec<f64>,
        hits_hist: SharedHitsHist,
    ) -> Self {
        Self {
            config,
            run_number,
            cycle,
            index,
            start,
            stop,
            duration: stop - start,
            view,
            epics,
            frame_times,
            hits_hist,
            frame_cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn config_handle(&self) -> Arc<RunConfig> {
        self.config.clone()
    }

    pub fn nframes(&self) -> usize {
        self.frame_times.len()
    }

    /// Frame window: `[marker[i], marker[i+1])`, the last frame closed by
    /// the period stop.
    fn frame_window(&self, index: usize) -> (f64, f64) {
        let start = self.frame_times[index];
        let stop = self
            .frame_times
            .get(index + 1)
            .copied()
            .unwrap_or(self.stop);
        (start, stop)
    }

    /// Fetch a frame by index, negative indices counting from the end.
    /// Frames are cached; repeated access returns the same object.
    pub fn frame(&self, index: isize) -> Result<Arc<Frame>, ConfigError> {
        let nframes = self.nframes();
        let resolved = if index < 0 {
            index + nframes as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= nframes {
            return Err(ConfigError::FrameIndexOutOfRange {
                run: self.run_number,
                cycle: self.cycle,
                period: self.index,
                index,
                nframes,
            });
        }
        let resolved = resolved as usize;

        let mut cache = self
            .frame_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(frame) = cache.get(&resolved) {
            return Ok(frame.clone());
        }
        let (start, stop) = self.frame_window(resolved);
        let frame = Arc::new(Frame::from_period(self, resolved, start, stop));
        cache.insert(resolved, frame.clone());
        Ok(frame)
    }

    /// All frames of this period in index order.
    pub fn frames(&self) -> BroadcastList<Arc<Frame>> {
        (0..self.nframes())
            .filter_map(|i| self.frame(i as isize).ok())
            .collect()
    }

    /// Background-subtracted, normalized hit count with its uncertainty.
    ///
    /// The raw count carries a Poissonian error. Background subtraction
    /// never takes the count below zero; background and normalization
    /// errors are propagated in quadrature.
    pub fn get_counts(
        &self,
        detector: &str,
        bkgd: Option<f64>,
        dbkgd: Option<f64>,
        norm: Option<f64>,
        dnorm: Option<f64>,
    ) -> Result<(f64, f64), MissingDataError> {
        let mut counts = self.get_nhits(detector)? as f64;
        let mut dcounts = counts.sqrt();

        if let Some(b) = bkgd {
            counts = (counts - b).max(0.0);
            if let Some(db) = dbkgd {
                dcounts = (dcounts.powi(2) + db.powi(2)).sqrt();
            }
        }

        if let Some(n) = norm {
            if let Some(dn) = dnorm {
                dcounts = ((dcounts / n).powi(2) + (counts * dn / n.powi(2)).powi(2)).sqrt();
            } else {
                dcounts /= n;
            }
            counts /= n;
        }

        Ok((counts, dcounts))
    }

    /// Whether the hit rate at the start of the period exceeds the pileup
    /// threshold: 1 ms bins over the first `pileup_within_first_s` seconds
    /// of data, any bin above `pileup_cnt_per_ms` counts.
    pub fn is_pileup(&self, detector: &str) -> Result<bool, MissingDataError> {
        let tables = self.config.detector(detector).map_err(|_| {
            MissingDataError::Table(format!("hits table for detector {detector}"))
        })?;
        let hits = self.view.get(&tables.hits)?;
        let Some(first) = hits.time_min() else {
            return Ok(false);
        };
        let window_s = self.config.thresholds.pileup_within_first_s;
        let nbins = (window_s / 0.001).round() as usize;
        let edges: Vec<f64> = (0..=nbins).map(|i| first + i as f64 * 0.001).collect();
        let hist = hits.hist1d_edges(&edges);
        Ok(hist
            .y
            .iter()
            .any(|&count| count > self.config.thresholds.pileup_cnt_per_ms))
    }
}

impl NodeAccess for Period {
    fn config(&self) -> &RunConfig {
        &self.config
    }

    fn run_number(&self) -> i32 {
        self.run_number
    }

    fn view(&self) -> &TimeWindowView {
        &self.view
    }

    fn epics(&self) -> &SlowControl {
        &self.epics
    }

    fn hits_hist_cache(&self) -> &SharedHitsHist {
        &self.hits_hist
    }
}
