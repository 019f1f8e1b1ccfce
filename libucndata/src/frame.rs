use std::sync::Arc;

use super::config::RunConfig;
use super::node::{NodeAccess, SharedHitsHist};
use super::period::Period;
use super::slow::SlowControl;
use super::window::TimeWindowView;

/// The innermost view: a chopper frame within a period. Frame boundaries
/// are the injected marker timestamps; the last frame of a period is
/// closed by the period stop.
#[derive(Debug)]
pub struct Frame {
    config: Arc<RunConfig>,
    run_number: i32,
    pub cycle: usize,
    pub period: usize,
    pub index: usize,
    pub start: f64,
    pub stop: f64,
    pub duration: f64,
    view: TimeWindowView,
    epics: SlowControl,
    hits_hist: SharedHitsHist,
}

impl Frame {
    pub(crate) fn from_period(period: &Period, index: usize, start: f64, stop: f64) -> Self {
        Self {
            config: period.config_handle(),
            run_number: period.run_number(),
            cycle: period.cycle,
            period: period.index,
            index,
            start,
            stop,
            duration: stop - start,
            view: period.view().narrowed(start, stop),
            epics: period.epics().sliced(start, stop),
            hits_hist: period.hits_hist_cache().clone(),
        }
    }
}

impl NodeAccess for Frame {
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
