use fxhash::FxHashMap;
use ndarray::Array2;

use super::error::ConfigError;

/// Start and end times of one cycle, in epoch seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleTimes {
    pub start: f64,
    pub stop: f64,
    pub duration: f64,
    pub supercycle: i64,
    /// He3 start minus Li6 start, set by matched detection only
    pub offset: Option<f64>,
}

/// Per-run auxiliary boundary fields not modeled explicitly. Used by
/// extensions that inject their own sequencing state.
#[derive(Debug, Clone, PartialEq)]
pub enum AuxValue {
    Bool(bool),
    Int(i64),
    Series(Vec<f64>),
}

/// The per-run boundary state: cycle windows, period end times, valve
/// configuration and the cycle acceptance filter.
///
/// `period_end_times` and `period_durations` are `[nperiods x ncycles]`
/// matrices. Durations are always derived by differencing the end times,
/// with period 0 differenced against the cycle start.
#[derive(Debug, Clone, Default)]
pub struct BoundaryTable {
    pub cycle_times: Vec<CycleTimes>,
    pub period_end_times: Array2<f64>,
    pub period_durations: Array2<f64>,
    /// [nperiods x nvalves]; valve states do not change across cycles
    pub valve_states: Array2<bool>,
    /// None means all cycles accepted
    pub filter: Option<Vec<bool>>,
    pub nperiods: usize,
    pub enable: bool,
    pub inf_cyc_enable: bool,
    pub nsupercyc: i64,
    /// externally injected frame marker timestamps, ascending
    pub frame_times: Option<Vec<f64>>,
    pub aux: FxHashMap<String, AuxValue>,
}

impl BoundaryTable {
    pub fn ncycles(&self) -> usize {
        self.cycle_times.len()
    }

    /// True when cycle times have been populated by a detection strategy.
    pub fn has_cycle_times(&self) -> bool {
        !self.cycle_times.is_empty()
    }

    pub fn cycle_window(&self, cycle: usize) -> (f64, f64) {
        let ct = &self.cycle_times[cycle];
        (ct.start, ct.stop)
    }

    /// Period start/stop within a cycle; period 0 starts at the cycle start.
    pub fn period_window(&self, cycle: usize, period: usize) -> (f64, f64) {
        let start = if period == 0 {
            self.cycle_times[cycle].start
        } else {
            self.period_end_times[[period - 1, cycle]]
        };
        (start, self.period_end_times[[period, cycle]])
    }

    pub fn set_filter(&mut self, filter: Option<Vec<bool>>) -> Result<(), ConfigError> {
        if let Some(mask) = &filter {
            if mask.len() != self.ncycles() {
                return Err(ConfigError::BadFilterLength {
                    given: mask.len(),
                    expected: self.ncycles(),
                });
            }
        }
        self.filter = filter;
        Ok(())
    }

    pub fn is_accepted(&self, cycle: usize) -> bool {
        match &self.filter {
            Some(mask) => mask.get(cycle).copied().unwrap_or(false),
            None => true,
        }
    }

    /// Seed the period tables with a single period spanning each cycle.
    /// Called after detection when no period structure was read from file.
    pub fn seed_periods(&mut self) {
        if self.period_end_times.is_empty() {
            let ncycles = self.ncycles();
            self.period_end_times = Array2::from_shape_fn((1, ncycles), |(_, c)| {
                self.cycle_times[c].stop
            });
            self.nperiods = 1;
            self.rederive_durations();
        }
    }

    /// Reconcile the period matrices with the detected cycle count, then
    /// rederive durations. Extra matrix columns are dropped; missing ones
    /// are filled with the cycle stop time (a single full-length period).
    pub fn align_periods(&mut self) {
        if self.period_end_times.is_empty() {
            self.seed_periods();
            return;
        }
        let ncycles = self.ncycles();
        let (nperiods, ncols) = self.period_end_times.dim();
        if ncols != ncycles {
            let old = std::mem::take(&mut self.period_end_times);
            self.period_end_times = Array2::from_shape_fn((nperiods, ncycles), |(p, c)| {
                if c < ncols {
                    old[[p, c]]
                } else {
                    self.cycle_times[c].stop
                }
            });
        }
        self.rederive_durations();
    }

    /// Recompute `period_durations` by differencing `period_end_times`.
    pub fn rederive_durations(&mut self) {
        let (nperiods, ncycles) = self.period_end_times.dim();
        self.period_durations = Array2::from_shape_fn((nperiods, ncycles), |(p, c)| {
            if p == 0 {
                self.period_end_times[[0, c]] - self.cycle_times[c].start
            } else {
                self.period_end_times[[p, c]] - self.period_end_times[[p - 1, c]]
            }
        });
    }

    /// Shift a period's start and/or stop by signed deltas, in place.
    ///
    /// Moving period 0's start moves the cycle start; moving any other
    /// period's start moves the previous period's end time. A shift
    /// propagates through adjacent zero-duration periods so timing fences
    /// move together with their neighbour. A period stop is clamped to the
    /// cycle stop. Cycles may end up overlapping or gapped; periods within
    /// one cycle never do.
    pub fn modify_timing(
        &mut self,
        cycle: usize,
        period: usize,
        dt_start: f64,
        dt_stop: f64,
        update_duration: bool,
    ) {
        if dt_start != 0.0 {
            if period == 0 {
                self.cycle_times[cycle].start += dt_start;
            } else {
                self.period_end_times[[period - 1, cycle]] += dt_start;
            }

            // propagate through a preceding zero-length period
            if period > 1 && self.period_durations[[period - 1, cycle]] == 0.0 {
                self.modify_timing(cycle, period - 1, dt_start, 0.0, false);
            }
        }

        if dt_stop != 0.0 {
            self.period_end_times[[period, cycle]] += dt_stop;

            // periods must stay within cycle bounds
            let cycle_end = self.cycle_times[cycle].stop;
            let period_end = self.period_end_times[[period, cycle]];
            self.period_end_times[[period, cycle]] = period_end.min(cycle_end);

            // propagate through a following zero-length period
            if period + 1 < self.nperiods && self.period_durations[[period + 1, cycle]] == 0.0 {
                self.modify_timing(cycle, period + 1, 0.0, dt_stop, false);
            }
        }

        if update_duration {
            self.rederive_durations();
            let ct = &mut self.cycle_times[cycle];
            ct.duration = ct.stop - ct.start;
        }
    }

    /// Frame markers falling inside `[start, stop)`.
    pub fn frame_times_in(&self, start: f64, stop: f64) -> Vec<f64> {
        match &self.frame_times {
            Some(times) => times
                .iter()
                .cloned()
                .filter(|&t| t >= start && t < stop)
                .collect(),
            None => Vec::new(),
        }
    }
}
