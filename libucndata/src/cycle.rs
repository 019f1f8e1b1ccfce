use fxhash::FxHashMap;
use ndarray::Array2;
use std::sync::{Arc, Mutex};

use super::broadcast::BroadcastList;
use super::config::RunConfig;
use super::error::{ConfigError, MissingDataError, QualityError};
use super::node::{beam_duration_at, NodeAccess, SharedHitsHist};
use super::period::Period;
use super::slow::{Series, SlowControl};
use super::window::TimeWindowView;

/// One cycle of a run. Construction snapshots the run's state restricted
/// to the cycle window plus the boundary table projected to this cycle;
/// the cycle is self-contained and can cross thread boundaries.
#[derive(Debug)]
pub struct Cycle {
    config: Arc<RunConfig>,
    run_number: i32,
    pub index: usize,
    pub supercycle: i64,
    /// He3 minus Li6 start time, present when detection mode was matched
    pub offset: Option<f64>,
    pub start: f64,
    pub stop: f64,
    pub duration: f64,
    view: TimeWindowView,
    epics: SlowControl,
    period_end_times: Vec<f64>,
    period_durations: Vec<f64>,
    valve_states: Array2<bool>,
    frame_times: Vec<f64>,
    hits_hist: SharedHitsHist,
    period_cache: Mutex<FxHashMap<usize, Arc<Period>>>,
}

pub(crate) struct CycleParts {
    pub config: Arc<RunConfig>,
    pub run_number: i32,
    pub index: usize,
    pub supercycle: i64,
    pub offset: Option<f64>,
    pub start: f64,
    pub stop: f64,
    pub view: TimeWindowView,
    pub epics: SlowControl,
    pub period_end_times: Vec<f64>,
    pub period_durations: Vec<f64>,
    pub valve_states: Array2<bool>,
    pub frame_times: Vec<f64>,
    pub hits_hist: SharedHitsHist,
}

impl Cycle {
    pub(crate) fn from_parts(parts: CycleParts) -> Self {
        Self {
            config: parts.config,
            run_number: parts.run_number,
            index: parts.index,
            supercycle: parts.supercycle,
            offset: parts.offset,
            start: parts.start,
            stop: parts.stop,
            duration: parts.stop - parts.start,
            view: parts.view,
            epics: parts.epics,
            period_end_times: parts.period_end_times,
            period_durations: parts.period_durations,
            valve_states: parts.valve_states,
            frame_times: parts.frame_times,
            hits_hist: parts.hits_hist,
            period_cache: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn nperiods(&self) -> usize {
        self.period_end_times.len()
    }

    pub fn period_durations(&self) -> &[f64] {
        &self.period_durations
    }

    pub fn valve_states(&self) -> &Array2<bool> {
        &self.valve_states
    }

    fn period_window(&self, period: usize) -> (f64, f64) {
        let start = if period == 0 {
            self.start
        } else {
            self.period_end_times[period - 1]
        };
        (start, self.period_end_times[period])
    }

    /// Fetch a period by index, negative indices counting from the end.
    /// Periods are cached; repeated access returns the same object.
    pub fn period(&self, index: isize) -> Result<Arc<Period>, ConfigError> {
        let nperiods = self.nperiods();
        let resolved = if index < 0 {
            index + nperiods as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= nperiods {
            return Err(ConfigError::PeriodIndexOutOfRange {
                run: self.run_number,
                cycle: self.index,
                index,
                nperiods,
            });
        }
        let resolved = resolved as usize;

        let mut cache = self
            .period_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(period) = cache.get(&resolved) {
            return Ok(period.clone());
        }

        let (start, stop) = self.period_window(resolved);
        let frame_times = self
            .frame_times
            .iter()
            .copied()
            .filter(|&t| t >= start && t < stop)
            .collect();
        let period = Arc::new(Period::new(
            self.config.clone(),
            self.run_number,
            self.index,
            resolved,
            start,
            stop,
            self.view.narrowed(start, stop),
            self.epics.sliced(start, stop),
            frame_times,
            self.hits_hist.clone(),
        ));
        cache.insert(resolved, period.clone());
        Ok(period)
    }

    /// All periods of this cycle in index order.
    pub fn periods(&self) -> BroadcastList<Arc<Period>> {
        (0..self.nperiods())
            .filter_map(|i| self.period(i as isize).ok())
            .collect()
    }

    /// Beam-on duration in seconds from the KSM readback nearest the
    /// cycle start.
    pub fn beam_on_s(&self) -> Result<f64, MissingDataError> {
        beam_duration_at(&self.epics, self.start, true)
    }

    pub fn beam_off_s(&self) -> Result<f64, MissingDataError> {
        beam_duration_at(&self.epics, self.start, false)
    }

    /// The per-cycle data sufficiency battery. `prev_beam1a` is the 1A
    /// current of the preceding cycle, used for the 20 s pre-start
    /// look-back. `strict` extends the battery with per-period pileup
    /// checks on both detectors.
    pub fn check_data(
        &self,
        prev_beam1a: Option<&Series>,
        strict: bool,
    ) -> Result<(), QualityError> {
        let threshold = self.config.thresholds.beam_min_current;

        let beam1a = self.beam1a_current_ua().ok().filter(|s| !s.is_empty());
        let Some(beam1a) = beam1a else {
            return Err(QualityError::NoBeamData {
                run: self.run_number,
                cycle: self.index,
                beamline: String::from("1A"),
            });
        };
        if self.beam1u_current_ua().ok().filter(|s| !s.is_empty()).is_none() {
            return Err(QualityError::NoBeamData {
                run: self.run_number,
                cycle: self.index,
                beamline: String::from("1U"),
            });
        }

        if self.duration <= 0.0 {
            return Err(QualityError::BadDuration {
                run: self.run_number,
                cycle: self.index,
                duration: self.duration,
            });
        }

        if !self.valve_states.iter().any(|&open| open) {
            return Err(QualityError::NoValves {
                run: self.run_number,
                cycle: self.index,
            });
        }

        let expected: f64 = self.period_durations.iter().sum();
        if expected > self.duration {
            return Err(QualityError::PeriodOverrun {
                run: self.run_number,
                cycle: self.index,
                actual: self.duration,
                expected,
            });
        }

        if beam1a.values.iter().any(|&current| current < threshold) {
            return Err(QualityError::LowBeamCurrent {
                run: self.run_number,
                cycle: self.index,
                threshold,
            });
        }

        if let Some(prev) = prev_beam1a {
            let lookback = self.start - 20.0;
            let dropped = prev
                .time
                .iter()
                .zip(&prev.values)
                .any(|(&t, &current)| t > lookback && current < threshold);
            if dropped {
                return Err(QualityError::LowBeamCurrentAtStart {
                    run: self.run_number,
                    cycle: self.index,
                    threshold,
                });
            }
        }

        if strict {
            for period in &self.periods() {
                for detector in ["Li6", "He3"] {
                    if period.is_pileup(detector).unwrap_or(false) {
                        return Err(QualityError::Pileup {
                            run: self.run_number,
                            cycle: self.index,
                            period: period.index,
                            detector: detector.to_string(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

impl NodeAccess for Cycle {
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
