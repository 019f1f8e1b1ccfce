use fxhash::FxHashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::boundary::BoundaryTable;
use super::broadcast::BroadcastList;
use super::config::{DetectionMode, RunConfig};
use super::cycle::{Cycle, CycleParts};
use super::detect;
use super::error::{ConfigError, CycleError, MissingDataError, RunError};
use super::frame::Frame;
use super::node::{beam_duration_at, NodeAccess, SharedHitsHist};
use super::period::Period;
use super::slow::SlowControl;
use super::table::{RunFile, RunHeader, TableSet};
use super::window::TimeWindowView;

/// Child index selector for structured access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// A single child; negative indices count from the end.
    At(isize),
    /// Every child in index order.
    All,
    /// Children `start..stop`.
    Range(usize, usize),
}

/// Result of a `(cycle, period)` selection. The shape follows the
/// selectors: one node, a flat list, or a per-cycle list of lists.
#[derive(Debug)]
pub enum PeriodSelection {
    One(Arc<Period>),
    Many(BroadcastList<Arc<Period>>),
    Grouped(BroadcastList<BroadcastList<Arc<Period>>>),
}

/// Result of a `(cycle, period, frame)` selection.
#[derive(Debug)]
pub enum FrameSelection {
    One(Arc<Frame>),
    Many(BroadcastList<Arc<Frame>>),
    Grouped(BroadcastList<BroadcastList<Arc<Frame>>>),
    GroupedByCycle(BroadcastList<BroadcastList<BroadcastList<Arc<Frame>>>>),
}

enum OneOrMany<T> {
    One(T),
    Many(BroadcastList<T>),
}

/// A single run of the experiment: the canonical tables, the slow control
/// registry and the cycle boundary state.
///
/// Cycles, periods and frames are views derived from this object and
/// cached by index. Timing edits go through `&mut self` and bump a
/// generation counter; caches from before the edit are discarded on the
/// next access rather than eagerly walked.
#[derive(Debug)]
pub struct Run {
    config: Arc<RunConfig>,
    headers: Vec<RunHeader>,
    tables: Arc<TableSet>,
    view: TimeWindowView,
    epics: SlowControl,
    pub cycle_param: BoundaryTable,
    generation: u64,
    cycle_cache: Mutex<(u64, FxHashMap<usize, Arc<Cycle>>)>,
    hits_hist: SharedHitsHist,
}

impl Run {
    /// Load a run by number from the configured data directory.
    pub fn from_run_number(run_number: i32, config: Arc<RunConfig>) -> Result<Run, RunError> {
        let path = config.run_file(run_number);
        Self::from_file(&path, config)
    }

    /// Load a run from an explicit file path.
    pub fn from_file(path: &Path, config: Arc<RunConfig>) -> Result<Run, RunError> {
        let (header, tables) = RunFile::read(path)?.into_table_set();
        Self::from_tables(header, tables, config)
    }

    /// Build a run from an already-loaded table set: read the boundary
    /// state, detect cycle times and index the slow control tables.
    pub fn from_tables(
        header: RunHeader,
        tables: TableSet,
        config: Arc<RunConfig>,
    ) -> Result<Run, RunError> {
        let run_number = header.run_number;
        let mut cycle_param = detect::load_boundary(&tables, &config, run_number);
        cycle_param.cycle_times = detect::detect_cycles(&tables, &config, run_number)?;
        if cycle_param.has_cycle_times() {
            cycle_param.align_periods();
        }
        Ok(Self::assemble(config, vec![header], tables, cycle_param))
    }

    pub(crate) fn assemble(
        config: Arc<RunConfig>,
        headers: Vec<RunHeader>,
        tables: TableSet,
        cycle_param: BoundaryTable,
    ) -> Run {
        let tables = Arc::new(tables);
        let epics = SlowControl::new(
            config
                .epics_tables
                .iter()
                .filter_map(|name| tables.get(name).ok())
                .collect(),
        );
        Run {
            view: TimeWindowView::new(tables.clone(), f64::NEG_INFINITY, f64::INFINITY),
            config,
            headers,
            tables,
            epics,
            cycle_param,
            generation: 0,
            cycle_cache: Mutex::new((0, FxHashMap::default())),
            hits_hist: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn into_parts(self) -> (Arc<RunConfig>, Vec<RunHeader>, Arc<TableSet>, BoundaryTable) {
        (self.config, self.headers, self.tables, self.cycle_param)
    }

    pub fn headers(&self) -> &[RunHeader] {
        &self.headers
    }

    pub fn tables(&self) -> &Arc<TableSet> {
        &self.tables
    }

    pub fn ncycles(&self) -> usize {
        self.cycle_param.ncycles()
    }

    fn bump_generation(&mut self) {
        self.generation += 1;
    }

    /// Fetch a cycle by index regardless of the cycle filter; negative
    /// indices count from the end. Cycles are cached per generation, so
    /// repeated access returns the same object until a timing edit.
    pub fn cycle(&self, index: isize) -> Result<Arc<Cycle>, ConfigError> {
        if !self.cycle_param.has_cycle_times() {
            return Err(ConfigError::CycleTimesUnset(self.run_number()));
        }
        let ncycles = self.ncycles();
        let resolved = if index < 0 {
            index + ncycles as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= ncycles {
            return Err(ConfigError::CycleIndexOutOfRange {
                run: self.run_number(),
                index,
                ncycles,
            });
        }
        let resolved = resolved as usize;

        let mut cache = self
            .cycle_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if cache.0 != self.generation {
            cache.1.clear();
            cache.0 = self.generation;
        }
        if let Some(cycle) = cache.1.get(&resolved) {
            return Ok(cycle.clone());
        }

        let cycle = Arc::new(self.make_cycle(resolved));
        cache.1.insert(resolved, cycle.clone());
        Ok(cycle)
    }

    fn make_cycle(&self, index: usize) -> Cycle {
        let times = &self.cycle_param.cycle_times[index];
        let (nperiods, _) = self.cycle_param.period_end_times.dim();
        let period_end_times: Vec<f64> = (0..nperiods)
            .map(|p| self.cycle_param.period_end_times[[p, index]])
            .collect();
        let period_durations: Vec<f64> = (0..nperiods)
            .map(|p| self.cycle_param.period_durations[[p, index]])
            .collect();
        Cycle::from_parts(CycleParts {
            config: self.config.clone(),
            run_number: self.run_number(),
            index,
            supercycle: times.supercycle,
            offset: times.offset,
            start: times.start,
            stop: times.stop,
            view: self.view.narrowed(times.start, times.stop),
            epics: self.epics.sliced(times.start, times.stop),
            period_end_times,
            period_durations,
            valve_states: self.cycle_param.valve_states.clone(),
            frame_times: self.cycle_param.frame_times_in(times.start, times.stop),
            hits_hist: self.hits_hist.clone(),
        })
    }

    /// All accepted cycles in index order. A set filter hides rejected
    /// cycles here but never from `cycle()`.
    pub fn cycles(&self) -> BroadcastList<Arc<Cycle>> {
        (0..self.ncycles())
            .filter(|&i| self.cycle_param.is_accepted(i))
            .filter_map(|i| self.cycle(i as isize).ok())
            .collect()
    }

    /// Cycles `start..stop`, with the same slice of the filter applied
    /// when one is set and not all-true.
    pub fn slice(&self, start: usize, stop: usize) -> Result<BroadcastList<Arc<Cycle>>, ConfigError> {
        if !self.cycle_param.has_cycle_times() {
            return Err(ConfigError::CycleTimesUnset(self.run_number()));
        }
        let stop = stop.min(self.ncycles());
        let start = start.min(stop);
        let apply_filter = match &self.cycle_param.filter {
            Some(mask) => !mask.iter().all(|&keep| keep),
            None => false,
        };
        (start..stop)
            .filter(|&i| !apply_filter || self.cycle_param.is_accepted(i))
            .map(|i| self.cycle(i as isize))
            .collect()
    }

    /// Replace the cycle acceptance filter; `None` accepts everything.
    pub fn set_cycle_filter(&mut self, filter: Option<Vec<bool>>) -> Result<(), ConfigError> {
        self.cycle_param.set_filter(filter)
    }

    /// Run the data sufficiency battery over every cycle and return the
    /// acceptance mask. Failures are logged, not raised.
    pub fn gen_cycle_filter(&self, strict: bool) -> Result<Vec<bool>, ConfigError> {
        let mut mask = Vec::with_capacity(self.ncycles());
        let mut prev_beam = None;
        for i in 0..self.ncycles() {
            let cycle = self.cycle(i as isize)?;
            let accepted = match cycle.check_data(prev_beam.as_ref(), strict) {
                Ok(()) => true,
                Err(error) => {
                    log::warn!("{error}");
                    false
                }
            };
            mask.push(accepted);
            prev_beam = cycle.beam1a_current_ua().ok();
        }
        Ok(mask)
    }

    /// Re-detect cycle times with a single strategy, discarding the
    /// filter and every cached view.
    pub fn set_cycle_times(&mut self, mode: DetectionMode) -> Result<(), CycleError> {
        let times = detect::detect_with_mode(&self.tables, &self.config, self.run_number(), mode)?;
        self.cycle_param.cycle_times = times;
        self.cycle_param.filter = None;
        self.cycle_param.align_periods();
        self.bump_generation();
        Ok(())
    }

    /// Shift a period's boundaries. See `BoundaryTable::modify_timing`
    /// for the propagation rules; views built before the edit are
    /// invalidated.
    pub fn modify_timing(
        &mut self,
        cycle: usize,
        period: usize,
        dt_start: f64,
        dt_stop: f64,
    ) -> Result<(), ConfigError> {
        if !self.cycle_param.has_cycle_times() {
            return Err(ConfigError::CycleTimesUnset(self.run_number()));
        }
        if cycle >= self.ncycles() {
            return Err(ConfigError::CycleIndexOutOfRange {
                run: self.run_number(),
                index: cycle as isize,
                ncycles: self.ncycles(),
            });
        }
        if period >= self.cycle_param.nperiods {
            return Err(ConfigError::PeriodIndexOutOfRange {
                run: self.run_number(),
                cycle,
                index: period as isize,
                nperiods: self.cycle_param.nperiods,
            });
        }
        self.cycle_param
            .modify_timing(cycle, period, dt_start, dt_stop, true);
        self.bump_generation();
        Ok(())
    }

    /// Inject frame marker timestamps, enabling the frame level of the
    /// hierarchy.
    pub fn set_frame_times(&mut self, mut times: Vec<f64>) {
        times.sort_by(f64::total_cmp);
        self.cycle_param.frame_times = Some(times);
        self.bump_generation();
    }

    /// Read frame markers from a marker channel of an event table and
    /// inject them: rows where `column == value` contribute their
    /// timestamps.
    pub fn set_frame_times_from_channel(
        &mut self,
        table: &str,
        column: &str,
        value: f64,
    ) -> Result<(), RunError> {
        let table = self.tables.get(table)?;
        let marked = table.filter_eq(column, value)?;
        self.set_frame_times(marked.time.unwrap_or_default());
        Ok(())
    }

    /// Shift all frame markers by `dt`. Rejected when any marker would go
    /// negative or move past the end of the last cycle.
    pub fn offset_frames(&mut self, dt: f64) -> Result<(), RunError> {
        let Some(times) = &self.cycle_param.frame_times else {
            return Err(RunError::BadFrameOffset {
                run: self.run_number(),
                reason: String::from("no frame times set"),
            });
        };
        let shifted: Vec<f64> = times.iter().map(|&t| t + dt).collect();
        if shifted.iter().any(|&t| t < 0.0) {
            return Err(RunError::BadFrameOffset {
                run: self.run_number(),
                reason: String::from("would create frames with negative start times"),
            });
        }
        let run_end = self
            .cycle_param
            .cycle_times
            .iter()
            .map(|ct| ct.stop)
            .fold(f64::NEG_INFINITY, f64::max);
        if shifted.iter().any(|&t| t > run_end) {
            return Err(RunError::BadFrameOffset {
                run: self.run_number(),
                reason: String::from("would create frames starting after the end of the run"),
            });
        }
        self.cycle_param.frame_times = Some(shifted);
        self.bump_generation();
        Ok(())
    }

    /// Beam-on duration in seconds for every cycle, from the KSM readback
    /// nearest each cycle start.
    pub fn beam_on_s(&self) -> Result<Vec<f64>, MissingDataError> {
        self.beam_durations(true)
    }

    pub fn beam_off_s(&self) -> Result<Vec<f64>, MissingDataError> {
        self.beam_durations(false)
    }

    fn beam_durations(&self, on: bool) -> Result<Vec<f64>, MissingDataError> {
        self.cycle_param
            .cycle_times
            .iter()
            .map(|ct| beam_duration_at(&self.epics, ct.start, on))
            .collect()
    }

    fn pick_cycles(&self, pick: Pick) -> Result<OneOrMany<Arc<Cycle>>, ConfigError> {
        match pick {
            Pick::At(i) => Ok(OneOrMany::One(self.cycle(i)?)),
            Pick::All => Ok(OneOrMany::Many(self.cycles())),
            Pick::Range(a, b) => Ok(OneOrMany::Many(self.slice(a, b)?)),
        }
    }

    /// Structured `(cycle, period)` selection: when the cycle selector
    /// yields a collection, the period selector is applied per cycle and
    /// the result nests accordingly.
    pub fn select_periods(
        &self,
        cycles: Pick,
        periods: Pick,
    ) -> Result<PeriodSelection, ConfigError> {
        match self.pick_cycles(cycles)? {
            OneOrMany::One(cycle) => Ok(match pick_periods(&cycle, periods)? {
                OneOrMany::One(period) => PeriodSelection::One(period),
                OneOrMany::Many(list) => PeriodSelection::Many(list),
            }),
            OneOrMany::Many(cycle_list) => match periods {
                Pick::At(i) => cycle_list
                    .iter()
                    .map(|c| c.period(i))
                    .collect::<Result<BroadcastList<_>, _>>()
                    .map(PeriodSelection::Many),
                _ => cycle_list
                    .iter()
                    .map(|c| match pick_periods(c, periods)? {
                        OneOrMany::Many(list) => Ok(list),
                        OneOrMany::One(period) => Ok(BroadcastList::new(vec![period])),
                    })
                    .collect::<Result<BroadcastList<_>, ConfigError>>()
                    .map(PeriodSelection::Grouped),
            },
        }
    }

    /// Structured `(cycle, period, frame)` selection.
    pub fn select_frames(
        &self,
        cycles: Pick,
        periods: Pick,
        frames: Pick,
    ) -> Result<FrameSelection, ConfigError> {
        match self.select_periods(cycles, periods)? {
            PeriodSelection::One(period) => Ok(match pick_frames(&period, frames)? {
                OneOrMany::One(frame) => FrameSelection::One(frame),
                OneOrMany::Many(list) => FrameSelection::Many(list),
            }),
            PeriodSelection::Many(list) => match frames {
                Pick::At(i) => list
                    .iter()
                    .map(|p| p.frame(i))
                    .collect::<Result<BroadcastList<_>, _>>()
                    .map(FrameSelection::Many),
                _ => list
                    .iter()
                    .map(|p| frames_of(p, frames))
                    .collect::<Result<BroadcastList<_>, ConfigError>>()
                    .map(FrameSelection::Grouped),
            },
            PeriodSelection::Grouped(groups) => match frames {
                Pick::At(i) => groups
                    .iter()
                    .map(|list| {
                        list.iter()
                            .map(|p| p.frame(i))
                            .collect::<Result<BroadcastList<_>, _>>()
                    })
                    .collect::<Result<BroadcastList<_>, ConfigError>>()
                    .map(FrameSelection::Grouped),
                _ => groups
                    .iter()
                    .map(|list| {
                        list.iter()
                            .map(|p| frames_of(p, frames))
                            .collect::<Result<BroadcastList<_>, ConfigError>>()
                    })
                    .collect::<Result<BroadcastList<_>, ConfigError>>()
                    .map(FrameSelection::GroupedByCycle),
            },
        }
    }
}

fn pick_periods(cycle: &Cycle, pick: Pick) -> Result<OneOrMany<Arc<Period>>, ConfigError> {
    match pick {
        Pick::At(i) => Ok(OneOrMany::One(cycle.period(i)?)),
        Pick::All => Ok(OneOrMany::Many(cycle.periods())),
        Pick::Range(a, b) => Ok(OneOrMany::Many(cycle.periods().slice(a, b))),
    }
}

fn pick_frames(period: &Period, pick: Pick) -> Result<OneOrMany<Arc<Frame>>, ConfigError> {
    match pick {
        Pick::At(i) => Ok(OneOrMany::One(period.frame(i)?)),
        Pick::All => Ok(OneOrMany::Many(period.frames())),
        Pick::Range(a, b) => Ok(OneOrMany::Many(period.frames().slice(a, b))),
    }
}

fn frames_of(period: &Period, pick: Pick) -> Result<BroadcastList<Arc<Frame>>, ConfigError> {
    match pick_frames(period, pick)? {
        OneOrMany::Many(list) => Ok(list),
        OneOrMany::One(frame) => Ok(BroadcastList::new(vec![frame])),
    }
}

impl NodeAccess for Run {
    fn config(&self) -> &RunConfig {
        &self.config
    }

    fn run_number(&self) -> i32 {
        self.headers.first().map(|h| h.run_number).unwrap_or(0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Column, Table, TableKind};

    fn column(name: &str, values: Vec<f64>) -> Column {
        Column {
            name: name.to_string(),
            values,
        }
    }

    fn table(name: &str, time: Option<Vec<f64>>, columns: Vec<Column>) -> Table {
        Table {
            name: name.to_string(),
            kind: TableKind::EventList,
            time,
            columns,
            sum: 0.0,
            entries: 0,
        }
    }

    /// Three 100 s cycles starting at 1000/1100/1200, four 25 s periods
    /// each, slow control data from 990 to 1350 s. Li6 hits per period:
    /// 3, 1, 2, 1.
    fn fixture_tables() -> TableSet {
        let mut set = TableSet::default();

        let epics_time: Vec<f64> = (0..73).map(|i| 990.0 + 5.0 * i as f64).collect();
        let n = epics_time.len();
        set.insert(table(
            "BeamlineEpics",
            Some(epics_time),
            vec![
                column("B1_FOIL_ADJCUR", vec![1.0; n]),
                column("B1V_KSM_PREDCUR", vec![10.0; n]),
                column("B1V_KSM_BONPRD", vec![1.0; n]),
                column("B1V_KSM_RDBEAMON_VAL1", vec![64800.0; n]),
                column("B1V_KSM_RDBEAMOFF_VAL1", vec![43200.0; n]),
            ],
        ));
        set.insert(table(
            "SequencerTree",
            Some(vec![990.0, 1350.0]),
            vec![
                column("sequencerEnabled", vec![1.0, 1.0]),
                column("inCycle", vec![0.0, 0.0]),
                column("cycleStarted", vec![0.0, 0.0]),
            ],
        ));

        let starts = [1000.0, 1100.0, 1200.0];
        let mut trans_cols = vec![column("cycleStartTime", starts.to_vec())];
        for p in 0..4 {
            trans_cols.push(column(
                &format!("cyclePeriod{p}EndTime"),
                starts.iter().map(|s| s + 25.0 * (p + 1) as f64).collect(),
            ));
        }
        let valves = [[1.0, 0.0], [0.0, 0.0], [0.0, 1.0], [0.0, 0.0]];
        for (p, states) in valves.iter().enumerate() {
            trans_cols.push(column(&format!("valveStatePeriod{p}"), states.to_vec()));
        }
        set.insert(table("RunTransitions_Li6", Some(starts.to_vec()), trans_cols));

        set.insert(table(
            "CycleParamTree",
            None,
            vec![
                column("nPeriods", vec![4.0]),
                column("nSuperCyc", vec![1.0]),
                column("enable", vec![1.0]),
                column("infCyclesEnable", vec![0.0]),
            ],
        ));

        let mut hits = Vec::new();
        for start in starts {
            hits.extend([start + 1.0, start + 2.0, start + 3.0]);
            hits.push(start + 26.0);
            hits.extend([start + 51.0, start + 52.0]);
            hits.push(start + 76.0);
        }
        set.insert(Table::new_event_list("UCNHits_Li6", hits));

        set
    }

    fn fixture_run() -> Run {
        let mut config = RunConfig::default();
        config.cycle_times_mode = vec![DetectionMode::Li6];
        let header = RunHeader {
            run_number: 1846,
            ..Default::default()
        };
        Run::from_tables(header, fixture_tables(), Arc::new(config)).unwrap()
    }

    #[test]
    fn test_detection_and_period_structure() {
        let run = fixture_run();
        assert_eq!(run.ncycles(), 3);
        assert_eq!(run.cycle_param.nperiods, 4);

        let last = run.cycle(2).unwrap();
        assert_eq!(last.start, 1200.0);
        // last cycle extends to the end of the slow control data
        assert_eq!(last.stop, 1350.0);
        assert_eq!(last.duration, 150.0);

        let first = run.cycle(0).unwrap();
        assert_eq!(first.duration, 100.0);
        assert_eq!(first.period_durations(), &[25.0, 25.0, 25.0, 25.0]);
    }

    #[test]
    fn test_negative_indexing_and_bounds() {
        let run = fixture_run();
        assert_eq!(run.cycle(-1).unwrap().index, 2);
        assert!(matches!(
            run.cycle(3),
            Err(ConfigError::CycleIndexOutOfRange { .. })
        ));
        let cycle = run.cycle(0).unwrap();
        assert_eq!(cycle.period(-1).unwrap().index, 3);
        assert!(matches!(
            cycle.period(4),
            Err(ConfigError::PeriodIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_cycle_cache_identity_and_invalidation() {
        let mut run = fixture_run();
        let a = run.cycle(0).unwrap();
        let b = run.cycle(0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        run.modify_timing(0, 1, 0.0, -5.0).unwrap();
        let c = run.cycle(0).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_window_correctness_for_periods() {
        let run = fixture_run();
        for cycle in &run.cycles() {
            for period in &cycle.periods() {
                let hits = period.get_hits("Li6").unwrap();
                assert!(hits.iter().all(|&t| t >= period.start && t <= period.stop));
            }
        }
        // known per-period counts
        let cycle = run.cycle(1).unwrap();
        let counts: Vec<usize> = cycle
            .periods()
            .iter()
            .map(|p| p.get_nhits("Li6").unwrap())
            .collect();
        assert_eq!(counts, vec![3, 1, 2, 1]);
    }

    #[test]
    fn test_get_counts_error_propagation() {
        let run = fixture_run();
        let period = run.cycle(0).unwrap().period(0).unwrap();

        let (counts, dcounts) = period.get_counts("Li6", None, None, None, None).unwrap();
        assert_eq!(counts, 3.0);
        assert!((dcounts - 3.0_f64.sqrt()).abs() < 1e-12);

        // background floored at zero
        let (counts, _) = period
            .get_counts("Li6", Some(10.0), None, None, None)
            .unwrap();
        assert_eq!(counts, 0.0);

        // quadrature propagation through background and normalization
        let (counts, dcounts) = period
            .get_counts("Li6", Some(1.0), Some(0.5), Some(2.0), Some(0.1))
            .unwrap();
        assert_eq!(counts, 1.0);
        let dc = (3.0_f64 + 0.25).sqrt();
        let expected = ((dc / 2.0).powi(2) + (2.0_f64 * 0.1 / 4.0).powi(2)).sqrt();
        assert!((dcounts - expected).abs() < 1e-12);
    }

    #[test]
    fn test_filter_affects_iteration_not_indexing() {
        let mut run = fixture_run();
        run.set_cycle_filter(Some(vec![true, false, true])).unwrap();

        // point access ignores the filter
        assert_eq!(run.cycle(1).unwrap().index, 1);

        let indices: Vec<usize> = run.cycles().iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2]);

        let sliced: Vec<usize> = run.slice(0, 3).unwrap().iter().map(|c| c.index).collect();
        assert_eq!(sliced, vec![0, 2]);

        // all-true filters behave like no filter
        run.set_cycle_filter(Some(vec![true, true, true])).unwrap();
        assert_eq!(run.slice(0, 3).unwrap().len(), 3);

        assert!(matches!(
            run.set_cycle_filter(Some(vec![true])),
            Err(ConfigError::BadFilterLength { .. })
        ));
    }

    #[test]
    fn test_modify_timing_shifts_boundaries() {
        let mut run = fixture_run();
        run.modify_timing(2, 1, 0.0, -10.0).unwrap();

        let cycle = run.cycle(2).unwrap();
        assert_eq!(cycle.period_durations()[1], 15.0);
        assert_eq!(cycle.period_durations()[2], 35.0);
        // hits move with the boundary: period 2 now starts at +40
        assert_eq!(cycle.period(2).unwrap().start, 1240.0);
        // untouched cycles keep their structure
        assert_eq!(run.cycle(1).unwrap().period_durations()[1], 25.0);
    }

    #[test]
    fn test_frames_last_clamped_to_period_stop() {
        let mut run = fixture_run();
        run.set_frame_times(vec![1001.5, 1010.0, 1020.0, 1030.0]);

        let period = run.cycle(0).unwrap().period(0).unwrap();
        assert_eq!(period.nframes(), 3);
        let last = period.frame(-1).unwrap();
        assert_eq!(last.start, 1020.0);
        assert_eq!(last.stop, 1025.0);

        let first = period.frame(0).unwrap();
        assert_eq!((first.start, first.stop), (1001.5, 1010.0));
        assert!(matches!(
            period.frame(3),
            Err(ConfigError::FrameIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_frame_times_from_marker_channel() {
        let mut tables = fixture_tables();
        tables.insert(table(
            "ChopperMarkers",
            Some(vec![1001.5, 1005.0, 1010.0]),
            vec![column("channel", vec![7.0, 1.0, 7.0])],
        ));
        let mut config = RunConfig::default();
        config.cycle_times_mode = vec![DetectionMode::Li6];
        let header = RunHeader {
            run_number: 1846,
            ..Default::default()
        };
        let mut run = Run::from_tables(header, tables, Arc::new(config)).unwrap();

        run.set_frame_times_from_channel("ChopperMarkers", "channel", 7.0)
            .unwrap();
        let period = run.cycle(0).unwrap().period(0).unwrap();
        assert_eq!(period.nframes(), 2);
        assert_eq!(period.frame(0).unwrap().start, 1001.5);
    }

    #[test]
    fn test_offset_frames_bounds() {
        let mut run = fixture_run();
        run.set_frame_times(vec![1001.5, 1010.0]);
        assert!(run.offset_frames(1000.0).is_err());
        assert!(run.offset_frames(-2000.0).is_err());

        run.offset_frames(1.0).unwrap();
        let period = run.cycle(0).unwrap().period(0).unwrap();
        assert_eq!(period.frame(0).unwrap().start, 1002.5);
    }

    #[test]
    fn test_structured_selection_shapes() {
        let run = fixture_run();

        match run.select_periods(Pick::At(0), Pick::At(1)).unwrap() {
            PeriodSelection::One(p) => assert_eq!((p.cycle, p.index), (0, 1)),
            other => panic!("expected a single period, got {other:?}"),
        }

        match run.select_periods(Pick::All, Pick::At(1)).unwrap() {
            PeriodSelection::Many(list) => {
                assert_eq!(list.len(), 3);
                assert!(list.iter().all(|p| p.index == 1));
            }
            other => panic!("expected a flat list, got {other:?}"),
        }

        match run.select_periods(Pick::Range(1, 3), Pick::All).unwrap() {
            PeriodSelection::Grouped(groups) => {
                assert_eq!(groups.len(), 2);
                assert!(groups.iter().all(|g| g.len() == 4));
                assert_eq!(groups[0][0].cycle, 1);
            }
            other => panic!("expected nested lists, got {other:?}"),
        }
    }

    #[test]
    fn test_quality_battery_flags_beam_dropout() {
        let mut tables = fixture_tables();
        // zero out the 1A current at t = 1150, inside cycle 1
        let epics = tables.get("BeamlineEpics").unwrap();
        let mut broken = (*epics).clone();
        for col in &mut broken.columns {
            if col.name == "B1_FOIL_ADJCUR" {
                let t = broken.time.as_ref().unwrap();
                for (i, &time) in t.iter().enumerate() {
                    if time == 1150.0 {
                        col.values[i] = 0.0;
                    }
                }
            }
        }
        tables.insert(broken);

        let mut config = RunConfig::default();
        config.cycle_times_mode = vec![DetectionMode::Li6];
        let header = RunHeader {
            run_number: 1846,
            ..Default::default()
        };
        let run = Run::from_tables(header, tables, Arc::new(config)).unwrap();

        let mask = run.gen_cycle_filter(false).unwrap();
        assert_eq!(mask, vec![true, false, true]);
    }

    #[test]
    fn test_pileup_detected_at_period_start() {
        let mut tables = fixture_tables();
        // 20 hits in the first millisecond of cycle 0, then quiet cycles
        let mut hits: Vec<f64> = (0..20).map(|i| 1000.5 + 1e-5 * i as f64).collect();
        hits.extend([1101.0, 1102.0, 1103.0]);
        tables.insert(Table::new_event_list("UCNHits_Li6", hits));

        let mut config = RunConfig::default();
        config.cycle_times_mode = vec![DetectionMode::Li6];
        let header = RunHeader {
            run_number: 1846,
            ..Default::default()
        };
        let run = Run::from_tables(header, tables, Arc::new(config)).unwrap();

        let burst = run.cycle(0).unwrap().period(0).unwrap();
        assert!(burst.is_pileup("Li6").unwrap());

        let quiet = run.cycle(1).unwrap().period(0).unwrap();
        assert!(!quiet.is_pileup("Li6").unwrap());

        // a period without hits is not piled up
        let empty = run.cycle(2).unwrap().period(1).unwrap();
        assert!(!empty.is_pileup("Li6").unwrap());
    }

    #[test]
    fn test_degraded_run_refuses_cycle_indexing() {
        let mut set = TableSet::default();
        set.insert(table(
            "BeamlineEpics",
            Some(vec![990.0, 1350.0]),
            vec![column("B1_FOIL_ADJCUR", vec![1.0, 1.0])],
        ));
        // sequencer enabled but no usable detection source
        set.insert(table(
            "SequencerTree",
            Some(vec![990.0, 1350.0]),
            vec![
                column("sequencerEnabled", vec![1.0, 1.0]),
                column("inCycle", vec![0.0, 0.0]),
                column("cycleStarted", vec![0.0, 0.0]),
            ],
        ));
        let header = RunHeader {
            run_number: 1846,
            ..Default::default()
        };
        let run = Run::from_tables(header, set, Arc::new(RunConfig::default())).unwrap();

        assert!(matches!(
            run.cycle(0),
            Err(ConfigError::CycleTimesUnset(1846))
        ));
        // table access still works in degraded mode
        assert!(run.view().get("BeamlineEpics").is_ok());
    }

    #[test]
    fn test_hits_histogram_cached_and_trimmed() {
        let run = fixture_run();
        let full = run.get_hits_histogram("Li6", 1000).unwrap();
        assert_eq!(full.sum, 21.0);

        let cycle = run.cycle(0).unwrap();
        let trimmed = cycle.get_hits_histogram("Li6", 1000).unwrap();
        assert!(trimmed.sum <= full.sum);
        assert!(trimmed.x.iter().all(|&t| t >= cycle.start && t < cycle.stop));
    }

    #[test]
    fn test_beam_properties() {
        let run = fixture_run();
        let on = run.beam_on_s().unwrap();
        assert_eq!(on.len(), 3);
        assert!((on[0] - 64800.0 * crate::node::BEAM_BUCKET_DURATION_S).abs() < 1e-9);

        let cycle = run.cycle(0).unwrap();
        let current = cycle.beam1u_current_ua().unwrap();
        assert!(!current.is_empty());
        assert!(current.values.iter().all(|&v| v == 10.0));
    }
}
