//! Cycle boundary detection.
//!
//! The sequencer drives the irradiate/store/count pattern, but its log is
//! the least reliable record of it. Each detector frontend also stamps a
//! transition table at every cycle start, so boundaries are recovered from
//! whichever source the configured strategy chain trusts first. Detection
//! failures fall through to the next mode. A run recorded without an
//! active sequencer is a single cycle spanning the slow control data; an
//! exhausted chain leaves the cycle time state unset.

use ndarray::Array2;
use std::sync::Arc;

use super::boundary::{AuxValue, BoundaryTable, CycleTimes};
use super::config::{DetectionMode, RunConfig};
use super::error::{CycleError, MissingDataError};
use super::slow::SlowControl;
use super::table::{Table, TableSet};

/// Last timestamp recorded by any of the configured slow control tables.
/// Used as the end of the final cycle, which has no successor to diff against.
pub fn run_stop(
    tables: &TableSet,
    config: &RunConfig,
    run_number: i32,
) -> Result<f64, MissingDataError> {
    let mut stop = f64::NEG_INFINITY;
    for name in &config.slow_tables {
        let table = match tables.get(name) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if let Some(max) = table.time_max() {
            stop = stop.max(max);
        }
    }
    if stop.is_finite() {
        Ok(stop)
    } else {
        Err(MissingDataError::NoRunStop(run_number))
    }
}

/// Ascending, duplicate-free cycle start timestamps from a transitions table.
fn transition_starts(table: &Table) -> Result<Vec<f64>, MissingDataError> {
    let mut starts = table.column("cycleStartTime")?.to_vec();
    starts.sort_by(f64::total_cmp);
    starts.dedup();
    if starts.is_empty() {
        return Err(MissingDataError::Empty(table.name.clone()));
    }
    Ok(starts)
}

/// Supercycle index for each start time, looked up by exact timestamp.
/// Zero when the table does not carry the column.
fn supercycles_for(table: &Table, starts: &[f64]) -> Vec<i64> {
    match (table.column("superCycleIndex"), table.column("cycleStartTime")) {
        (Ok(sc), Ok(cs)) => starts
            .iter()
            .map(|&s| {
                cs.iter()
                    .position(|&t| t == s)
                    .map(|i| sc[i] as i64)
                    .unwrap_or(0)
            })
            .collect(),
        _ => vec![0; starts.len()],
    }
}

/// Build cycle rows from start times: each cycle runs until the next start,
/// the last until `run_stop`.
fn times_from_starts(
    starts: &[f64],
    supercycles: &[i64],
    offsets: Option<&[f64]>,
    run_stop: f64,
) -> Vec<CycleTimes> {
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let stop = starts.get(i + 1).copied().unwrap_or(run_stop);
            CycleTimes {
                start,
                stop,
                duration: stop - start,
                supercycle: supercycles[i],
                offset: offsets.map(|o| o[i]),
            }
        })
        .collect()
}

/// Cycle times from a single detector's transition table.
fn detect_single_source(
    tables: &TableSet,
    transitions: &str,
    run_stop: f64,
    carry_supercycle: bool,
) -> Result<Vec<CycleTimes>, CycleError> {
    let table = tables.get(transitions)?;
    let starts = transition_starts(&table)?;
    let supercycles = if carry_supercycle {
        supercycles_for(&table, &starts)
    } else {
        vec![0; starts.len()]
    };
    Ok(times_from_starts(&starts, &supercycles, None, run_stop))
}

/// Cycle times by reconciling He3 and Li6 transition timestamps.
///
/// Every (He3, Li6) pair is considered in order of increasing time
/// difference and claimed greedily; once either endpoint is claimed the
/// pair is skipped. A claimable pair further apart than the configured
/// tolerance means the frontends disagree, which fails the whole mode.
/// Start times and supercycles follow He3; the offset column records
/// He3 minus Li6 per cycle.
fn detect_matched(
    tables: &TableSet,
    config: &RunConfig,
    run_number: i32,
    run_stop: f64,
) -> Result<Vec<CycleTimes>, CycleError> {
    let he_table = tables.get(&config.he3.transitions)?;
    let li_table = tables.get(&config.li6.transitions)?;
    let he_starts = transition_starts(&he_table)?;
    let li_starts = transition_starts(&li_table)?;

    let mut pairs: Vec<(f64, f64)> = he_starts
        .iter()
        .flat_map(|&h| li_starts.iter().map(move |&l| (h, l)))
        .collect();
    pairs.sort_by(|a, b| (a.0 - a.1).abs().total_cmp(&(b.0 - b.1).abs()));

    let mut matched: Vec<(f64, f64)> = Vec::new();
    for (he, li) in pairs {
        if matched.iter().any(|&(mh, ml)| mh == he || ml == li) {
            continue;
        }
        if (he - li).abs() > config.match_tolerance_s {
            return Err(CycleError::OffsetTooLarge {
                run: run_number,
                he3: he,
                li6: li,
            });
        }
        matched.push((he, li));
    }
    matched.sort_by(|a, b| a.0.total_cmp(&b.0));

    let leftovers = |starts: &[f64], pick: fn(&(f64, f64)) -> f64| -> Vec<f64> {
        starts
            .iter()
            .copied()
            .filter(|&t| !matched.iter().any(|pair| pick(pair) == t))
            .collect()
    };
    let unmatched_he = leftovers(&he_starts, |p| p.0);
    if !unmatched_he.is_empty() {
        return Err(CycleError::Unmatched {
            run: run_number,
            detector: String::from("He3"),
            times: unmatched_he,
        });
    }
    let unmatched_li = leftovers(&li_starts, |p| p.1);
    if !unmatched_li.is_empty() {
        return Err(CycleError::Unmatched {
            run: run_number,
            detector: String::from("Li6"),
            times: unmatched_li,
        });
    }

    let starts: Vec<f64> = matched.iter().map(|&(he, _)| he).collect();
    let offsets: Vec<f64> = matched.iter().map(|&(he, li)| he - li).collect();
    let supercycles = supercycles_for(&he_table, &starts);
    Ok(times_from_starts(
        &starts,
        &supercycles,
        Some(&offsets),
        run_stop,
    ))
}

/// Cycle times from edges of the sequencer inCycle flag. A disabled
/// sequencer forces the flag low; counting starts at the first logged
/// cycleStarted and an open final cycle is closed at the last timestamp.
fn detect_sequencer(tables: &TableSet, run_number: i32) -> Result<Vec<CycleTimes>, CycleError> {
    let seq = tables.get("SequencerTree")?;
    let time = seq
        .time
        .as_ref()
        .ok_or_else(|| MissingDataError::Empty(seq.name.clone()))?;
    let enabled = seq.column("sequencerEnabled")?;
    let in_cycle = seq.column("inCycle")?;
    let started = seq.column("cycleStarted")?;

    let first = started
        .iter()
        .position(|&v| v > 0.0)
        .ok_or(CycleError::NoEdges(run_number))?;
    let flags: Vec<f64> = in_cycle
        .iter()
        .zip(enabled)
        .map(|(&c, &e)| if e > 0.0 { c } else { 0.0 })
        .collect();

    let mut starts = Vec::new();
    let mut stops = Vec::new();
    for i in (first + 1)..flags.len() {
        let diff = flags[i] - flags[i - 1];
        if diff > 0.0 {
            starts.push(time[i]);
        } else if diff < 0.0 {
            stops.push(time[i]);
        }
    }
    if starts.is_empty() {
        return Err(CycleError::NoEdges(run_number));
    }
    if starts.len() > stops.len() {
        if let Some(&last) = time.last() {
            stops.push(last);
        }
    }

    Ok(starts
        .iter()
        .zip(&stops)
        .map(|(&start, &stop)| CycleTimes {
            start,
            stop,
            duration: stop - start,
            supercycle: 0,
            offset: None,
        })
        .collect())
}

/// The whole run as one cycle spanning the observed slow control range.
fn fallback_single_cycle(
    tables: &TableSet,
    config: &RunConfig,
    run_number: i32,
) -> Result<Vec<CycleTimes>, MissingDataError> {
    let slow = SlowControl::new(
        config
            .slow_tables
            .iter()
            .filter_map(|name| tables.get(name).ok())
            .collect(),
    );
    let Some((start, stop)) = slow.observed_range() else {
        return Err(MissingDataError::NoRunStop(run_number));
    };
    Ok(vec![CycleTimes {
        start,
        stop,
        duration: stop - start,
        supercycle: 0,
        offset: None,
    }])
}

fn sequencer_active(tables: &TableSet) -> bool {
    tables
        .get("SequencerTree")
        .ok()
        .and_then(|t| t.column("sequencerEnabled").map(<[f64]>::to_vec).ok())
        .map(|col| col.iter().any(|&v| v > 0.0))
        .unwrap_or(false)
}

/// Detect cycle times with a single strategy.
pub fn detect_with_mode(
    tables: &TableSet,
    config: &RunConfig,
    run_number: i32,
    mode: DetectionMode,
) -> Result<Vec<CycleTimes>, CycleError> {
    let run_stop = run_stop(tables, config, run_number)?;
    match mode {
        DetectionMode::Matched => detect_matched(tables, config, run_number, run_stop),
        DetectionMode::Li6 => detect_single_source(tables, &config.li6.transitions, run_stop, false),
        DetectionMode::He3 => detect_single_source(tables, &config.he3.transitions, run_stop, true),
        DetectionMode::Sequencer => detect_sequencer(tables, run_number),
    }
}

/// Run the configured strategy chain. Each failing mode is logged and the
/// next one tried. A run recorded without an active sequencer is a single
/// cycle spanning the slow control data; an exhausted chain leaves the
/// cycle time state unset and returns an empty list.
pub fn detect_cycles(
    tables: &TableSet,
    config: &RunConfig,
    run_number: i32,
) -> Result<Vec<CycleTimes>, MissingDataError> {
    if !sequencer_active(tables) {
        log::info!("Run {run_number}: sequencer not enabled, treating the run as a single cycle");
        return Ok(fallback_single_cycle(tables, config, run_number)?);
    }

    for &mode in &config.cycle_times_mode {
        match detect_with_mode(tables, config, run_number, mode) {
            Ok(times) if !times.is_empty() => {
                log::info!(
                    "Run {run_number}: found {} cycles with detection mode {mode}",
                    times.len()
                );
                return Ok(times);
            }
            Ok(_) => {
                log::warn!("Run {run_number}: cycle time detection mode {mode} found no cycles");
            }
            Err(error) => {
                log::warn!("Run {run_number}: cycle time detection mode {mode} failed: {error}");
            }
        }
    }

    log::warn!("Run {run_number}: all detection modes failed, cycle time state left unset");
    Ok(Vec::new())
}

/// Read the boundary state the sequencer wrote at data-taking time: the
/// CycleParamTree scalars plus the per-period end time and valve state
/// matrices off the longest detector transition table. Cycle times are
/// detected separately; call `align_periods` once they are set.
pub fn load_boundary(tables: &TableSet, config: &RunConfig, run_number: i32) -> BoundaryTable {
    let mut boundary = BoundaryTable {
        nperiods: 1,
        ..Default::default()
    };

    if let Ok(param) = tables.get("CycleParamTree") {
        for col in &param.columns {
            let Some(&first) = col.values.first() else {
                continue;
            };
            match col.name.as_str() {
                "nPeriods" => boundary.nperiods = first as usize,
                "nSuperCyc" => boundary.nsupercyc = first as i64,
                "enable" => boundary.enable = first != 0.0,
                "infCyclesEnable" => boundary.inf_cyc_enable = first != 0.0,
                _ => {
                    // scalar flags and counters keep their type
                    let value = match col.values.as_slice() {
                        [v] if *v == 0.0 || *v == 1.0 => AuxValue::Bool(*v != 0.0),
                        [v] if v.fract() == 0.0 => AuxValue::Int(*v as i64),
                        _ => AuxValue::Series(col.values.clone()),
                    };
                    boundary.aux.insert(col.name.clone(), value);
                }
            }
        }
    }

    let transitions: Vec<Arc<Table>> = [&config.li6.transitions, &config.he3.transitions]
        .iter()
        .filter_map(|name| tables.get(name).ok())
        .collect();
    let Some(tree) = transitions.into_iter().max_by_key(|t| t.len()) else {
        log::warn!("Run {run_number}: no detector transition table, period structure unavailable");
        return boundary;
    };

    let numbered_columns = |prefix: &str, suffix: &str| -> Vec<Vec<f64>> {
        let mut cols = Vec::new();
        for p in 0.. {
            match tree.column(&format!("{prefix}{p}{suffix}")) {
                Ok(col) => cols.push(col.to_vec()),
                Err(_) => break,
            }
        }
        cols
    };

    let end_cols = numbered_columns("cyclePeriod", "EndTime");
    if !end_cols.is_empty() {
        let ncycles = end_cols[0].len();
        boundary.period_end_times =
            Array2::from_shape_fn((end_cols.len(), ncycles), |(p, c)| end_cols[p][c]);
        boundary.nperiods = end_cols.len();
    }

    let valve_cols = numbered_columns("valveStatePeriod", "");
    if !valve_cols.is_empty() {
        let nvalves = valve_cols[0].len();
        boundary.valve_states =
            Array2::from_shape_fn((valve_cols.len(), nvalves), |(p, v)| valve_cols[p][v] != 0.0);
    }

    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn transitions(name: &str, starts: Vec<f64>, supercycles: Option<Vec<f64>>) -> Table {
        let mut columns = vec![Column {
            name: String::from("cycleStartTime"),
            values: starts.clone(),
        }];
        if let Some(sc) = supercycles {
            columns.push(Column {
                name: String::from("superCycleIndex"),
                values: sc,
            });
        }
        Table {
            name: name.to_string(),
            kind: crate::table::TableKind::EventList,
            time: Some(starts),
            columns,
            sum: 0.0,
            entries: 0,
        }
    }

    fn sequencer_table(
        time: Vec<f64>,
        enabled: Vec<f64>,
        in_cycle: Vec<f64>,
        started: Vec<f64>,
    ) -> Table {
        Table {
            name: String::from("SequencerTree"),
            kind: crate::table::TableKind::EventList,
            time: Some(time),
            columns: vec![
                Column {
                    name: String::from("sequencerEnabled"),
                    values: enabled,
                },
                Column {
                    name: String::from("inCycle"),
                    values: in_cycle,
                },
                Column {
                    name: String::from("cycleStarted"),
                    values: started,
                },
            ],
            sum: 0.0,
            entries: 0,
        }
    }

    fn base_tables() -> TableSet {
        let mut set = TableSet::default();
        // slow control range defines the run stop at 1350 s
        set.insert(Table::new_event_list("BeamlineEpics", vec![990.0, 1350.0]));
        set.insert(sequencer_table(
            vec![990.0, 1350.0],
            vec![1.0, 1.0],
            vec![0.0, 0.0],
            vec![0.0, 0.0],
        ));
        set
    }

    #[test]
    fn test_li6_mode_last_cycle_extends_to_run_stop() {
        let mut set = base_tables();
        // duplicate timestamps are logged once per frontend thread
        set.insert(transitions(
            "RunTransitions_Li6",
            vec![1000.0, 1000.0, 1100.0, 1200.0],
            None,
        ));
        let config = RunConfig::default();
        let run_stop = run_stop(&set, &config, 1846).unwrap();
        let times = detect_single_source(&set, &config.li6.transitions, run_stop, false).unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0].duration, 100.0);
        assert_eq!(times[2].start, 1200.0);
        assert_eq!(times[2].stop, 1350.0);
        assert_eq!(times[2].duration, 150.0);
    }

    #[test]
    fn test_matched_pairs_and_offsets() {
        let mut set = base_tables();
        set.insert(transitions(
            "RunTransitions_He3",
            vec![1002.0, 1103.0, 1201.0],
            Some(vec![0.0, 0.0, 1.0]),
        ));
        set.insert(transitions(
            "RunTransitions_Li6",
            vec![1000.0, 1100.0, 1200.0],
            None,
        ));
        let config = RunConfig::default();
        let times = detect_matched(&set, &config, 1846, 1350.0).unwrap();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0].start, 1002.0);
        assert_eq!(times[0].offset, Some(2.0));
        assert_eq!(times[1].offset, Some(3.0));
        assert_eq!(times[2].supercycle, 1);
        assert_eq!(times[2].stop, 1350.0);
    }

    #[test]
    fn test_matched_rejects_large_offset() {
        let mut set = base_tables();
        set.insert(transitions("RunTransitions_He3", vec![1021.0], None));
        set.insert(transitions("RunTransitions_Li6", vec![1000.0], None));
        let config = RunConfig::default();
        let result = detect_matched(&set, &config, 1846, 1350.0);
        assert!(matches!(result, Err(CycleError::OffsetTooLarge { .. })));
    }

    #[test]
    fn test_matched_rejects_extra_timestamp() {
        let mut set = base_tables();
        set.insert(transitions(
            "RunTransitions_He3",
            vec![1000.0, 1100.0, 5000.0],
            None,
        ));
        set.insert(transitions("RunTransitions_Li6", vec![1001.0, 1099.0], None));
        let config = RunConfig::default();
        match detect_matched(&set, &config, 1846, 1350.0) {
            Err(CycleError::Unmatched { detector, times, .. }) => {
                assert_eq!(detector, "He3");
                assert_eq!(times, vec![5000.0]);
            }
            other => panic!("expected Unmatched, got {other:?}"),
        }
    }

    #[test]
    fn test_sequencer_edges() {
        let mut set = TableSet::default();
        set.insert(Table::new_event_list("BeamlineEpics", vec![0.0, 60.0]));
        set.insert(sequencer_table(
            vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0],
            vec![1.0; 7],
            vec![0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0],
            vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
        ));
        let times = detect_sequencer(&set, 1846).unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!((times[0].start, times[0].stop), (10.0, 30.0));
        // open final cycle closes at the last sequencer timestamp
        assert_eq!((times[1].start, times[1].stop), (40.0, 60.0));
    }

    #[test]
    fn test_inactive_sequencer_degrades_to_single_cycle() {
        let mut set = TableSet::default();
        set.insert(Table::new_event_list("BeamlineEpics", vec![990.0, 1350.0]));
        set.insert(Table::new_event_list("LNDDetectorTree", vec![980.0, 1340.0]));
        let config = RunConfig::default();
        let times = detect_cycles(&set, &config, 1846).unwrap();
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].start, 980.0);
        assert_eq!(times[0].stop, 1350.0);
    }

    #[test]
    fn test_exhausted_chain_leaves_times_unset() {
        // sequencer enabled but no transitions and no logged cycle start
        let set = base_tables();
        let config = RunConfig::default();
        let times = detect_cycles(&set, &config, 1846).unwrap();
        assert!(times.is_empty());
    }

    #[test]
    fn test_missing_slow_tables_is_an_error() {
        let set = TableSet::default();
        let config = RunConfig::default();
        assert!(matches!(
            run_stop(&set, &config, 1846),
            Err(MissingDataError::NoRunStop(1846))
        ));
    }

    #[test]
    fn test_load_boundary_matrices() {
        let mut set = TableSet::default();
        let mut tree = transitions("RunTransitions_Li6", vec![1000.0, 1100.0], None);
        for (p, ends) in [
            vec![1025.0, 1125.0],
            vec![1050.0, 1150.0],
            vec![1100.0, 1200.0],
        ]
        .into_iter()
        .enumerate()
        {
            tree.columns.push(Column {
                name: format!("cyclePeriod{p}EndTime"),
                values: ends,
            });
        }
        for (p, valves) in [vec![1.0, 0.0], vec![0.0, 0.0], vec![0.0, 1.0]]
            .into_iter()
            .enumerate()
        {
            tree.columns.push(Column {
                name: format!("valveStatePeriod{p}"),
                values: valves,
            });
        }
        set.insert(tree);
        set.insert(Table {
            name: String::from("CycleParamTree"),
            kind: crate::table::TableKind::Unknown,
            time: None,
            columns: vec![
                Column {
                    name: String::from("nPeriods"),
                    values: vec![3.0],
                },
                Column {
                    name: String::from("enable"),
                    values: vec![1.0],
                },
                Column {
                    name: String::from("nSuperCyc"),
                    values: vec![2.0],
                },
                Column {
                    name: String::from("valveDriveEnable"),
                    values: vec![1.0],
                },
                Column {
                    name: String::from("preCycleDelay"),
                    values: vec![5.0],
                },
                Column {
                    name: String::from("delayDurations"),
                    values: vec![1.5, 2.5],
                },
            ],
            sum: 0.0,
            entries: 0,
        });

        let boundary = load_boundary(&set, &RunConfig::default(), 1846);
        assert_eq!(boundary.nperiods, 3);
        assert_eq!(boundary.nsupercyc, 2);
        assert!(boundary.enable);
        assert_eq!(boundary.period_end_times.dim(), (3, 2));
        assert_eq!(boundary.period_end_times[[1, 1]], 1150.0);
        assert!(boundary.valve_states[[0, 0]]);
        assert!(!boundary.valve_states[[1, 0]]);
        assert_eq!(
            boundary.aux.get("valveDriveEnable"),
            Some(&AuxValue::Bool(true))
        );
        assert_eq!(boundary.aux.get("preCycleDelay"), Some(&AuxValue::Int(5)));
        assert_eq!(
            boundary.aux.get("delayDurations"),
            Some(&AuxValue::Series(vec![1.5, 2.5]))
        );
    }
}
