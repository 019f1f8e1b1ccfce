//! Combine runs taken back to back into a single run object.
//!
//! Run numbers are assumed chronological: inputs are sorted by number and
//! their tables stacked in that order. Histograms are combined bin-wise
//! with errors added in quadrature; boundary state is combined field by
//! field with the rules each field calls for.

use fxhash::FxHashMap;
use ndarray::Array2;
use std::sync::Arc;

use super::boundary::BoundaryTable;
use super::error::MergeError;
use super::run::Run;
use super::table::{Column, Table, TableKind, TableSet};

/// Merge a list of runs into one. Fails when the inputs disagree on
/// valve states or contain a table of unrecognized kind.
pub fn merge(runs: Vec<Run>) -> Result<Run, MergeError> {
    if runs.is_empty() {
        return Err(MergeError::NoRuns);
    }

    let mut parts: Vec<_> = runs.into_iter().map(Run::into_parts).collect();
    parts.sort_by_key(|(_, headers, _, _)| headers.first().map(|h| h.run_number).unwrap_or(0));

    let config = parts[0].0.clone();
    let headers: Vec<_> = parts
        .iter()
        .flat_map(|(_, headers, _, _)| headers.iter().cloned())
        .collect();

    let boundaries: Vec<&BoundaryTable> = parts.iter().map(|(_, _, _, b)| b).collect();
    let cycle_param = merge_boundaries(&boundaries)?;

    let table_sets: Vec<&Arc<TableSet>> = parts.iter().map(|(_, _, tables, _)| tables).collect();
    let tables = merge_tables(&table_sets)?;

    Ok(Run::assemble(config, headers, tables, cycle_param))
}

/// Merge the runs named in `numbers` and leave the rest untouched. The
/// merged run takes the list position of its first constituent.
pub fn merge_inlist(runs: Vec<Run>, numbers: &[i32]) -> Result<Vec<Run>, MergeError> {
    let present: Vec<i32> = runs
        .iter()
        .filter_map(|r| r.headers().first().map(|h| h.run_number))
        .collect();
    for &n in numbers {
        if !present.contains(&n) {
            return Err(MergeError::RunNotFound(n));
        }
    }

    let mut selected = Vec::new();
    let mut kept = Vec::new();
    let mut insert_at = None;
    for run in runs {
        let number = run.headers().first().map(|h| h.run_number).unwrap_or(0);
        if numbers.contains(&number) {
            if insert_at.is_none() {
                insert_at = Some(kept.len());
            }
            selected.push(run);
        } else {
            kept.push(run);
        }
    }

    let merged = merge(selected)?;
    let at = insert_at.unwrap_or(kept.len());
    kept.insert(at, merged);
    Ok(kept)
}

fn merge_boundaries(boundaries: &[&BoundaryTable]) -> Result<BoundaryTable, MergeError> {
    let first = boundaries[0];

    // valve states must agree across runs
    for b in &boundaries[1..] {
        if b.valve_states != first.valve_states {
            return Err(MergeError::ValveMismatch);
        }
    }

    let cycle_times: Vec<_> = boundaries
        .iter()
        .flat_map(|b| b.cycle_times.iter().cloned())
        .collect();

    // period matrices stack along the cycle axis; runs with fewer periods
    // are padded with NaN rows
    let nperiods = boundaries.iter().map(|b| b.nperiods).max().unwrap_or(0);
    let ncycles: usize = boundaries.iter().map(|b| b.ncycles()).sum();
    let stack = |pick: fn(&BoundaryTable) -> &Array2<f64>| -> Array2<f64> {
        let mut out = Array2::from_elem((nperiods, ncycles), f64::NAN);
        let mut col = 0;
        for b in boundaries {
            let src = pick(b);
            let (np_src, nc_src) = src.dim();
            for c in 0..nc_src {
                for p in 0..np_src {
                    out[[p, col + c]] = src[[p, c]];
                }
            }
            col += b.ncycles();
        }
        out
    };
    let period_end_times = stack(|b| &b.period_end_times);
    let period_durations = stack(|b| &b.period_durations);

    // filters concatenate; a run without one accepts all of its cycles
    let filter = if boundaries.iter().any(|b| b.filter.is_some()) {
        let mut mask = Vec::with_capacity(ncycles);
        for b in boundaries {
            match &b.filter {
                Some(m) => mask.extend_from_slice(m),
                None => mask.extend(std::iter::repeat(true).take(b.ncycles())),
            }
        }
        Some(mask)
    } else {
        None
    };

    let frame_times = if boundaries.iter().any(|b| b.frame_times.is_some()) {
        let mut times: Vec<f64> = boundaries
            .iter()
            .filter_map(|b| b.frame_times.as_ref())
            .flatten()
            .copied()
            .collect();
        times.sort_by(f64::total_cmp);
        Some(times)
    } else {
        None
    };

    // unmodeled fields cannot be combined meaningfully
    for (name, _) in &first.aux {
        log::warn!("Merge: unrecognized boundary field \"{name}\", keeping first run's value");
    }

    Ok(BoundaryTable {
        cycle_times,
        period_end_times,
        period_durations,
        valve_states: first.valve_states.clone(),
        filter,
        nperiods,
        enable: boundaries.iter().any(|b| b.enable),
        inf_cyc_enable: boundaries.iter().any(|b| b.inf_cyc_enable),
        nsupercyc: boundaries.iter().map(|b| b.nsupercyc).sum(),
        frame_times,
        aux: first.aux.clone(),
    })
}

fn merge_tables(sets: &[&Arc<TableSet>]) -> Result<TableSet, MergeError> {
    let mut names: Vec<String> = sets
        .iter()
        .flat_map(|s| s.names().into_iter().map(str::to_string))
        .collect();
    names.sort_unstable();
    names.dedup();

    let mut out = TableSet::default();
    for name in names {
        let inputs: Vec<Arc<Table>> = sets.iter().filter_map(|s| s.get(&name).ok()).collect();
        let merged = match inputs[0].kind {
            TableKind::EventList => concat_event_lists(&name, &inputs),
            TableKind::Hist1d => sum_hist1d(&name, &inputs)?,
            TableKind::Hist2d => sum_hist2d(&name, &inputs)?,
            TableKind::Unknown => return Err(MergeError::UnrecognizedTableKind(name)),
        };
        out.insert(merged);
    }
    Ok(out)
}

/// Stack rows in input order. Column order follows the first input; a
/// later input missing a column contributes NaN for its rows.
fn concat_event_lists(name: &str, inputs: &[Arc<Table>]) -> Table {
    let time = if inputs[0].is_time_indexed() {
        Some(
            inputs
                .iter()
                .flat_map(|t| t.time.iter().flatten().copied())
                .collect(),
        )
    } else {
        None
    };

    let columns = inputs[0]
        .columns
        .iter()
        .map(|col| {
            let mut values = Vec::new();
            for t in inputs {
                match t.column(&col.name) {
                    Ok(v) => values.extend_from_slice(v),
                    Err(_) => values.extend(std::iter::repeat(f64::NAN).take(t.len())),
                }
            }
            Column {
                name: col.name.clone(),
                values,
            }
        })
        .collect();

    Table {
        name: name.to_string(),
        kind: TableKind::EventList,
        time,
        columns,
        sum: inputs.iter().map(|t| t.sum).sum(),
        entries: inputs.iter().map(|t| t.entries).sum(),
    }
}

/// Sum 1-D histograms bin by bin, keyed on the bin label, with errors
/// added in quadrature.
fn sum_hist1d(name: &str, inputs: &[Arc<Table>]) -> Result<Table, MergeError> {
    let mut bins: FxHashMap<u64, (f64, f64, f64)> = FxHashMap::default();
    for t in inputs {
        let x = hist_column(t, "x", name)?;
        let y = hist_column(t, "y", name)?;
        let dy = hist_column(t, "dy", name)?;
        for i in 0..x.len() {
            let entry = bins.entry(x[i].to_bits()).or_insert((x[i], 0.0, 0.0));
            entry.1 += y[i];
            entry.2 += dy[i] * dy[i];
        }
    }
    let mut rows: Vec<_> = bins.into_values().collect();
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));

    Ok(Table {
        name: name.to_string(),
        kind: TableKind::Hist1d,
        time: None,
        columns: vec![
            Column {
                name: String::from("x"),
                values: rows.iter().map(|r| r.0).collect(),
            },
            Column {
                name: String::from("y"),
                values: rows.iter().map(|r| r.1).collect(),
            },
            Column {
                name: String::from("dy"),
                values: rows.iter().map(|r| r.2.sqrt()).collect(),
            },
        ],
        sum: inputs.iter().map(|t| t.sum).sum(),
        entries: inputs.iter().map(|t| t.entries).sum(),
    })
}

/// Same as `sum_hist1d` but keyed on the (x, y) bin label pair.
fn sum_hist2d(name: &str, inputs: &[Arc<Table>]) -> Result<Table, MergeError> {
    let mut bins: FxHashMap<(u64, u64), (f64, f64, f64, f64)> = FxHashMap::default();
    for t in inputs {
        let x = hist_column(t, "x", name)?;
        let y = hist_column(t, "y", name)?;
        let z = hist_column(t, "z", name)?;
        let dz = hist_column(t, "dz", name)?;
        for i in 0..x.len() {
            let entry = bins
                .entry((x[i].to_bits(), y[i].to_bits()))
                .or_insert((x[i], y[i], 0.0, 0.0));
            entry.2 += z[i];
            entry.3 += dz[i] * dz[i];
        }
    }
    let mut rows: Vec<_> = bins.into_values().collect();
    rows.sort_by(|a, b| (a.0, a.1).partial_cmp(&(b.0, b.1)).unwrap_or(std::cmp::Ordering::Equal));

    Ok(Table {
        name: name.to_string(),
        kind: TableKind::Hist2d,
        time: None,
        columns: vec![
            Column {
                name: String::from("x"),
                values: rows.iter().map(|r| r.0).collect(),
            },
            Column {
                name: String::from("y"),
                values: rows.iter().map(|r| r.1).collect(),
            },
            Column {
                name: String::from("z"),
                values: rows.iter().map(|r| r.2).collect(),
            },
            Column {
                name: String::from("dz"),
                values: rows.iter().map(|r| r.3.sqrt()).collect(),
            },
        ],
        sum: inputs.iter().map(|t| t.sum).sum(),
        entries: inputs.iter().map(|t| t.entries).sum(),
    })
}

fn hist_column<'a>(table: &'a Table, col: &str, name: &str) -> Result<&'a [f64], MergeError> {
    table
        .column(col)
        .map_err(|_| MergeError::UnrecognizedTableKind(name.to_string()))
}
