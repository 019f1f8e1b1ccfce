use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::config::Config;
use super::error::ProcessorError;
use super::run::Run;
use super::worker_status::{Phase, WorkerStatus};

/// Load one run, detect its cycle structure and apply the data
/// sufficiency filter. Each stage reports through the status channel.
pub fn process_run(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<Run, ProcessorError> {
    tx.send(WorkerStatus::new(
        0.0,
        run_number,
        *worker_id,
        Phase::Loading,
    ))?;

    let mut run = Run::from_run_number(run_number, Arc::new(config.run.clone()))?;
    tx.send(WorkerStatus::new(
        0.5,
        run_number,
        *worker_id,
        Phase::Filtering,
    ))?;

    match run.gen_cycle_filter(false) {
        Ok(mask) => {
            let rejected = mask.iter().filter(|&&accepted| !accepted).count();
            if rejected > 0 {
                log::info!("Run {run_number}: filtered out {rejected} cycles");
            }
            run.set_cycle_filter(Some(mask))?;
        }
        Err(e) => {
            log::warn!("Run {run_number}: no cycle filter generated: {e}");
        }
    }

    tx.send(WorkerStatus::new(1.0, run_number, *worker_id, Phase::Done))?;
    Ok(run)
}

/// Process every run in the configured range. Useful when no worker pool
/// is wanted.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<Run>, ProcessorError> {
    let runs = (config.first_run_number..(config.last_run_number + 1)).collect();
    process_subset(config, tx, worker_id, runs)
}

/// Process a subset of runs, one worker's share of the range.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<i32>,
) -> Result<Vec<Run>, ProcessorError> {
    let mut runs = Vec::new();
    for run in subset {
        if config.does_run_exist(run) {
            log::info!("Processing run {}...", run);
            match process_run(&config, run, &tx, &worker_id) {
                Ok(loaded) => runs.push(loaded),
                Err(error) => {
                    tx.send(WorkerStatus::new(1.0, run, worker_id, Phase::Failed))?;
                    return Err(error);
                }
            }
            log::info!("Finished processing run {}.", run);
        } else {
            log::info!("Run {} does not exist, skipping...", run);
        }
    }
    Ok(runs)
}

/// Divide a run range in to a set of subranges (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_subsets_cover_range_round_robin() {
        let config = Config {
            first_run_number: 1846,
            last_run_number: 1850,
            n_threads: 2,
            ..Default::default()
        };
        let subsets = create_subsets(&config);
        assert_eq!(subsets.len(), 2);
        assert_eq!(subsets[0], vec![1846, 1848, 1850]);
        assert_eq!(subsets[1], vec![1847, 1849]);
    }

    #[test]
    fn test_missing_runs_are_skipped_silently() {
        let config = Config {
            first_run_number: 1,
            last_run_number: 2,
            n_threads: 1,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel();
        let runs = process_subset(config, tx, 0, vec![1, 2]).unwrap();
        assert!(runs.is_empty());
        // no run files, so no status was ever reported
        assert!(rx.try_recv().is_err());
    }
}
