use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

/// Configuration problems are never recovered; they indicate a caller bug.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Cycle filter length {given} does not match expected number of cycles ({expected})")]
    BadFilterLength { given: usize, expected: usize },
    #[error("Run {run}: index {index} larger than number of cycles ({ncycles})")]
    CycleIndexOutOfRange {
        run: i32,
        index: isize,
        ncycles: usize,
    },
    #[error("Run {run}, cycle {cycle}: index {index} larger than number of periods ({nperiods})")]
    PeriodIndexOutOfRange {
        run: i32,
        cycle: usize,
        index: isize,
        nperiods: usize,
    },
    #[error(
        "Run {run}, cycle {cycle}, period {period}: index {index} larger than number of frames ({nframes})"
    )]
    FrameIndexOutOfRange {
        run: i32,
        cycle: usize,
        period: usize,
        index: isize,
        nframes: usize,
    },
    #[error("Run {0}: cycle times unset, cycle indexing is unavailable")]
    CycleTimesUnset(i32),
    #[error("Unknown detector \"{0}\"")]
    UnknownDetector(String),
    #[error("Number of worker threads must be at least 1, got {0}")]
    BadThreadCount(i32),
}

/// A required table or telemetry stream is absent or empty.
#[derive(Debug, Clone, Error)]
pub enum MissingDataError {
    #[error("No saved table named \"{0}\"")]
    Table(String),
    #[error("Zero entries found in table \"{0}\"")]
    Empty(String),
    #[error("No column named \"{0}\" in table \"{1}\"")]
    Column(String, String),
    #[error("No column named \"{0}\" in any slow control table")]
    SlowColumn(String),
    #[error("Run {0}: missing slow control tables, cannot find run end time")]
    NoRunStop(i32),
}

/// Boundary detection failures; caught by the strategy chain.
#[derive(Debug, Clone, Error)]
pub enum CycleError {
    #[error(
        "He3 cycle start time ({he3}) too distant from Li6 start ({li6}) in run {run}"
    )]
    OffsetTooLarge { run: i32, he3: f64, li6: f64 },
    #[error("Found no match to {detector} cycles at {times:?} in run {run}")]
    Unmatched {
        run: i32,
        detector: String,
        times: Vec<f64>,
    },
    #[error("Run {0}: no cycle start edges found in sequencer log")]
    NoEdges(i32),
    #[error("Detection failed due to missing data: {0}")]
    MissingData(#[from] MissingDataError),
}

/// Per-cycle data-sufficiency failures, surfaced through the filter generator.
#[derive(Debug, Clone, Error)]
pub enum QualityError {
    #[error("Run {run}, cycle {cycle}: No {beamline} beam data saved")]
    NoBeamData {
        run: i32,
        cycle: usize,
        beamline: String,
    },
    #[error("Run {run}, cycle {cycle}: Cycle duration nonsensical: {duration} s")]
    BadDuration { run: i32, cycle: usize, duration: f64 },
    #[error("Run {run}, cycle {cycle}: No valves operated")]
    NoValves { run: i32, cycle: usize },
    #[error(
        "Run {run}, cycle {cycle}: cycle duration ({actual:.1} s) shorter than sum of periods ({expected:.1} s)"
    )]
    PeriodOverrun {
        run: i32,
        cycle: usize,
        actual: f64,
        expected: f64,
    },
    #[error("Run {run}, cycle {cycle}: 1A current dropped below {threshold} uA")]
    LowBeamCurrent {
        run: i32,
        cycle: usize,
        threshold: f64,
    },
    #[error(
        "Run {run}, cycle {cycle}: 1A current dropped below {threshold} uA within 20 seconds of the cycle starting"
    )]
    LowBeamCurrentAtStart {
        run: i32,
        cycle: usize,
        threshold: f64,
    },
    #[error("Run {run}, cycle {cycle}, period {period}: pileup detected in detector {detector}")]
    Pileup {
        run: i32,
        cycle: usize,
        period: usize,
        detector: String,
    },
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Not all valve states the same")]
    ValveMismatch,
    #[error("Merge failed because no runs were given")]
    NoRuns,
    #[error("Cannot merge table \"{0}\" of unrecognized kind")]
    UnrecognizedTableKind(String),
    #[error("Merge failed because no run numbered {0} was found in the input list")]
    RunNotFound(i32),
}

/// Top-level failure when constructing a Run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run load failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Run load failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Could not open run file because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Run load failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Run load failed due to missing data: {0}")]
    MissingData(#[from] MissingDataError),
    #[error("Run {run}: frame offset rejected: {reason}")]
    BadFrameOffset { run: i32, reason: String },
}

/// Worker-pool failures during bulk ingestion.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Run error: {0}")]
    RunError(#[from] RunError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
