/// Which stage of run processing a progress report refers to. The CLI
/// maps stages to progress bar colors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Reading and assembling the run file.
    #[default]
    Loading,
    /// Running the data sufficiency battery over the cycles.
    Filtering,
    Done,
    Failed,
}

/// A progress report from one worker, sent over the status channel.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub worker_id: usize,
    pub phase: Phase,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, worker_id: usize, phase: Phase) -> Self {
        Self {
            progress,
            run_number,
            worker_id,
            phase,
        }
    }
}
