use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libucndata::config::Config;
use libucndata::process::{create_subsets, process_subset};
use libucndata::worker_status::{Phase, WorkerStatus};

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn bar_style(phase: Phase) -> ProgressStyle {
    let template = match phase {
        Phase::Loading => "{prefix} [{bar:40.cyan}] {pos}%",
        Phase::Filtering => "{prefix} [{bar:40.magenta}] {pos}%",
        Phase::Done => "{prefix} [{bar:40.green}] {pos}%",
        Phase::Failed => "{prefix} [{bar:40.red}] {pos}%",
    };
    ProgressStyle::with_template(template)
        .expect("Bad progress bar template!")
        .progress_chars("=>-")
}

fn main() {
    // Create a cli
    let matches = Command::new("ucndata_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );

        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Data Path: {}", config.run.datadir.to_string_lossy());
    log::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    log::info!(
        "Detection Modes: {}",
        config
            .run
            .cycle_times_mode
            .iter()
            .map(|m| m.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    if let Err(e) = config.validate() {
        log::error!("{e}");
        return;
    }

    // One subset of the run range per worker; workers with nothing to do
    // are not spawned
    let subsets: Vec<Vec<i32>> = create_subsets(&config)
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();

    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut bars = Vec::with_capacity(subsets.len());
    let mut handles = Vec::with_capacity(subsets.len());
    for (worker_id, subset) in subsets.into_iter().enumerate() {
        let bar = pb_manager.add(ProgressBar::new(100));
        bar.set_style(bar_style(Phase::default()));
        bar.set_prefix(format!("Worker {worker_id}"));
        bars.push(bar);

        let worker_config = config.clone();
        let worker_tx = tx.clone();
        handles.push(std::thread::spawn(move || {
            process_subset(worker_config, worker_tx, worker_id, subset)
        }));
    }
    drop(tx);

    // Update bars until every worker has hung up its sender
    while let Ok(status) = rx.recv() {
        if let Some(bar) = bars.get(status.worker_id) {
            bar.set_style(bar_style(status.phase));
            bar.set_prefix(format!(
                "Worker {} run {}",
                status.worker_id, status.run_number
            ));
            bar.set_position((status.progress * 100.0) as u64);
        }
    }

    // Workers finish in arbitrary order; collect everything and restore
    // run number order
    let mut runs = Vec::new();
    for (worker_id, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(worker_runs)) => runs.extend(worker_runs),
            Ok(Err(e)) => log::error!("Worker {worker_id} failed with error: {e}"),
            Err(_) => log::error!("Failed to join worker {worker_id}!"),
        }
    }
    runs.sort_by_key(|run| run.headers().first().map(|h| h.run_number).unwrap_or(0));

    for bar in &bars {
        bar.finish();
    }

    for run in &runs {
        if let Some(header) = run.headers().first() {
            let accepted = run.cycles().len();
            log::info!(
                "Run {}: {} cycles, {} accepted",
                header.run_number,
                run.ncycles(),
                accepted
            );
        }
    }

    log::info!("Processed {} runs.", runs.len());
    log::info!("Done.");
}
