//! # ucndata
//!
//! ucndata is the TUCAN run access library, written in Rust. It loads run files
//! produced by the UCN data acquisition at TRIUMF and exposes the cyclic
//! structure of a run: a run is split into cycles, each cycle into periods of
//! the irradiate/store/count pattern, and periods optionally into chopper
//! frames. All levels give access to the same underlying detector and slow
//! control tables, restricted to their time window.
//!
//! ## Installation
//!
//! In the future we may deploy to crates.io, but currently the only method of
//! install is from source, which is laid out below.
//!
//! ### Rust
//!
//! If you have not used Rust before, you will most likely need to install the
//! Rust tool chain. See the [Rust docs](https://www.rust-lang.org/tools/install)
//! for installation instructions.
//!
//! ### Downloading
//!
//! To download ucndata clone the git repository using
//! `git clone https://github.com/ucn-triumf/ucndata-rs.git`
//!
//! ### Building & Install
//!
//! To build and install the CLI use `cargo install --path ./ucndata_cli` from
//! the top level repository. The binary will be installed to your cargo install
//! location (typically something like `~/.cargo/bin/`). It can be uninstalled
//! by running `cargo uninstall ucndata_cli`.
//!
//! ## Configuration
//!
//! The CLI reads a YAML configuration file:
//!
//! ```yml
//! first_run_number: 0
//! last_run_number: 0
//! n_threads: 1
//! run:
//!   datadir: .
//!   cycle_times_mode: [matched, li6, he3, sequencer]
//!   match_tolerance_s: 20.0
//! ```
//!
//! The `run` section holds the per-run settings: the data directory, the
//! cycle boundary detection modes in priority order, the detector table names
//! and the data quality thresholds. Omitted fields take their defaults; a full
//! template can be generated with `ucndata_cli new -p config.yaml`.
//!
//! - First Run Number: The starting run number (inclusive)
//! - Last Run Number: The ending run number (inclusive)
//! - Number of Workers: The number of parallel worker threads to divide the
//!   runs amongst. Each worker gets a subset of the run range. Must be at
//!   least 1.
//!
//! ## Usage
//!
//! The typical entry point is [`run::Run::from_run_number`]. From a run,
//! cycles are reached with [`run::Run::cycle`] or [`run::Run::cycles`],
//! periods with [`cycle::Cycle::period`], and so on down to frames. Counts,
//! histograms and beam currents are available at every level through
//! [`node::NodeAccess`]. Runs taken back to back can be combined with
//! [`merge::merge`].
pub mod boundary;
pub mod broadcast;
pub mod config;
pub mod cycle;
pub mod detect;
pub mod error;
pub mod frame;
pub mod histogram;
pub mod merge;
pub mod node;
pub mod period;
pub mod process;
pub mod run;
pub mod slow;
pub mod table;
pub mod window;
pub mod worker_status;
