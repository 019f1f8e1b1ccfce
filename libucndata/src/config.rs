use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

/// Cycle boundary detection strategies, tried in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Reconcile He3 and Li6 transition timestamps pairwise.
    Matched,
    /// Li6 detector transition timestamps only.
    Li6,
    /// He3 detector transition timestamps only.
    He3,
    /// Rising/falling edges of the sequencer inCycle flag.
    Sequencer,
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMode::Matched => write!(f, "matched"),
            DetectionMode::Li6 => write!(f, "li6"),
            DetectionMode::He3 => write!(f, "he3"),
            DetectionMode::Sequencer => write!(f, "sequencer"),
        }
    }
}

/// Table names for one detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorTables {
    pub hits: String,
    pub charge: String,
    pub rate: String,
    pub transitions: String,
}

/// Thresholds for the per-cycle data quality battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCheckThresholds {
    /// uA
    pub beam_min_current: f64,
    /// if a 1 ms bin exceeds this count, the period is piled up
    pub pileup_cnt_per_ms: f64,
    /// time frame for pileup at the start of each period, seconds
    pub pileup_within_first_s: f64,
}

impl Default for DataCheckThresholds {
    fn default() -> Self {
        Self {
            beam_min_current: 0.1,
            pileup_cnt_per_ms: 10.0,
            pileup_within_first_s: 1.0,
        }
    }
}

/// Immutable per-run configuration. Passed to the Run constructor and shared
/// with derived cycles, periods and frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// directory which contains the run files
    pub datadir: PathBuf,
    /// cycle times finding mode order
    pub cycle_times_mode: Vec<DetectionMode>,
    /// maximum |He3 - Li6| start time difference accepted by matched mode
    pub match_tolerance_s: f64,
    pub li6: DetectorTables,
    pub he3: DetectorTables,
    /// slow control tables required for quality checks and run-stop lookup
    pub slow_tables: Vec<String>,
    /// EPICS tables grouped into the slow control registry
    pub epics_tables: Vec<String>,
    pub thresholds: DataCheckThresholds,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            datadir: PathBuf::from("."),
            cycle_times_mode: vec![
                DetectionMode::Matched,
                DetectionMode::Li6,
                DetectionMode::He3,
                DetectionMode::Sequencer,
            ],
            match_tolerance_s: 20.0,
            li6: DetectorTables {
                hits: String::from("UCNHits_Li6"),
                charge: String::from("Li6_Charge"),
                rate: String::from("Li6_Rate"),
                transitions: String::from("RunTransitions_Li6"),
            },
            he3: DetectorTables {
                hits: String::from("UCNHits_He3"),
                charge: String::from("He3_Charge"),
                rate: String::from("He3_Rate"),
                transitions: String::from("RunTransitions_He3"),
            },
            slow_tables: vec![
                String::from("BeamlineEpics"),
                String::from("SequencerTree"),
                String::from("LNDDetectorTree"),
            ],
            epics_tables: vec![
                String::from("BeamlineEpics"),
                String::from("UCN2Epics"),
                String::from("UCN2EpicsPressures"),
                String::from("UCN2EpicsTemperature"),
            ],
            thresholds: DataCheckThresholds::default(),
        }
    }
}

impl RunConfig {
    /// Table names for the named detector, one of "Li6"|"He3"
    pub fn detector(&self, name: &str) -> Result<&DetectorTables, ConfigError> {
        match name {
            "Li6" => Ok(&self.li6),
            "He3" => Ok(&self.he3),
            _ => Err(ConfigError::UnknownDetector(name.to_string())),
        }
    }

    /// Construct the run file path using the standard naming scheme
    pub fn run_file(&self, run_number: i32) -> PathBuf {
        self.datadir.join(format!("ucn_run_{run_number:0>8}.yaml"))
    }
}

/// Bulk-ingestion configuration for the CLI. Serializable to YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub first_run_number: i32,
    pub last_run_number: i32,
    pub n_threads: i32,
    #[serde(default)]
    pub run: RunConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            first_run_number: 0,
            last_run_number: 0,
            n_threads: 1,
            run: RunConfig::default(),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(config_path)?;
        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check if a specific run exists
    pub fn does_run_exist(&self, run_number: i32) -> bool {
        self.run.run_file(run_number).exists()
    }

    /// Reject configurations the worker pool cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_threads < 1 {
            return Err(ConfigError::BadThreadCount(self.n_threads));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_count_validated() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.n_threads = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BadThreadCount(0))
        ));
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let reread: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(reread.n_threads, 1);
        assert_eq!(reread.run.match_tolerance_s, 20.0);
        assert_eq!(reread.run.li6.hits, "UCNHits_Li6");
    }

    #[test]
    fn test_run_file_naming() {
        let config = RunConfig::default();
        assert!(config
            .run_file(1846)
            .ends_with("ucn_run_00001846.yaml"));
    }
}
