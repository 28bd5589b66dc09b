//! Configuration management for the autofocus controller
//!
//! Provides loading, saving and validation of the search parameters, settle
//! timings, orchestration mode and scorer selection, plus parsing of the
//! Mantis `sync.cfg` host list.

use crate::errors::AutofocusError;
use crate::types::{HostEndpoint, DEFAULT_CONTROL_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables overriding file values,
/// e.g. `MCAM_AF_SEARCH__COARSE_STEP=50`.
pub const ENV_PREFIX: &str = "MCAM_AF";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofocusConfig {
    pub search: SearchConfig,
    pub timing: TimingConfig,
    pub orchestrator: OrchestratorConfig,
    pub scorer: ScorerConfig,
}

/// How the starting extreme is established before the coarse sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HomingMode {
    /// Send the 0-step near command, which the focus firmware treats as "home".
    ZeroStep,
    /// Drive near by the full focus range and treat the end stop as zero.
    FullTravel,
}

/// Focus search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Total focus travel covered by the coarse sweep (steps)
    pub total_range: u32,
    /// Coarse sweep step (steps)
    pub coarse_step: u32,
    /// Fine sweep step (steps)
    pub fine_step: u32,
    /// Fine sweep iteration budget
    pub fine_iterations: u32,
    /// Homing strategy
    pub homing: HomingMode,
    /// Issue the home command twice; workaround for motors that ignore the first one
    pub double_home: bool,
    /// Attempts to re-score after repositioning before seeding with 0.0
    pub reseed_attempts: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            total_range: 2200,
            coarse_step: 100,
            fine_step: 10,
            fine_iterations: 20,
            homing: HomingMode::ZeroStep,
            double_home: false,
            reseed_attempts: 3,
        }
    }
}

impl SearchConfig {
    /// Number of coarse sweep iterations.
    pub fn coarse_iterations(&self) -> u32 {
        if self.coarse_step == 0 {
            0
        } else {
            self.total_range / self.coarse_step
        }
    }
}

/// Settle and timeout durations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Wait after every focus move before sampling (ms)
    pub move_settle_ms: u64,
    /// Wait after homing (ms)
    pub home_settle_ms: u64,
    /// Wait after the repositioning move (ms)
    pub reposition_settle_ms: u64,
    /// Frame grab timeout (ms)
    pub grab_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            move_settle_ms: 1250,
            home_settle_ms: 2000,
            reposition_settle_ms: 3000,
            grab_timeout_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn move_settle(&self) -> Duration {
        Duration::from_millis(self.move_settle_ms)
    }

    pub fn home_settle(&self) -> Duration {
        Duration::from_millis(self.home_settle_ms)
    }

    pub fn reposition_settle(&self) -> Duration {
        Duration::from_millis(self.reposition_settle_ms)
    }

    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.grab_timeout_ms)
    }

    /// All waits set to zero; useful for simulators.
    pub fn immediate() -> Self {
        Self {
            move_settle_ms: 0,
            home_settle_ms: 0,
            reposition_settle_ms: 0,
            grab_timeout_ms: 100,
        }
    }
}

/// How cameras are scheduled across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One camera at a time across every host
    Sequential,
    /// Hosts in parallel, cameras on a host one at a time
    PerHost,
    /// One worker per camera; requires a transport that supports simultaneous streams
    Concurrent,
}

impl std::str::FromStr for ExecutionMode {
    type Err = AutofocusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "per_host" | "per-host" => Ok(Self::PerHost),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(AutofocusError::config(format!(
                "unknown execution mode: {other}"
            ))),
        }
    }
}

/// Orchestration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub mode: ExecutionMode,
    /// First frame receiver port; camera `i` of a run streams on `base + i`
    pub stream_port_base: u16,
    /// Control port used for hosts read from a sync file
    pub control_port: u16,
    /// Hosts to focus when none are given explicitly
    pub hosts: Vec<String>,
    /// Optional `sync.cfg` file listing hosts
    pub sync_file: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::PerHost,
            stream_port_base: 13000,
            control_port: DEFAULT_CONTROL_PORT,
            hosts: Vec::new(),
            sync_file: None,
        }
    }
}

impl OrchestratorConfig {
    /// Resolve configured hosts plus those listed in the sync file.
    pub fn endpoints(&self) -> Result<Vec<HostEndpoint>, AutofocusError> {
        let mut hosts = self.hosts.clone();
        if let Some(path) = &self.sync_file {
            hosts.extend(load_sync_file(path)?);
        }
        let mut endpoints: Vec<HostEndpoint> = Vec::with_capacity(hosts.len());
        for host in hosts {
            let endpoint = HostEndpoint::new(host, self.control_port);
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        Ok(endpoints)
    }
}

/// Sharpness metric selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    Canny,
    Laplacian,
}

/// Scorer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub kind: ScorerKind,
    /// Canny hysteresis low threshold
    pub low_threshold: f64,
    /// Canny hysteresis high threshold
    pub high_threshold: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            kind: ScorerKind::Canny,
            low_threshold: 100.0,
            high_threshold: 200.0,
        }
    }
}

impl AutofocusConfig {
    /// Load configuration from a TOML file layered with `MCAM_AF_*` overrides.
    ///
    /// A missing file is not an error; defaults (plus overrides) are used.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AutofocusError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
        }

        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AutofocusError::config(format!("Failed to read config: {}", e)))?;

        let loaded: AutofocusConfig = settings
            .try_deserialize()
            .map_err(|e| AutofocusError::config(format!("Failed to parse config: {}", e)))?;

        loaded.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(loaded)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self, AutofocusError> {
        let loaded: AutofocusConfig = toml::from_str(contents)
            .map_err(|e| AutofocusError::config(format!("Failed to parse config: {}", e)))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AutofocusError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| AutofocusError::config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, toml_string)?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("mcam_autofocus.toml")
    }

    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), AutofocusError> {
        let search = &self.search;
        if search.total_range == 0 {
            return Err(AutofocusError::config("total_range must be greater than 0"));
        }
        if search.coarse_step == 0 {
            return Err(AutofocusError::config("coarse_step must be greater than 0"));
        }
        if search.coarse_step > search.total_range {
            return Err(AutofocusError::config(format!(
                "coarse_step {} exceeds total_range {}",
                search.coarse_step, search.total_range
            )));
        }
        if search.fine_step == 0 {
            return Err(AutofocusError::config("fine_step must be greater than 0"));
        }
        if search.fine_iterations == 0 {
            return Err(AutofocusError::config(
                "fine_iterations must be greater than 0",
            ));
        }
        if search.reseed_attempts == 0 {
            return Err(AutofocusError::config(
                "reseed_attempts must be greater than 0",
            ));
        }
        let scorer = &self.scorer;
        if !(scorer.low_threshold >= 0.0 && scorer.low_threshold <= scorer.high_threshold) {
            return Err(AutofocusError::config(
                "scorer thresholds must satisfy 0 <= low <= high",
            ));
        }

        if self.timing.grab_timeout_ms == 0 {
            return Err(AutofocusError::config("grab_timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}

/// Extract host addresses from the contents of a Mantis `sync.cfg`.
///
/// Each line looks like `user@10.0.1.1:/some/path`; the host is the text
/// between `@` and the next `:`. Lines without `@` are skipped.
pub fn parse_sync_file(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.trim().split_once('@')?;
            let host = rest.split(':').next().unwrap_or(rest).trim();
            if host.is_empty() {
                None
            } else {
                Some(host.to_string())
            }
        })
        .collect()
}

/// Read and parse a `sync.cfg` host list.
pub fn load_sync_file<P: AsRef<Path>>(path: P) -> Result<Vec<String>, AutofocusError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        AutofocusError::config(format!("Failed to read sync file {:?}: {}", path, e))
    })?;
    let hosts = parse_sync_file(&contents);
    log::info!("Read {} hosts from {:?}", hosts.len(), path);
    Ok(hosts)
}
