//! Configuration for the echo harness runner.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::payload::{DEFAULT_MAX_SLICE, DEFAULT_PAYLOAD_LEN};
use crate::runtime::ReactorConfig;
use crate::scenario::RunConfiguration;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the harness runner
#[derive(Parser, Debug)]
#[command(name = "echo-harness")]
#[command(version = "0.1.0")]
#[command(about = "Bidirectional echo correctness harness", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address the listener binds to (port 0 picks an ephemeral port)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Payload seed
    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    /// Slice schedule seed
    #[arg(long)]
    pub slice_seed: Option<u64>,

    /// Per-scenario completion deadline in milliseconds
    #[arg(short = 'd', long)]
    pub deadline_ms: Option<u64>,

    /// Number of dispatch pool threads
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Run a single scenario, e.g. "offloaded/fire-and-forget"
    #[arg(long)]
    pub scenario: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub harness: HarnessSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Payload, schedule and timing
#[derive(Debug, Deserialize)]
pub struct HarnessSection {
    #[serde(default = "default_payload_len")]
    pub payload_len: usize,
    #[serde(default = "default_payload_seed")]
    pub payload_seed: u64,
    #[serde(default = "default_slice_seed")]
    pub slice_seed: u64,
    #[serde(default = "default_max_slice")]
    pub max_slice: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
}

impl Default for HarnessSection {
    fn default() -> Self {
        Self {
            payload_len: default_payload_len(),
            payload_seed: default_payload_seed(),
            slice_seed: default_slice_seed(),
            max_slice: default_max_slice(),
            poll_interval_ms: default_poll_interval_ms(),
            deadline_ms: default_deadline_ms(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
        }
    }
}

/// Socket and reactor settings
#[derive(Debug, Deserialize)]
pub struct TransportSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            buffer_size: default_buffer_size(),
            events_capacity: default_events_capacity(),
        }
    }
}

/// Offloaded handler execution
#[derive(Debug, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_payload_len() -> usize {
    DEFAULT_PAYLOAD_LEN
}

fn default_payload_seed() -> u64 {
    0x5eed_ec40
}

fn default_slice_seed() -> u64 {
    0x511c_e5eed
}

fn default_max_slice() -> usize {
    DEFAULT_MAX_SLICE
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_deadline_ms() -> u64 {
    30_000
}

fn default_teardown_timeout_ms() -> u64 {
    5_000
}

fn default_listen() -> String {
    "127.0.0.1:0".to_string()
}

fn default_buffer_size() -> usize {
    ReactorConfig::default().buffer_size
}

fn default_events_capacity() -> usize {
    ReactorConfig::default().events_capacity
}

fn default_workers() -> usize {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub payload_len: usize,
    pub payload_seed: u64,
    pub slice_seed: u64,
    pub max_slice: usize,
    pub poll_interval: Duration,
    pub deadline: Duration,
    pub teardown_timeout: Duration,
    pub reactor: ReactorConfig,
    pub workers: usize,
    /// Single scenario to run; the whole matrix when `None`.
    pub scenario: Option<RunConfiguration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let harness = HarnessSection::default();
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            payload_len: harness.payload_len,
            payload_seed: harness.payload_seed,
            slice_seed: harness.slice_seed,
            max_slice: harness.max_slice,
            poll_interval: Duration::from_millis(harness.poll_interval_ms),
            deadline: Duration::from_millis(harness.deadline_ms),
            teardown_timeout: Duration::from_millis(harness.teardown_timeout_ms),
            reactor: ReactorConfig::default(),
            workers: default_workers(),
            scenario: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(toml_config, Some(cli))
    }

    /// Merge a parsed file with optional CLI overrides.
    pub fn resolve(file: TomlConfig, cli: Option<CliArgs>) -> Result<Self, ConfigError> {
        let TomlConfig {
            harness,
            transport,
            dispatch,
            logging,
        } = file;

        let (listen, seed, slice_seed, deadline_ms, workers, scenario, log_level) = match cli {
            Some(cli) => (
                cli.listen,
                cli.seed,
                cli.slice_seed,
                cli.deadline_ms,
                cli.workers,
                cli.scenario,
                // clap fills in "info", so only a different value overrides the file
                Some(cli.log_level).filter(|level| level != "info"),
            ),
            None => (None, None, None, None, None, None, None),
        };

        let listen = listen.unwrap_or(transport.listen);
        let listen = listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let scenario = scenario
            .map(|name| name.parse::<RunConfiguration>().map_err(ConfigError::UnknownScenario))
            .transpose()?;

        if harness.max_slice == 0 {
            return Err(ConfigError::Invalid("max_slice must be at least 1".to_string()));
        }
        let workers = workers.unwrap_or(dispatch.workers);
        if workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }

        Ok(Config {
            listen,
            payload_len: harness.payload_len,
            payload_seed: seed.unwrap_or(harness.payload_seed),
            slice_seed: slice_seed.unwrap_or(harness.slice_seed),
            max_slice: harness.max_slice,
            poll_interval: Duration::from_millis(harness.poll_interval_ms),
            deadline: Duration::from_millis(deadline_ms.unwrap_or(harness.deadline_ms)),
            teardown_timeout: Duration::from_millis(harness.teardown_timeout_ms),
            reactor: ReactorConfig {
                buffer_size: transport.buffer_size,
                events_capacity: transport.events_capacity,
                ..ReactorConfig::default()
            },
            workers,
            scenario,
            log_level: log_level.unwrap_or(logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid listen address '{0}'")]
    InvalidListen(String),
    #[error("{0}")]
    UnknownScenario(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
