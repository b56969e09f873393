//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. `config/spectro_daq.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `SPECTRO_DAQ_`, nested keys separated by
//!    a double underscore
//!
//! Every field has a default, so an empty or missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use spectro_daq::config::Settings;
//!
//! // SPECTRO_DAQ_APPLICATION__LOG_LEVEL=debug overrides the file
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Application: {}", settings.application.name);
//! # Ok::<(), spectro_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::acquisition::cosmic::{RejectionStatistic, DEFAULT_COEFFICIENT};
use crate::acquisition::AcquisitionParameters;
use crate::error::{AppResult, DaqError};

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/spectro_daq.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SPECTRO_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Acquisition sequencer settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Cosmic rejection settings
    #[serde(default)]
    pub cosmic: CosmicConfig,
    /// Data output settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Simulated hardware settings
    #[serde(default)]
    pub mock: MockConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Acquisition sequencer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Parameters applied at start-up
    #[serde(default)]
    pub defaults: AcquisitionParameters,
    /// Give up after this many "not ready" polls (unbounded when absent)
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
    /// Capacity of the command channel
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

/// Cosmic rejection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CosmicConfig {
    /// Rejection coefficient `k`
    #[serde(default = "default_coefficient")]
    pub coefficient: f64,
    /// Spread estimator.
    ///
    /// The default `squared_deviation` band widens with the spike itself, so only
    /// spikes of a few counts are rejected. Use `standard_deviation` for the
    /// conventional `mean ± k·σ` rejection of large cosmic hits.
    #[serde(default)]
    pub statistic: RejectionStatistic,
}

/// Data output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Output directory for data files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

/// Simulated detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockConfig {
    /// Sensor width in pixels
    #[serde(default = "default_mock_width")]
    pub width: usize,
    /// Sensor height in pixels
    #[serde(default = "default_mock_height")]
    pub height: usize,
    /// Polls answered "not ready" after each start
    #[serde(default = "default_polls_until_ready")]
    pub polls_until_ready: u32,
    /// Probability of a cosmic hit per synthetic frame
    #[serde(default = "default_cosmic_probability")]
    pub cosmic_probability: f64,
}

// Default value functions
fn default_name() -> String {
    "Spectro DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_mailbox_capacity() -> usize {
    32
}

fn default_event_capacity() -> usize {
    64
}

fn default_coefficient() -> f64 {
    DEFAULT_COEFFICIENT
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_mock_width() -> usize {
    1024
}

fn default_mock_height() -> usize {
    256
}

fn default_polls_until_ready() -> u32 {
    1
}

fn default_cosmic_probability() -> f64 {
    0.05
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            defaults: AcquisitionParameters::default(),
            max_poll_attempts: None,
            mailbox_capacity: default_mailbox_capacity(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl Default for CosmicConfig {
    fn default() -> Self {
        Self {
            coefficient: default_coefficient(),
            statistic: RejectionStatistic::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            width: default_mock_width(),
            height: default_mock_height(),
            polls_until_ready: default_polls_until_ready(),
            cosmic_probability: default_cosmic_probability(),
        }
    }
}

impl Settings {
    /// Load configuration from the default file and environment variables
    ///
    /// Example override: `SPECTRO_DAQ_ACQUISITION__MAX_POLL_ATTEMPTS=50`
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        crate::logging::parse_log_level(&self.application.log_level)
            .map_err(DaqError::Configuration)?;

        self.acquisition.defaults.validate()?;
        if self.acquisition.max_poll_attempts == Some(0) {
            return Err(DaqError::Configuration(
                "max_poll_attempts must be at least 1 when set".to_string(),
            ));
        }
        if self.acquisition.mailbox_capacity == 0 || self.acquisition.event_capacity == 0 {
            return Err(DaqError::Configuration(
                "channel capacities must be greater than 0".to_string(),
            ));
        }

        if !self.cosmic.coefficient.is_finite() || self.cosmic.coefficient <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "Invalid cosmic coefficient {}. Must be positive",
                self.cosmic.coefficient
            )));
        }

        if self.mock.width == 0 || self.mock.height == 0 {
            return Err(DaqError::Configuration(
                "mock detector size must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mock.cosmic_probability) {
            return Err(DaqError::Configuration(format!(
                "Invalid cosmic_probability {}. Must be within 0..=1",
                self.mock.cosmic_probability
            )));
        }

        Ok(())
    }
}
