use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use weii_core::DisplayUnit;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub link: LinkConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Number of accepted samples averaged into one measurement
    pub sample_count: usize,
    /// Total weight the board must exceed before capture starts
    pub min_limit_kg: f64,
    /// How long the weight must stay above the limit, in milliseconds
    pub debounce_ms: u64,
    /// Largest relative deviation from the running median a sample may have
    pub tolerance: f64,
    /// Consecutive rejected samples after which the load counts as removed
    pub grace_rejections: u32,
    /// How long to wait for the board's calibration block, in milliseconds
    pub calibration_timeout_ms: u64,
    /// Consecutive malformed frames after which the session gives up
    pub max_decode_errors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_count: 200,
            min_limit_kg: 20.0,
            debounce_ms: 500,
            tolerance: 0.05,
            grace_rejections: 25,
            calibration_timeout_ms: 5_000,
            max_decode_errors: 64,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("sample count must be positive")]
    ZeroSampleCount,

    #[error("minimum load must be a non-negative number of kilograms, got {0}")]
    InvalidMinLimit(f64),

    #[error("tolerance must be a non-negative fraction, got {0}")]
    InvalidTolerance(f64),

    #[error("grace rejections must be at least 1")]
    ZeroGraceRejections,

    #[error("decode error limit must be at least 1")]
    ZeroDecodeErrors,
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_count == 0 {
            return Err(ConfigError::ZeroSampleCount);
        }
        if !self.min_limit_kg.is_finite() || self.min_limit_kg < 0.0 {
            return Err(ConfigError::InvalidMinLimit(self.min_limit_kg));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::InvalidTolerance(self.tolerance));
        }
        if self.grace_rejections == 0 {
            return Err(ConfigError::ZeroGraceRejections);
        }
        if self.max_decode_errors == 0 {
            return Err(ConfigError::ZeroDecodeErrors);
        }
        Ok(())
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn calibration_timeout(&self) -> Duration {
        Duration::from_millis(self.calibration_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LinkConfig {
    /// A device node the OS has already connected to the board.
    Device {
        path: PathBuf,
        /// The node delivers bare HID reports without transaction headers.
        #[serde(default)]
        hidraw: bool,
    },
    /// A simulated board.
    Mock {
        weight_kg: f64,
        step_on_after_ms: u64,
        report_interval_ms: u64,
        noise_kg: f64,
        seed: Option<u64>,
    },
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig::Device {
            path: PathBuf::from("/dev/hidraw0"),
            hidraw: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Unit results are printed in
    pub unit: DisplayUnit,
    /// Offset added to the reported weight, in kilograms
    pub adjust_kg: f64,
    /// Print only the final weight
    pub weight_only: bool,
    /// Command to run when done; `{weight}` is replaced with the result
    pub command: Option<String>,
    /// Bluetooth address to disconnect when done
    pub disconnect_address: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
