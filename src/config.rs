//! Configuration System using Figment
//!
//! Settings are loaded from:
//! 1. `config/resistes.toml` or a file given on the command line (optional)
//! 2. Environment variables prefixed with `RESISTES_`, `__` separating sections
//!
//! Every field has a default, so an empty configuration is valid. Command line
//! flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use resistes_daq::config::Settings;
//!
//! // RESISTES_ACQUISITION__VOLTAGE=12.5 overrides [acquisition] voltage
//! let settings = Settings::load()?;
//! println!("Injecting {} V", settings.acquisition.voltage);
//! # Ok::<(), resistes_daq::error::DaqError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::ChannelUrl;
use crate::data::CsvOptions;
use crate::error::{AppResult, DaqError};
use crate::hardware::{AcquisitionParams, DeviceConstants};
use crate::validation::is_valid_delimiter;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/resistes.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RESISTES_";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Link to the device
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Parameters sent in the configuration frame
    #[serde(default)]
    pub acquisition: AcquisitionParams,
    /// CSV output
    #[serde(default)]
    pub output: OutputConfig,
    /// Device conversion constants
    #[serde(default)]
    pub device: DeviceConstants,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Device link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Channel URL (`serial:/dev/ttyUSB0:19200:8N1`, `tcp:host:port`, `mock:`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Read timeout for the acknowledgement and each measure frame
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Upper bound for draining stale bytes before configuring
    #[serde(default = "default_flush_timeout", with = "humantime_serde")]
    pub flush_timeout: Duration,
}

/// Output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// CSV delimiter, a single ASCII character
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Prepend the reception date to each line
    #[serde(default)]
    pub datetime: bool,
    /// Mirror lines on stdout when writing to a file
    #[serde(default)]
    pub stdout_display: bool,
    /// Output file, stdout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_flush_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_delimiter() -> String {
    ";".to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: default_timeout(),
            flush_timeout: default_flush_timeout(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            delimiter: default_delimiter(),
            datetime: false,
            stdout_display: false,
            path: None,
        }
    }
}

impl Settings {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from `path` and the environment. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// Load from `path`, which must exist, and the environment.
    pub fn load_required<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(DaqError::Configuration(format!(
                "Configuration file '{}' not found",
                path.display()
            )));
        }
        Self::load_from(path)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.connection.timeout.is_zero() {
            return Err(DaqError::Configuration(
                "connection.timeout must be greater than 0".to_string(),
            ));
        }
        if self.connection.flush_timeout.is_zero() {
            return Err(DaqError::Configuration(
                "connection.flush_timeout must be greater than 0".to_string(),
            ));
        }
        if let Some(url) = &self.connection.url {
            ChannelUrl::parse(url)?;
        }

        is_valid_delimiter(&self.output.delimiter).map_err(|e| {
            DaqError::Configuration(format!(
                "Invalid delimiter '{}': {}",
                self.output.delimiter, e
            ))
        })?;

        self.device
            .validate()
            .map_err(|e| DaqError::Configuration(format!("Invalid device constants: {}", e)))
    }

    /// CSV layout derived from the `[output]` section.
    pub fn csv_options(&self) -> AppResult<CsvOptions> {
        let delimiter = is_valid_delimiter(&self.output.delimiter).map_err(|e| {
            DaqError::Configuration(format!(
                "Invalid delimiter '{}': {}",
                self.output.delimiter, e
            ))
        })?;
        Ok(CsvOptions {
            delimiter,
            datetime: self.output.datetime,
            stdout_display: self.output.stdout_display,
        })
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))
    }
}
