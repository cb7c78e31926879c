//! Exporter configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use waveplus_core::AcquisitionConfig;

/// Exporter configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Acquisition loop settings.
    pub acquisition: AcquisitionSettings,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        // Create parent directories if needed
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Acquisition timings are positive and within reasonable bounds
    /// - The watchdog threshold covers at least one pulse
    ///
    /// # Example
    ///
    /// ```
    /// use waveplus_exporter::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.acquisition.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    ///
    /// This is a convenience method that combines `load()` and `validate()`.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:9200").
    pub bind: String,
    /// Whether `/metrics` is served.
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9200".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
        } else {
            // Check for valid host:port format
            let parts: Vec<&str> = self.bind.rsplitn(2, ':').collect();
            if parts.len() != 2 {
                errors.push(ValidationError {
                    field: "server.bind".to_string(),
                    message: format!(
                        "invalid bind address '{}': expected format 'host:port'",
                        self.bind
                    ),
                });
            } else {
                let port_str = parts[0];
                match port_str.parse::<u16>() {
                    Ok(0) => {
                        errors.push(ValidationError {
                            field: "server.bind".to_string(),
                            message: "port cannot be 0".to_string(),
                        });
                    }
                    Err(_) => {
                        errors.push(ValidationError {
                            field: "server.bind".to_string(),
                            message: format!(
                                "invalid port '{}': must be a number 1-65535",
                                port_str
                            ),
                        });
                    }
                    Ok(_) => {}
                }
            }
        }

        errors
    }
}

/// Longest accepted scan window in seconds.
pub const MAX_SCAN_DURATION: u64 = 120;
/// Most attempts accepted per scan or read.
pub const MAX_RETRIES: u32 = 20;

/// Acquisition loop settings, in whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Length of one scan listen; also the connect timeout.
    pub scan_duration_secs: u64,
    /// Pause after a successful read cycle.
    pub read_interval_secs: u64,
    /// Total attempts per scan and per device read.
    pub retries: u32,
    /// Watchdog pulse interval.
    pub pulse_interval_secs: u64,
    /// Lower bound for the watchdog threshold.
    pub watchdog_min_secs: u64,
    /// Threshold multiplier applied to read interval plus scan duration.
    pub watchdog_multiplier: u32,
    /// Pause after the recovery action.
    pub cooldown_secs: u64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self::from(&AcquisitionConfig::default())
    }
}

impl From<&AcquisitionConfig> for AcquisitionSettings {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            scan_duration_secs: config.scan_duration.as_secs(),
            read_interval_secs: config.read_interval.as_secs(),
            retries: config.retries,
            pulse_interval_secs: config.pulse_interval.as_secs(),
            watchdog_min_secs: config.watchdog_min.as_secs(),
            watchdog_multiplier: config.watchdog_multiplier,
            cooldown_secs: config.cooldown.as_secs(),
        }
    }
}

impl AcquisitionSettings {
    /// Convert to the typed loop configuration.
    pub fn to_config(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            scan_duration: Duration::from_secs(self.scan_duration_secs),
            read_interval: Duration::from_secs(self.read_interval_secs),
            retries: self.retries,
            pulse_interval: Duration::from_secs(self.pulse_interval_secs),
            watchdog_min: Duration::from_secs(self.watchdog_min_secs),
            watchdog_multiplier: self.watchdog_multiplier,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }

    /// Validate acquisition settings.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: format!("acquisition.{}", field),
                message,
            });
        };

        if self.scan_duration_secs == 0 {
            push("scan_duration_secs", "scan duration must be at least 1 second".to_string());
        } else if self.scan_duration_secs > MAX_SCAN_DURATION {
            push(
                "scan_duration_secs",
                format!(
                    "scan duration {} is too long (maximum {} seconds)",
                    self.scan_duration_secs, MAX_SCAN_DURATION
                ),
            );
        }

        if self.retries == 0 {
            push("retries", "retries must be at least 1".to_string());
        } else if self.retries > MAX_RETRIES {
            push(
                "retries",
                format!("retries {} is too many (maximum {})", self.retries, MAX_RETRIES),
            );
        }

        if self.pulse_interval_secs == 0 {
            push("pulse_interval_secs", "pulse interval must be at least 1 second".to_string());
        } else if self.to_config().watchdog_threshold().as_secs() < self.pulse_interval_secs {
            push(
                "watchdog_min_secs",
                format!(
                    "watchdog threshold is shorter than the {} second pulse interval",
                    self.pulse_interval_secs
                ),
            );
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `acquisition.retries`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("waveplus")
        .join("exporter.toml")
}
