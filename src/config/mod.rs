//! Application configuration loading and validation.
//!
//! The top-level [`Config`] aggregates the logger, event source, publisher
//! and broker (`transport` for MQTT, `kafka`) sections of a single TOML
//! file. It is loaded once at startup and handed by reference to the
//! components that need it; nothing reads configuration from global state
//! afterwards.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use self::{logger::LoggerConfig, publisher::PublisherConfig, source::SourceConfig};

pub mod kafka;
pub mod logger;
pub mod publisher;
pub mod source;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "KILNBEE_CONFIG";

/// Fallback location when [`CONFIG_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/kilnbee/config.toml";

/// Timestamp prefix shared by the pre-logger print macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __print_timestamp {
    () => {
        console::style(
            time::OffsetDateTime::now_utc()
                .format(time::macros::format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
                ))
                .unwrap_or_default(),
        )
        .dim()
    };
}

/// Timestamped console output for use before the tracing subscriber is
/// installed (configuration loading, logger setup failures).
#[macro_export]
macro_rules! print_info {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            $crate::__print_timestamp!(),
            console::style("INFO").green(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_warn {
    ($($arg:tt)*) => {
        println!("{}  {} {}",
            $crate::__print_timestamp!(),
            console::style("WARN").yellow(),
            format_args!($($arg)*)
        );
    };
}

#[macro_export]
macro_rules! print_error {
    ($($arg:tt)*) => {
        eprintln!("{}  {} {}",
            $crate::__print_timestamp!(),
            console::style("ERROR").red(),
            format_args!($($arg)*)
        );
    };
}

/// Errors that can occur while locating, parsing or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error while reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error while reading configuration: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Broker transport the publisher sends through.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Mqtt,
    Kafka,
}

impl Backend {
    /// Whether this build carries the transport.
    pub fn is_compiled(self) -> bool {
        match self {
            Backend::Mqtt => cfg!(feature = "kilnbee-mqtt"),
            Backend::Kafka => cfg!(feature = "kilnbee-kafka"),
        }
    }
}

/// Top-level application configuration.
///
/// Every section has defaults, so an empty file is a valid configuration
/// that publishes to an MQTT broker on `localhost:1883`.
#[derive(Serialize, Deserialize, Debug, Validate, Clone, Default)]
#[serde(default)]
#[validate(schema(function = "validate_backend"))]
pub struct Config {
    pub backend: Backend,

    #[validate(nested)]
    pub logger: LoggerConfig,

    #[validate(nested)]
    pub source: SourceConfig,

    #[validate(nested)]
    pub publisher: PublisherConfig,

    #[cfg(feature = "kilnbee-mqtt")]
    #[validate(nested)]
    pub transport: TransportConfig,

    #[cfg(feature = "kilnbee-kafka")]
    #[validate(nested)]
    pub kafka: kafka::KafkaConfig,
}

fn validate_backend(config: &Config) -> Result<(), ValidationError> {
    if config.backend.is_compiled() {
        return Ok(());
    }
    Err(ValidationError::new("backend_unavailable").with_message(
        format!("Backend {:?} is not compiled into this build", config.backend).into(),
    ))
}

#[cfg(feature = "kilnbee-mqtt")]
pub type TransportConfig = kilnbee_mqtt::Config;

impl Config {
    /// Locates and loads the configuration file.
    ///
    /// # Errors
    /// Returns a `ConfigError` if the file cannot be found, read, parsed,
    /// or validated.
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::load(&config_path)
    }

    /// Priority:
    /// 1. `KILNBEE_CONFIG` environment variable
    /// 2. `/etc/kilnbee/config.toml`
    fn get_config_path() -> Result<PathBuf, ConfigError> {
        if let Ok(config_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(config_path);
            print_info!("Using config from {}: {}", CONFIG_ENV, path.display());
            return Ok(path);
        }

        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            print_info!("Using default config path: {}", fallback.display());
            return Ok(fallback.to_path_buf());
        }

        Err(ConfigError::Config(format!(
            "No configuration file found; set {CONFIG_ENV} or create {DEFAULT_CONFIG_PATH}"
        )))
    }

    /// Loads and validates configuration from `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        print_info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::Config(format!(
                "File does not exist: {}",
                path.display()
            )));
        }

        let config_str = fs::read_to_string(path)?;
        let config = Self::parse(&config_str)?;

        print_info!("Successfully loaded config from: {}", path.display());
        Ok(config)
    }

    /// Parses and validates TOML text.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        Ok(config)
    }
}
