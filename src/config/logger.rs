//! Logging configuration.
//!
//! ```toml
//! [logger]
//! level = "info"
//! timestamp_format = "Rfc3339"
//!
//! [logger.console]
//! enabled = true
//! format = "json"
//!
//! [logger.journald]
//! enabled = true
//! identifier = "kilnbee"
//! ```

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Console output format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Timestamp representation in console output.
///
/// `Custom` takes a `time` format description, e.g.
/// `"[hour]:[minute]:[second]"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    #[default]
    Rfc3339,
    Unix,
    Custom(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggerConfig {
    /// trace, debug, info, warn or error (case-insensitive).
    /// `RUST_LOG` takes precedence when set.
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    #[validate(nested)]
    pub console: Option<ConsoleConfig>,

    #[validate(nested)]
    pub journald: Option<JournaldConfig>,

    #[validate(custom(function = "validate_timestamp_format"))]
    pub timestamp_format: TimestampFormat,
}

fn validate_timestamp_format(format: &TimestampFormat) -> Result<(), ValidationError> {
    match format {
        TimestampFormat::Custom(s) if s.is_empty() => {
            Err(ValidationError::new("invalid_timestamp_format")
                .with_message("Custom timestamp format cannot be empty".into()))
        }
        TimestampFormat::Custom(s) => time::format_description::parse_owned::<2>(s)
            .map(|_| ())
            .map_err(|e| {
                ValidationError::new("invalid_timestamp_format")
                    .with_message(format!("Invalid custom timestamp format: {e}").into())
            }),
        _ => Ok(()),
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("invalid_log_level")
            .with_message(format!("Invalid log level: {level}").into())),
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            timestamp_format: TimestampFormat::default(),
            console: Some(ConsoleConfig::default()),
            journald: Some(JournaldConfig::default()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,

    pub format: LogFormat,

    /// Include the module path of each event.
    pub show_target: bool,

    pub show_thread_ids: bool,

    /// Emit span open/close events.
    pub show_spans: bool,

    pub ansi_colors: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConsoleConfig {
            enabled: true,
            format: LogFormat::default(),
            show_target: false,
            show_thread_ids: false,
            show_spans: false,
            ansi_colors: true,
        }
    }
}

/// systemd journald output (Linux only).
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct JournaldConfig {
    pub enabled: bool,

    /// `SYSLOG_IDENTIFIER` of emitted entries.
    #[validate(length(min = 1, message = "Journald identifier cannot be empty"))]
    pub identifier: String,
}

impl Default for JournaldConfig {
    fn default() -> Self {
        JournaldConfig {
            enabled: false,
            identifier: "kilnbee".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_is_case_insensitive() {
        let config = LoggerConfig {
            level: "WARN".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let config = LoggerConfig {
            level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_timestamp_format() {
        let valid = LoggerConfig {
            timestamp_format: TimestampFormat::Custom("[hour]:[minute]:[second]".into()),
            ..Default::default()
        };
        assert!(valid.validate().is_ok());

        let empty = LoggerConfig {
            timestamp_format: TimestampFormat::Custom(String::new()),
            ..Default::default()
        };
        assert!(empty.validate().is_err());

        let broken = LoggerConfig {
            timestamp_format: TimestampFormat::Custom("[hour".into()),
            ..Default::default()
        };
        assert!(broken.validate().is_err());
    }

    #[test]
    fn test_empty_journald_identifier_rejected() {
        let config = LoggerConfig {
            journald: Some(JournaldConfig {
                enabled: true,
                identifier: String::new(),
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_console_format_from_toml() {
        let config: ConsoleConfig = toml::from_str("format = \"json\"").unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.enabled);
    }
}
