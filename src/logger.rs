//! Logging initialization.
//!
//! `LoggerManager` validates the `[logger]` configuration and installs the
//! global `tracing` subscriber with a console layer and/or a systemd
//! journald layer. Each layer gets its own `EnvFilter`: `RUST_LOG` wins
//! when set, otherwise the configured level applies.

use std::{fmt as std_fmt, io};

use thiserror::Error;
use time::format_description::OwnedFormatItem;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        time::{FormatTime, UtcTime},
    },
    prelude::*,
    EnvFilter, Layer, Registry,
};
use validator::{Validate, ValidationErrors};

use crate::{
    config::logger::{ConsoleConfig, JournaldConfig, LogFormat, LoggerConfig, TimestampFormat},
    print_info, print_warn,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Logger initialization error: {0}")]
    InitializationError(String),

    #[error("Logger configuration validation error: {0}")]
    ValidationError(#[from] ValidationErrors),

    /// Journald socket unavailable.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("No logging layers were configured or successfully initialized")]
    NoLayersConfigured,

    #[error("Failed to initialize journald logger and console output is disabled")]
    JournaldFailedWithConsoleDisabled,
}

/// Seconds since the Unix epoch with millisecond precision.
struct UnixTime;

impl FormatTime for UnixTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std_fmt::Result {
        let now = time::OffsetDateTime::now_utc();
        write!(w, "{}.{:03}", now.unix_timestamp(), now.millisecond())
    }
}

pub struct LoggerManager {
    config: LoggerConfig,
}

impl LoggerManager {
    /// # Errors
    /// `LoggerError::ValidationError` if the configuration is invalid.
    pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
        config.validate()?;
        Ok(LoggerManager { config })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.config.level))
    }

    /// Installs the global subscriber. Call once, before anything logs.
    ///
    /// A journald failure is tolerated while console output is enabled.
    ///
    /// # Errors
    /// - `NoLayersConfigured` if every output is disabled
    /// - `JournaldFailedWithConsoleDisabled` if journald was the only output
    /// - `InitializationError` if a global subscriber is already installed
    pub fn init(&mut self) -> Result<(), LoggerError> {
        let layers = self.build_layers()?;

        tracing_subscriber::registry()
            .with(layers)
            .try_init()
            .map_err(|e| LoggerError::InitializationError(e.to_string()))
    }

    fn build_layers(&self) -> Result<Vec<BoxedLayer>, LoggerError> {
        let mut layers = Vec::new();
        let console_enabled = self.config.console.as_ref().is_some_and(|c| c.enabled);

        if let Some(console_config) = self.config.console.as_ref().filter(|c| c.enabled) {
            layers.push(self.console_layer(console_config)?);
        }

        if let Some(journald_config) = self.config.journald.as_ref().filter(|j| j.enabled) {
            match self.journald_layer(journald_config) {
                Ok(layer) => {
                    layers.push(layer);
                    print_info!(
                        "Systemd journald logger initialized with identifier: {}",
                        journald_config.identifier
                    );
                }
                Err(e) => {
                    print_warn!("Failed to initialize systemd journald logger: {}", e);
                    if !console_enabled {
                        return Err(LoggerError::JournaldFailedWithConsoleDisabled);
                    }
                }
            }
        }

        if layers.is_empty() {
            print_warn!("No logging layers were initialized. Please check your configuration.");
            return Err(LoggerError::NoLayersConfigured);
        }

        Ok(layers)
    }

    fn console_layer(&self, config: &ConsoleConfig) -> Result<BoxedLayer, LoggerError> {
        let filter = self.filter();
        let layer = match &self.config.timestamp_format {
            TimestampFormat::Rfc3339 => styled(config, UtcTime::rfc_3339(), filter),
            TimestampFormat::Unix => styled(config, UnixTime, filter),
            TimestampFormat::Custom(format) => {
                let items = time::format_description::parse_owned::<2>(format).map_err(|e| {
                    LoggerError::InitializationError(format!("Invalid timestamp format: {e}"))
                })?;
                styled::<UtcTime<OwnedFormatItem>>(config, UtcTime::new(items), filter)
            }
        };
        Ok(layer)
    }

    fn journald_layer(&self, config: &JournaldConfig) -> Result<BoxedLayer, LoggerError> {
        let layer = tracing_journald::layer()?.with_syslog_identifier(config.identifier.clone());
        Ok(layer.with_filter(self.filter()).boxed())
    }
}

fn styled<T>(config: &ConsoleConfig, timer: T, filter: EnvFilter) -> BoxedLayer
where
    T: FormatTime + Send + Sync + 'static,
{
    let span_events = if config.show_spans {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_timer(timer)
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread_ids)
        .with_span_events(span_events)
        .with_ansi(config.ansi_colors)
        .with_writer(io::stdout);

    match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let config = LoggerConfig {
            level: "chatty".into(),
            ..Default::default()
        };
        assert!(matches!(
            LoggerManager::new(config),
            Err(LoggerError::ValidationError(_))
        ));
    }

    #[test]
    fn test_no_outputs_is_an_error() {
        let config = LoggerConfig {
            console: None,
            journald: Some(JournaldConfig {
                enabled: false,
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut manager = LoggerManager::new(config).unwrap();
        assert!(matches!(
            manager.init(),
            Err(LoggerError::NoLayersConfigured)
        ));
    }

    #[test]
    fn test_console_layers_for_each_format() {
        for (format, timestamp) in [
            (LogFormat::Compact, TimestampFormat::Rfc3339),
            (LogFormat::Pretty, TimestampFormat::Unix),
            (
                LogFormat::Json,
                TimestampFormat::Custom("[hour]:[minute]:[second]".into()),
            ),
        ] {
            let config = LoggerConfig {
                console: Some(ConsoleConfig {
                    format,
                    ..Default::default()
                }),
                journald: None,
                timestamp_format: timestamp,
                ..Default::default()
            };
            let manager = LoggerManager::new(config).unwrap();
            assert_eq!(manager.build_layers().unwrap().len(), 1);
        }
    }
}
