//! Logging initialization and output formatting

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Human-readable text format
    Pretty,
    /// JSON format for structured logging
    Json,
}

impl LogFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Logging configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
    /// Include target module information
    pub target: bool,
    /// Include thread names; the encode worker is named
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            target: false,
            thread_names: true,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: impl Into<String>, json: bool) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::from_json_flag(json),
            ..Self::default()
        }
    }

    /// `RUST_LOG` wins over the configured level
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// Install the global subscriber.
    ///
    /// Returns false when one is already installed, which happens when tests
    /// initialize logging more than once.
    pub fn initialize(&self) -> bool {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.env_filter())
            .with_target(self.target)
            .with_thread_names(self.thread_names)
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Pretty => builder.try_init().is_ok(),
            LogFormat::Json => builder.json().try_init().is_ok(),
        };
        if installed {
            tracing::debug!("Logging initialized at {} ({:?})", self.level, self.format);
        }
        installed
    }
}

/// Initialize logging with a level directive and output format
pub fn init_logging(level: &str, json: bool) -> bool {
    LoggingConfig::new(level, json).initialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_selects_format() {
        assert_eq!(LoggingConfig::new("debug", true).format, LogFormat::Json);
        assert_eq!(LoggingConfig::new("debug", false).format, LogFormat::Pretty);
    }

    #[test]
    fn second_initialization_is_refused_quietly() {
        init_logging("warn", false);
        assert!(!init_logging("warn", false));
    }
}
