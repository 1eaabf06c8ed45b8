//! Pipeline configuration
//!
//! Values are layered with the precedence CLI > environment > file > defaults.
//! The CLI layer is applied by the binary; everything below it lives here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::MediaTime;
use crate::error::{PipelineError, PipelineResult};

/// Files tried, in order, when no config file is given explicitly
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["vidframes.toml", "config/vidframes.toml"];

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "VIDFRAMES_";

/// Timescale used when a fallback frame duration is given in seconds
pub const FALLBACK_TIMESCALE: u32 = 600;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory for the scratch output; the system temp dir when unset
    pub scratch_dir: Option<PathBuf>,
    /// Scratch file stem
    pub scratch_file_name: String,
    /// Scratch file extension, which also selects the container
    pub container_extension: String,
    /// Directory the library storage saves into
    pub library_dir: PathBuf,
    pub log_level: String,
    pub json_logs: bool,
    /// Seconds per frame, used only when the source reports no frame duration
    pub fallback_frame_duration: Option<f64>,
    pub encoder: EncoderConfig,
}

/// Encoder tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub preset: String,
    pub crf: u8,
    pub threads: usize,
    /// Encoded packets allowed to wait for the muxer before the writer
    /// reports that it is not ready
    pub max_pending_packets: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            scratch_file_name: "modified".to_string(),
            container_extension: "mp4".to_string(),
            library_dir: PathBuf::from("vidframes-library"),
            log_level: "info".to_string(),
            json_logs: false,
            fallback_frame_duration: None,
            encoder: EncoderConfig::default(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            preset: "medium".to_string(),
            crf: 18,
            threads: num_cpus::get(),
            max_pending_packets: 8,
        }
    }
}

impl PipelineConfig {
    /// Defaults, then the config file, then environment overrides.
    ///
    /// With no explicit `file`, the first existing entry of
    /// [`DEFAULT_CONFIG_PATHS`] is used, if any.
    pub fn load(file: Option<&Path>) -> PipelineResult<Self> {
        let mut config = match file {
            Some(path) => Self::load_file(path)?,
            None => match DEFAULT_CONFIG_PATHS.iter().map(Path::new).find(|p| p.exists()) {
                Some(path) => Self::load_file(path)?,
                None => {
                    debug!("No configuration file found, using defaults");
                    Self::default()
                }
            },
        };

        let overrides = config.apply_env_from(|key| std::env::var(key).ok())?;
        if overrides > 0 {
            info!("Applied {} environment variable overrides", overrides);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn load_file(path: &Path) -> PipelineResult<Self> {
        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| PipelineError::Config {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> PipelineResult<Self> {
        toml::from_str(content).map_err(|e| PipelineError::Config {
            message: format!("Failed to parse TOML config: {}", e),
        })
    }

    /// Apply `VIDFRAMES_*` overrides found through `lookup`.
    ///
    /// Returns the number of values overridden.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> PipelineResult<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut applied = 0;

        if let Some(value) = var("SCRATCH_DIR") {
            self.scratch_dir = Some(PathBuf::from(value));
            applied += 1;
        }
        if let Some(value) = var("LIBRARY_DIR") {
            self.library_dir = PathBuf::from(value);
            applied += 1;
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.log_level = value;
            applied += 1;
        }
        if let Some(value) = var("JSON_LOGS") {
            self.json_logs = parse_env("JSON_LOGS", &value)?;
            applied += 1;
        }
        if let Some(value) = var("PRESET") {
            self.encoder.preset = value;
            applied += 1;
        }
        if let Some(value) = var("CRF") {
            self.encoder.crf = parse_env("CRF", &value)?;
            applied += 1;
        }
        if let Some(value) = var("THREADS") {
            self.encoder.threads = parse_env("THREADS", &value)?;
            applied += 1;
        }
        if let Some(value) = var("FALLBACK_FRAME_DURATION") {
            self.fallback_frame_duration = Some(parse_env("FALLBACK_FRAME_DURATION", &value)?);
            applied += 1;
        }

        Ok(applied)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> PipelineResult<()> {
        if self.scratch_file_name.trim().is_empty() {
            return Err(config_error("scratch_file_name cannot be empty"));
        }
        if self.container_extension.trim().is_empty() {
            return Err(config_error("container_extension cannot be empty"));
        }
        if self.encoder.crf > 51 {
            return Err(config_error("CRF value cannot exceed 51"));
        }
        if self.encoder.threads == 0 {
            return Err(config_error("threads must be at least 1"));
        }
        if self.encoder.max_pending_packets == 0 {
            return Err(config_error("max_pending_packets must be at least 1"));
        }
        if let Some(seconds) = self.fallback_frame_duration {
            if !(seconds.is_finite() && seconds > 0.0) {
                return Err(config_error("fallback_frame_duration must be positive"));
            }
        }
        Ok(())
    }

    /// Where `save` writes before handing the file to storage
    pub fn scratch_path(&self) -> PathBuf {
        let dir = self
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        dir.join(format!(
            "{}.{}",
            self.scratch_file_name, self.container_extension
        ))
    }

    pub fn fallback_frame_duration(&self) -> PipelineResult<Option<MediaTime>> {
        self.fallback_frame_duration
            .map(|seconds| MediaTime::from_seconds(seconds, FALLBACK_TIMESCALE))
            .transpose()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> PipelineResult<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| PipelineError::Config {
        message: format!("Invalid {}{} value '{}': {}", ENV_PREFIX, name, value, e),
    })
}

fn config_error(message: &str) -> PipelineError {
    PipelineError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.scratch_file_name, "modified");
        assert_eq!(config.container_extension, "mp4");
        assert!(config.fallback_frame_duration.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            library_dir = "/tmp/library"

            [encoder]
            crf = 23
            "#,
        )
        .unwrap();
        assert_eq!(config.library_dir, PathBuf::from("/tmp/library"));
        assert_eq!(config.encoder.crf, 23);
        assert_eq!(config.encoder.preset, "medium");
        assert_eq!(config.scratch_file_name, "modified");
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            PipelineConfig::from_toml_str("crf = ["),
            Err(PipelineError::Config { .. })
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = PipelineConfig::from_toml_str("[encoder]\ncrf = 23").unwrap();
        let env: HashMap<String, String> = [
            ("VIDFRAMES_CRF", "30"),
            ("VIDFRAMES_SCRATCH_DIR", "/scratch"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let applied = config.apply_env_from(|key| env.get(key).cloned()).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(config.encoder.crf, 30);
        assert_eq!(config.scratch_path(), PathBuf::from("/scratch/modified.mp4"));
    }

    #[test]
    fn test_env_parse_error() {
        let mut config = PipelineConfig::default();
        let result = config.apply_env_from(|key| {
            (key == "VIDFRAMES_THREADS").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = PipelineConfig::default();
        config.encoder.crf = 52;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.fallback_frame_duration = Some(0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fallback_frame_duration() {
        let mut config = PipelineConfig::default();
        config.fallback_frame_duration = Some(0.04);
        let duration = config.fallback_frame_duration().unwrap().unwrap();
        assert_eq!(duration.value, 24);
        assert_eq!(duration.timescale, FALLBACK_TIMESCALE);
    }
}
