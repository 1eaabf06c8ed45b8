//! CLI module for vidframes
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::PipelineConfig;

pub mod args;
pub mod commands;

/// Decode, crop and re-encode the video track of a media file
#[derive(Parser, Debug)]
#[command(name = "vidframes")]
#[command(about = "vidframes - frame-level video loading, cropping and saving")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level, overrides the configuration file
    #[arg(long, global = true, env = "VIDFRAMES_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the video track of a media file
    Inspect(args::InspectArgs),
    /// Crop every frame to its centre half and save the result
    Crop(args::CropArgs),
}

impl Cli {
    /// Layer command-line values over a loaded configuration
    pub fn apply_to(&self, config: &mut PipelineConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.json_logs {
            config.json_logs = true;
        }
        if let Commands::Crop(args) = &self.command {
            if let Some(library) = &args.library {
                config.library_dir = library.clone();
            }
            if let Some(scratch) = &args.scratch_dir {
                config.scratch_dir = Some(scratch.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_arguments_override_configuration() {
        let cli = Cli::parse_from([
            "vidframes",
            "--json-logs",
            "crop",
            "--input",
            "in.mov",
            "--library",
            "/tmp/lib",
        ]);
        let mut config = PipelineConfig::default();
        cli.apply_to(&mut config);

        assert!(config.json_logs);
        assert_eq!(config.library_dir, PathBuf::from("/tmp/lib"));
        assert_eq!(config.scratch_dir, None);
    }

    #[test]
    fn inspect_leaves_storage_settings_alone() {
        let cli = Cli::parse_from(["vidframes", "inspect", "--input", "in.mov", "--json"]);
        let mut config = PipelineConfig::default();
        cli.apply_to(&mut config);

        assert_eq!(config, PipelineConfig::default());
    }
}
