//! vidframes CLI
//!
//! Loads the video track of a media file frame by frame, crops every frame
//! and saves the result into a library directory.
//!
//! # Usage
//!
//! ```bash
//! vidframes inspect --input clip.mov
//! vidframes crop --input clip.mov --library ~/Videos/vidframes
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use vidframes::cli::{commands, Cli, Commands};
use vidframes::config::PipelineConfig;
use vidframes::utils::logging::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_to(&mut config);
    config.validate().context("Invalid configuration")?;

    init_logging(&config.log_level, config.json_logs);
    info!("Starting vidframes {}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Inspect(args) => commands::inspect(args, config),
        Commands::Crop(args) => commands::crop(args, config),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
