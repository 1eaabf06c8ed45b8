//! Command implementations

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::app::container::{AppContainer, DefaultAppContainer};
use crate::app::pipeline::{SaveReport, StorageOutcome};
use crate::cli::args::{CropArgs, InspectArgs};
use crate::config::PipelineConfig;
use crate::domain::edit::FrameEdit;
use crate::domain::model::TrackInfo;
use crate::utils::format_duration;

/// Execute the inspect command
pub fn inspect(args: InspectArgs, config: PipelineConfig) -> Result<()> {
    info!("Input: {}", args.input.display());
    ensure_exists(&args.input)?;

    let container = DefaultAppContainer::new(config).context("Failed to initialize FFmpeg")?;
    let pipeline = container.pipeline();
    let track = runtime()?
        .block_on(pipeline.inspect(&args.input))
        .with_context(|| format!("Failed to inspect {}", args.input.display()))?;

    if args.json {
        let json = serde_json::to_string_pretty(&track)
            .context("Failed to serialize track info to JSON")?;
        println!("{}", json);
    } else {
        display_track(&args.input, &track);
    }
    Ok(())
}

/// Execute the crop command: load, crop sides, save
pub fn crop(args: CropArgs, mut config: PipelineConfig) -> Result<()> {
    info!("Input: {}", args.input.display());
    ensure_exists(&args.input)?;

    // Per-run scratch directory, removed on return
    let scratch_guard = match config.scratch_dir {
        Some(_) => None,
        None => {
            let dir = tempfile::Builder::new()
                .prefix("vidframes-")
                .tempdir()
                .context("Failed to create scratch directory")?;
            config.scratch_dir = Some(dir.path().to_path_buf());
            Some(dir)
        }
    };

    let container = DefaultAppContainer::new(config).context("Failed to initialize FFmpeg")?;
    let pipeline = container.pipeline();
    let runtime = runtime()?;

    let report = runtime.block_on(async {
        let loaded = pipeline
            .load(&args.input)
            .await
            .with_context(|| format!("Failed to load {}", args.input.display()))?;
        if let Some(reason) = &loaded.stopped_early {
            warn!("Decoding stopped early after {} frames: {}", loaded.frames, reason);
        }

        let remaining = pipeline.apply_edit(FrameEdit::CropSides);
        info!("{} frames cropped", remaining);

        pipeline.save().await.context("Failed to save cropped video")
    })?;
    drop(scratch_guard);

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize save report to JSON")?;
        println!("{}", json);
    } else {
        display_save(&report);
    }

    match &report.storage {
        StorageOutcome::Saved { .. } => Ok(()),
        StorageOutcome::PermissionDenied { status } => {
            Err(anyhow::anyhow!("Library access not granted ({})", status))
        }
        StorageOutcome::Failed { message } => {
            Err(anyhow::anyhow!("Failed to save into library: {}", message))
        }
    }
}

fn ensure_exists(input: &Path) -> Result<()> {
    if !input.exists() {
        return Err(anyhow::anyhow!("Input file does not exist: {}", input.display()));
    }
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn display_track(input: &Path, track: &TrackInfo) {
    let (display_width, display_height) = track.display_size();
    println!("File: {}", input.display());
    println!("Track: #{} ({})", track.track_id, track.codec);
    println!("Coded size: {}x{}", track.width, track.height);
    println!(
        "Display size: {}x{} (orientation {})",
        display_width, display_height, track.orientation
    );
    if track.clock.nominal_frame_rate > 0.0 {
        println!("Frame rate: {:.3} fps", track.clock.nominal_frame_rate);
    }
    match track.clock.frame_duration {
        Some(duration) => println!("Frame duration: {}", duration),
        None => println!("Frame duration: unknown"),
    }
    if let Some(total) = track.clock.total_duration {
        if let Ok(duration) = Duration::try_from_secs_f64(total.seconds()) {
            println!("Duration: {}", format_duration(duration));
        }
    }
    if !track.metadata.is_empty() {
        println!("Metadata:");
        for item in &track.metadata {
            println!("  {}: {}", item.key, item.value);
        }
    }
}

fn display_save(report: &SaveReport) {
    let encode = &report.encode;
    println!(
        "Encoded {} frames in {}",
        encode.frames_written,
        format_duration(encode.elapsed)
    );
    if encode.frames_skipped > 0 || encode.frames_rejected > 0 {
        println!(
            "Skipped {} frames, writer rejected {}",
            encode.frames_skipped, encode.frames_rejected
        );
    }
    match &report.storage {
        StorageOutcome::Saved { asset } => {
            println!("Saved {} to {}", asset.identifier, asset.location.display())
        }
        StorageOutcome::PermissionDenied { status } => println!("Not saved: access {}", status),
        StorageOutcome::Failed { message } => println!("Not saved: {}", message),
    }
}
