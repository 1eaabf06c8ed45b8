//! vidframes
//!
//! Decodes the video track of a media file into an ordered sequence of
//! oriented RGBA frames, applies frame edits, and writes an edited sequence
//! back out as an H.264 track before handing it to a storage collaborator.

pub mod adapters;
pub mod app;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use app::container::{AppContainer, DefaultAppContainer};
pub use app::pipeline::{LoadReport, PipelineOrchestrator, SaveReport, StorageOutcome};
pub use config::PipelineConfig;
pub use domain::edit::FrameEdit;
pub use domain::model::{FrameImage, FrameSequence, MediaTime, Orientation, TrackInfo};
pub use error::{PipelineError, PipelineResult};

/// Initialize FFmpeg for callers that use the libav adapter directly
pub fn init() -> PipelineResult<()> {
    ffmpeg_next::init()?;
    Ok(())
}
