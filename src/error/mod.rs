//! Error handling module for vidframes

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source has no video track
    #[error("No video track found in {path}")]
    NoVideoTrack { path: String },

    /// The source or its track properties could not be loaded
    #[error("Failed to load video: {reason}")]
    LoadFailed { reason: String },

    /// The reading session could not be configured or started
    #[error("Failed to set up reader: {reason}")]
    ReaderSetupFailed { reason: String },

    /// The writer rejected the requested output settings
    #[error("Unsupported output configuration: {reason}")]
    UnsupportedOutputConfig { reason: String },

    /// A pixel buffer could not be allocated for a frame
    #[error("Failed to allocate {width}x{height} pixel buffer")]
    AllocationFailed { width: u32, height: u32 },

    /// A frame could not be drawn into its pixel buffer
    #[error("Failed to draw frame: {message}")]
    DrawFailed { message: String },

    /// The writer failed to start a session
    #[error("Failed to start writer: {reason}")]
    WriterStartFailed { reason: String },

    /// The writer failed while appending or finalizing
    #[error("Writer failed: {message}")]
    WriterFailed { message: String },

    /// Storage access was not granted
    #[error("Storage permission denied (status: {status})")]
    PermissionDenied { status: String },

    /// The storage collaborator failed to persist a file
    #[error("Failed to save to storage: {message}")]
    StorageFailed { message: String },

    /// A job was started without a frame duration
    #[error("Frame duration is not defined")]
    MissingFrameDuration,

    /// A job was started with no frames
    #[error("No frames to encode")]
    EmptyInput,

    /// Another job is already writing to the destination
    #[error("Destination is already in use: {}", path.display())]
    DestinationBusy { path: PathBuf },

    /// Save was requested with an empty modified sequence
    #[error("Nothing to save: the modified frame sequence is empty")]
    NothingToSave,

    /// The job was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The write worker went away without reporting an outcome
    #[error("Encode worker exited without reporting completion")]
    WorkerLost,

    /// A time value was malformed
    #[error("Invalid time: {message}")]
    InvalidTime { message: String },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// FFmpeg error
    #[error("FFmpeg error: {0}")]
    FFmpeg(#[from] ffmpeg_next::Error),
}

impl PipelineError {
    /// Per-frame failures that the encoder skips instead of aborting the job.
    pub fn is_frame_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::AllocationFailed { .. } | PipelineError::DrawFailed { .. }
        )
    }

    /// Failures raised before any frame was consumed.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::NoVideoTrack { .. }
                | PipelineError::LoadFailed { .. }
                | PipelineError::ReaderSetupFailed { .. }
                | PipelineError::UnsupportedOutputConfig { .. }
                | PipelineError::WriterStartFailed { .. }
                | PipelineError::MissingFrameDuration
                | PipelineError::EmptyInput
                | PipelineError::DestinationBusy { .. }
        )
    }
}

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
