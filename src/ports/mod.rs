// Ports - Interface definitions (contracts)

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::model::{MediaTime, TrackInfo};
use crate::engine::pixel_buffer::PixelBuffer;
use crate::error::PipelineResult;

/// Port for opening sources and destinations
pub trait MediaBackend: Send + Sync {
    /// Open a container for reading
    fn open_reader(&self, source: &Path) -> PipelineResult<Box<dyn SampleReader>>;

    /// Create a container writer at `destination`
    fn create_writer(
        &self,
        destination: &Path,
        settings: &OutputSettings,
    ) -> PipelineResult<Box<dyn AssetWriter>>;
}

/// Pull-based reader over one container.
///
/// Call order is `load_video_track`, `add_track_output`, `start_reading`,
/// then `copy_next_sample` until `None`.
pub trait SampleReader: Send {
    /// Select the first video track and load its properties
    fn load_video_track(&mut self) -> PipelineResult<TrackInfo>;

    /// Restrict reading to the selected track, producing samples in `format`
    fn add_track_output(&mut self, format: SampleFormat) -> PipelineResult<()>;

    /// Begin the reading session
    fn start_reading(&mut self) -> PipelineResult<()>;

    /// Next decoded sample, `None` once the track is exhausted
    fn copy_next_sample(&mut self) -> PipelineResult<Option<VideoSample>>;
}

/// Readiness-gated container writer for a single video track.
///
/// Owned by one worker thread for the whole job.
pub trait AssetWriter: Send {
    /// Whether the writer accepts `settings`
    fn can_apply(&self, settings: &OutputSettings) -> bool;

    /// Open the destination and start a session at time zero
    fn start_writing(&mut self) -> PipelineResult<()>;

    /// Whether `append` may be called now
    fn is_ready_for_more_media_data(&self) -> bool;

    /// Block until the writer is ready again or has failed
    fn wait_until_ready(&mut self) -> PipelineResult<()>;

    /// Append one buffer at `presentation_time`.
    ///
    /// `Ok(false)` means the sample was rejected and nothing was written.
    fn append(&mut self, buffer: &PixelBuffer, presentation_time: MediaTime)
        -> PipelineResult<bool>;

    /// No more buffers will be appended
    fn mark_as_finished(&mut self) -> PipelineResult<()>;

    /// Flush and finalize the container
    fn finish_writing(&mut self) -> PipelineResult<()>;
}

/// Pixel layout requested from a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Bi-planar 4:2:0 YCbCr, full range
    Nv12FullRange,
    /// Bi-planar 4:2:0 YCbCr, video range
    Nv12VideoRange,
}

impl SampleFormat {
    pub fn is_full_range(&self) -> bool {
        matches!(self, SampleFormat::Nv12FullRange)
    }
}

/// A decoded NV12 sample
#[derive(Debug, Clone)]
pub struct VideoSample {
    pub width: u32,
    pub height: u32,
    pub format: SampleFormat,
    /// Luma plane, `luma_stride` bytes per row
    pub luma: Vec<u8>,
    pub luma_stride: usize,
    /// Interleaved CbCr plane at half resolution, `chroma_stride` bytes per row
    pub chroma: Vec<u8>,
    pub chroma_stride: usize,
    pub presentation_time: Option<MediaTime>,
}

/// Settings for the single output video track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Ticks per second used for presentation timestamps
    pub timescale: u32,
    /// Length of one frame in `timescale` ticks
    pub frame_ticks: i64,
    /// Nominal frame rate written into the stream
    pub frame_rate: f64,
    pub preset: String,
    pub crf: u8,
    pub threads: usize,
    /// Encoded packets allowed to wait for the muxer before readiness drops
    pub max_pending_packets: usize,
}

/// Output video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
}

/// Storage authorization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Authorized,
    NotDetermined,
    Denied,
    Limited,
    Restricted,
}

impl AuthorizationStatus {
    /// Only full authorization allows saving
    pub fn allows_saving(&self) -> bool {
        matches!(self, AuthorizationStatus::Authorized)
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthorizationStatus::Authorized => "authorized",
            AuthorizationStatus::NotDetermined => "not_determined",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::Limited => "limited",
            AuthorizationStatus::Restricted => "restricted",
        };
        write!(f, "{}", name)
    }
}

/// A file accepted by storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedAsset {
    pub identifier: String,
    pub location: PathBuf,
}

/// Port for the persistent media store
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Current authorization, without prompting
    async fn authorization_status(&self) -> AuthorizationStatus;

    /// Prompt for authorization and return the resulting status
    async fn request_authorization(&self) -> AuthorizationStatus;

    /// Persist a finished video file
    async fn save_video(&self, file: &Path) -> PipelineResult<SavedAsset>;
}
