// LibAV adapter - demux/decode and encode/mux through ffmpeg-next

mod reader;
mod writer;

use std::path::Path;

use ffmpeg_next::software::scaling;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::ports::{AssetWriter, MediaBackend, OutputSettings, SampleReader};

pub use reader::FfmpegReader;
pub use writer::FfmpegWriter;

/// Media backend built on FFmpeg
pub struct FfmpegBackend;

impl FfmpegBackend {
    /// Initialize FFmpeg and quiet its own logging below errors
    pub fn new() -> PipelineResult<Self> {
        ffmpeg_next::init()?;
        ffmpeg_next::util::log::set_level(ffmpeg_next::util::log::Level::Error);
        debug!("FFmpeg initialized");
        Ok(Self)
    }

    /// Whether an H.264 encoder is compiled into the linked FFmpeg
    pub fn has_h264_encoder() -> bool {
        ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::H264).is_some()
    }
}

impl MediaBackend for FfmpegBackend {
    fn open_reader(&self, source: &Path) -> PipelineResult<Box<dyn SampleReader>> {
        Ok(Box::new(FfmpegReader::open(source)?))
    }

    fn create_writer(
        &self,
        destination: &Path,
        settings: &OutputSettings,
    ) -> PipelineResult<Box<dyn AssetWriter>> {
        Ok(Box::new(FfmpegWriter::new(destination, settings.clone())))
    }
}

/// Scaler that can move to the worker thread with its owner.
///
/// SwsContext is only ever used by the single thread owning the reader or
/// writer it belongs to.
struct SendScaler(scaling::Context);

// SAFETY: the context is never shared; it moves together with its owner.
unsafe impl Send for SendScaler {}

impl std::ops::Deref for SendScaler {
    type Target = scaling::Context;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::ops::DerefMut for SendScaler {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn ffmpeg_failure(context: &str, error: ffmpeg_next::Error) -> PipelineError {
    PipelineError::WriterFailed {
        message: format!("{}: {}", context, error),
    }
}
