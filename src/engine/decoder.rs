//! Video to frames: track selection and lazy frame pulling

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::domain::model::{FrameImage, Orientation, TrackInfo};
use crate::engine::color::nv12_to_rgba;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{MediaBackend, SampleFormat, SampleReader};

/// Pulls decoded frames from one source at a time.
///
/// The reader is released as soon as the track is exhausted or a read fails.
pub struct Decoder {
    backend: Arc<dyn MediaBackend>,
    reader: Option<Box<dyn SampleReader>>,
    track: Option<TrackInfo>,
    frames_read: usize,
    last_error: Option<PipelineError>,
}

impl Decoder {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            reader: None,
            track: None,
            frames_read: 0,
            last_error: None,
        }
    }

    /// Open `source`, select its first video track and start reading it.
    ///
    /// Any previously opened source is released first.
    pub fn open(&mut self, source: &Path) -> PipelineResult<TrackInfo> {
        self.close();
        self.track = None;
        self.frames_read = 0;
        self.last_error = None;

        info!("Opening source: {}", source.display());
        let mut reader = self.backend.open_reader(source)?;
        let track = reader.load_video_track()?;

        reader
            .add_track_output(SampleFormat::Nv12FullRange)
            .map_err(as_reader_setup)?;
        reader.start_reading().map_err(as_reader_setup)?;

        info!(
            track_id = track.track_id,
            codec = %track.codec,
            width = track.width,
            height = track.height,
            orientation = %track.orientation,
            "Selected video track"
        );
        if let Some(duration) = track.clock.total_duration {
            info!("Video duration: {:.3}s", duration.seconds());
        }

        self.reader = Some(reader);
        self.track = Some(track.clone());
        Ok(track)
    }

    /// Next frame, or `None` at the end of the track or on the first failure.
    ///
    /// A failure is kept and can be inspected through [`Decoder::take_last_error`].
    pub fn next_frame(&mut self) -> Option<FrameImage> {
        match self.try_next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Stopping decode after {} frames: {}", self.frames_read, e);
                self.last_error = Some(e);
                None
            }
        }
    }

    /// Next frame, distinguishing read failures from the end of the track.
    pub fn try_next_frame(&mut self) -> PipelineResult<Option<FrameImage>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let sample = match reader.copy_next_sample() {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                debug!("Track exhausted after {} frames", self.frames_read);
                self.close();
                return Ok(None);
            }
            Err(e) => {
                self.close();
                return Err(e);
            }
        };

        let rgba = match nv12_to_rgba(&sample) {
            Ok(rgba) => rgba,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };

        let orientation = self.orientation();
        let pixels = if orientation == Orientation::Up {
            rgba
        } else {
            orientation.apply(&rgba)
        };

        let mut frame = FrameImage::new(pixels);
        if let Some(time) = sample.presentation_time {
            frame = frame.with_presentation_time(time);
        }
        self.frames_read += 1;
        Ok(Some(frame))
    }

    /// Track selected by the last successful `open`
    pub fn track(&self) -> Option<&TrackInfo> {
        self.track.as_ref()
    }

    pub fn orientation(&self) -> Orientation {
        self.track
            .as_ref()
            .map(|track| track.orientation)
            .unwrap_or_default()
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    /// Whether a source is open and not yet exhausted
    pub fn is_reading(&self) -> bool {
        self.reader.is_some()
    }

    pub fn take_last_error(&mut self) -> Option<PipelineError> {
        self.last_error.take()
    }

    /// Release the current source, if any
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Released source reader");
        }
    }
}

fn as_reader_setup(error: PipelineError) -> PipelineError {
    match error {
        PipelineError::ReaderSetupFailed { .. } => error,
        other => PipelineError::ReaderSetupFailed {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{synthetic_color, MemoryBackend, SyntheticTrack};
    use crate::domain::model::{AffineTransform, MediaTime};

    fn tenth() -> MediaTime {
        MediaTime::new(1, 10).unwrap()
    }

    fn decoder_for(track: SyntheticTrack) -> Decoder {
        let backend = MemoryBackend::new().with_source("clip.mov", track);
        Decoder::new(Arc::new(backend))
    }

    #[test]
    fn pulls_frames_in_order_then_releases_reader() {
        let mut decoder = decoder_for(SyntheticTrack::new(8, 6, 3, tenth()));
        decoder.open(Path::new("clip.mov")).unwrap();

        let mut times = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            assert_eq!((frame.width(), frame.height()), (8, 6));
            times.push(frame.presentation_time().unwrap().seconds());
        }

        assert_eq!(times, vec![0.0, 0.1, 0.2]);
        assert_eq!(decoder.frames_read(), 3);
        assert!(!decoder.is_reading());
        assert!(decoder.take_last_error().is_none());
    }

    #[test]
    fn decoded_colour_matches_source() {
        let mut decoder = decoder_for(SyntheticTrack::new(4, 4, 1, tenth()));
        decoder.open(Path::new("clip.mov")).unwrap();

        let frame = decoder.next_frame().unwrap();
        let pixel = frame.pixels().get_pixel(1, 1);
        let (r, g, b) = synthetic_color(0);
        assert!(pixel[0].abs_diff(r) <= 2);
        assert!(pixel[1].abs_diff(g) <= 2);
        assert!(pixel[2].abs_diff(b) <= 2);
        assert_eq!(pixel[3], 255);
    }

    #[test]
    fn rotated_track_yields_upright_frames() {
        let track = SyntheticTrack::new(8, 4, 1, tenth()).with_transform(AffineTransform::rotation(90.0));
        let mut decoder = decoder_for(track);
        let info = decoder.open(Path::new("clip.mov")).unwrap();

        assert_eq!(info.orientation, Orientation::Left);
        let frame = decoder.next_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 8));
    }

    #[test]
    fn read_failure_keeps_error_and_stops() {
        let mut decoder = decoder_for(SyntheticTrack::new(4, 4, 5, tenth()).failing_at(2));
        decoder.open(Path::new("clip.mov")).unwrap();

        assert!(decoder.next_frame().is_some());
        assert!(decoder.next_frame().is_some());
        assert!(decoder.next_frame().is_none());
        assert!(matches!(
            decoder.take_last_error(),
            Some(PipelineError::LoadFailed { .. })
        ));
        assert!(!decoder.is_reading());
    }

    #[test]
    fn setup_failure_is_reported_as_reader_setup() {
        let mut decoder = decoder_for(SyntheticTrack::new(4, 4, 5, tenth()).failing_setup());
        let err = decoder.open(Path::new("clip.mov")).unwrap_err();
        assert!(matches!(err, PipelineError::ReaderSetupFailed { .. }));
        assert!(decoder.track().is_none());
    }

    #[test]
    fn missing_video_track_fails_open() {
        let backend = MemoryBackend::new().with_audio_only_source("voice.m4a");
        let mut decoder = Decoder::new(Arc::new(backend));
        let err = decoder.open(Path::new("voice.m4a")).unwrap_err();
        assert!(matches!(err, PipelineError::NoVideoTrack { .. }));
    }

    #[test]
    fn first_video_track_wins_over_later_ones() {
        let backend = MemoryBackend::new().with_tracks(
            "multi.mov",
            vec![
                SyntheticTrack::audio(),
                SyntheticTrack::new(16, 16, 1, tenth()).as_attached_picture(),
                SyntheticTrack::new(8, 6, 2, tenth()),
                SyntheticTrack::new(32, 24, 9, tenth()),
            ],
        );
        let mut decoder = Decoder::new(Arc::new(backend));
        let info = decoder.open(Path::new("multi.mov")).unwrap();

        assert_eq!(info.track_id, 2);
        assert_eq!((info.width, info.height), (8, 6));
        let mut count = 0;
        while let Some(frame) = decoder.next_frame() {
            assert_eq!((frame.width(), frame.height()), (8, 6));
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn cover_art_alone_is_not_a_video_track() {
        let backend = MemoryBackend::new().with_tracks(
            "song.m4a",
            vec![
                SyntheticTrack::audio(),
                SyntheticTrack::new(16, 16, 1, tenth()).as_attached_picture(),
            ],
        );
        let mut decoder = Decoder::new(Arc::new(backend));
        let err = decoder.open(Path::new("song.m4a")).unwrap_err();
        assert!(matches!(err, PipelineError::NoVideoTrack { .. }));
    }
}
