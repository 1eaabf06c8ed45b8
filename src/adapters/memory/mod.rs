// In-memory media backend - synthetic sources and recording writers

mod storage;

pub use storage::MockStorage;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::domain::model::{
    first_video_track, AffineTransform, FrameClock, MediaTime, MetadataItem, TrackInfo, TrackKind,
};
use crate::engine::color::rgb_to_ycbcr;
use crate::engine::pixel_buffer::PixelBuffer;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{
    AssetWriter, MediaBackend, OutputSettings, SampleFormat, SampleReader, VideoSample,
};

/// Description of a generated track
#[derive(Debug, Clone)]
pub struct SyntheticTrack {
    pub kind: TrackKind,
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub frame_duration: Option<MediaTime>,
    pub total_duration: Option<MediaTime>,
    pub transform: AffineTransform,
    pub metadata: Vec<MetadataItem>,
    fail_setup: bool,
    fail_at_sample: Option<usize>,
}

impl SyntheticTrack {
    pub fn new(width: u32, height: u32, frame_count: usize, frame_duration: MediaTime) -> Self {
        Self {
            kind: TrackKind::Video,
            width,
            height,
            frame_count,
            frame_duration: Some(frame_duration),
            total_duration: Some(frame_duration.multiply(frame_count as i64)),
            transform: AffineTransform::identity(),
            metadata: Vec::new(),
            fail_setup: false,
            fail_at_sample: None,
        }
    }

    /// A sound track with no pictures
    pub fn audio() -> Self {
        Self {
            kind: TrackKind::Audio,
            width: 0,
            height: 0,
            frame_count: 0,
            frame_duration: None,
            total_duration: None,
            transform: AffineTransform::identity(),
            metadata: Vec::new(),
            fail_setup: false,
            fail_at_sample: None,
        }
    }

    /// Mark the track as embedded cover art
    pub fn as_attached_picture(mut self) -> Self {
        self.kind = TrackKind::AttachedPicture;
        self
    }

    pub fn with_transform(mut self, transform: AffineTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push(MetadataItem::new(key, value));
        self
    }

    pub fn without_frame_duration(mut self) -> Self {
        self.frame_duration = None;
        self
    }

    /// Reader setup fails after the track loads
    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// Reading fails on the sample with this index
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at_sample = Some(index);
        self
    }

    fn sample(&self, index: usize) -> VideoSample {
        let (r, g, b) = synthetic_color(index);
        let (luma, cb, cr) = rgb_to_ycbcr(r, g, b);
        let chroma_stride = (self.width as usize).div_ceil(2) * 2;
        let chroma_rows = (self.height as usize).div_ceil(2);
        let chroma = [cb, cr].repeat(chroma_stride / 2 * chroma_rows);

        VideoSample {
            width: self.width,
            height: self.height,
            format: SampleFormat::Nv12FullRange,
            luma: vec![luma; self.width as usize * self.height as usize],
            luma_stride: self.width as usize,
            chroma,
            chroma_stride,
            presentation_time: self.frame_duration.map(|d| d.multiply(index as i64)),
        }
    }
}

/// Colour of generated frame `index`
pub fn synthetic_color(index: usize) -> (u8, u8, u8) {
    let step = (index * 23 % 200) as u8;
    (40 + step, 200 - step, 120)
}

/// What a memory writer received
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterRecording {
    pub settings: Option<OutputSettings>,
    pub started: bool,
    pub presentation_times: Vec<MediaTime>,
    pub frame_sizes: Vec<(u32, u32)>,
    /// ARGB value of the top-left pixel of every appended buffer
    pub first_pixels: Vec<[u8; 4]>,
    pub rejected_appends: usize,
    pub readiness_waits: usize,
    pub marked_finished: bool,
    pub finished: bool,
}

impl WriterRecording {
    pub fn presentation_seconds(&self) -> Vec<f64> {
        self.presentation_times.iter().map(MediaTime::seconds).collect()
    }
}

type Recordings = Arc<Mutex<HashMap<PathBuf, WriterRecording>>>;

/// Media backend over generated tracks. Writers record what they receive and
/// write a JSON summary to the destination when finished.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    sources: HashMap<PathBuf, Vec<SyntheticTrack>>,
    readiness_window: Option<usize>,
    rejected_appends: HashSet<usize>,
    refuse_settings: bool,
    fail_start: bool,
    recordings: Recordings,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(self, path: impl Into<PathBuf>, track: SyntheticTrack) -> Self {
        self.with_tracks(path, vec![track])
    }

    /// A container holding `tracks` in this order
    pub fn with_tracks(mut self, path: impl Into<PathBuf>, tracks: Vec<SyntheticTrack>) -> Self {
        self.sources.insert(path.into(), tracks);
        self
    }

    /// A container that opens but has no video track
    pub fn with_audio_only_source(self, path: impl Into<PathBuf>) -> Self {
        self.with_tracks(path, vec![SyntheticTrack::audio()])
    }

    /// Writers drop readiness after `frames` appends until waited on
    pub fn with_readiness_window(mut self, frames: usize) -> Self {
        self.readiness_window = Some(frames.max(1));
        self
    }

    /// Writers reject the append attempts with these indices
    pub fn rejecting_appends(mut self, attempts: &[usize]) -> Self {
        self.rejected_appends = attempts.iter().copied().collect();
        self
    }

    pub fn refusing_settings(mut self) -> Self {
        self.refuse_settings = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Recording of the last writer created for `destination`
    pub fn recording(&self, destination: &Path) -> Option<WriterRecording> {
        let destination = std::path::absolute(destination).unwrap_or_else(|_| destination.to_path_buf());
        self.recordings
            .lock()
            .ok()
            .and_then(|recordings| recordings.get(&destination).cloned())
    }
}

impl MediaBackend for MemoryBackend {
    fn open_reader(&self, source: &Path) -> PipelineResult<Box<dyn SampleReader>> {
        match self.sources.get(source) {
            Some(tracks) => Ok(Box::new(MemoryReader {
                path: source.to_path_buf(),
                tracks: tracks.clone(),
                output_added: false,
                reading: false,
                next_sample: 0,
            })),
            None => Err(PipelineError::LoadFailed {
                reason: format!("no such source: {}", source.display()),
            }),
        }
    }

    fn create_writer(
        &self,
        destination: &Path,
        settings: &OutputSettings,
    ) -> PipelineResult<Box<dyn AssetWriter>> {
        Ok(Box::new(MemoryWriter {
            destination: destination.to_path_buf(),
            settings: settings.clone(),
            readiness_window: self.readiness_window,
            rejected_appends: self.rejected_appends.clone(),
            refuse_settings: self.refuse_settings,
            fail_start: self.fail_start,
            pending: 0,
            append_attempts: 0,
            recording: WriterRecording::default(),
            recordings: Arc::clone(&self.recordings),
        }))
    }
}

struct MemoryReader {
    path: PathBuf,
    tracks: Vec<SyntheticTrack>,
    output_added: bool,
    reading: bool,
    next_sample: usize,
}

impl MemoryReader {
    /// Container index and description of the selected video track
    fn selected(&self) -> PipelineResult<(usize, &SyntheticTrack)> {
        let kinds: Vec<TrackKind> = self.tracks.iter().map(|track| track.kind).collect();
        first_video_track(&kinds)
            .map(|index| (index, &self.tracks[index]))
            .ok_or_else(|| PipelineError::NoVideoTrack {
                path: self.path.display().to_string(),
            })
    }

    fn track(&self) -> PipelineResult<&SyntheticTrack> {
        self.selected().map(|(_, track)| track)
    }
}

impl SampleReader for MemoryReader {
    fn load_video_track(&mut self) -> PipelineResult<TrackInfo> {
        let (track_id, track) = self.selected()?;
        let clock = FrameClock::new(
            track.frame_duration,
            track
                .frame_duration
                .map(|d| (1.0 / d.seconds()) as f32)
                .unwrap_or(0.0),
            track.total_duration,
            track.transform,
        );
        Ok(TrackInfo::new(
            track_id,
            "rawvideo",
            track.width,
            track.height,
            clock,
            track.metadata.clone(),
        ))
    }

    fn add_track_output(&mut self, _format: SampleFormat) -> PipelineResult<()> {
        if self.track()?.fail_setup {
            return Err(PipelineError::ReaderSetupFailed {
                reason: "synthetic output refused".to_string(),
            });
        }
        self.output_added = true;
        Ok(())
    }

    fn start_reading(&mut self) -> PipelineResult<()> {
        if !self.output_added {
            return Err(PipelineError::ReaderSetupFailed {
                reason: "no track output added".to_string(),
            });
        }
        self.reading = true;
        Ok(())
    }

    fn copy_next_sample(&mut self) -> PipelineResult<Option<VideoSample>> {
        if !self.reading {
            return Ok(None);
        }
        let index = self.next_sample;
        let track = self.track()?;
        if track.fail_at_sample == Some(index) {
            return Err(PipelineError::LoadFailed {
                reason: format!("synthetic read failure at sample {}", index),
            });
        }
        if index >= track.frame_count {
            return Ok(None);
        }
        let sample = track.sample(index);
        self.next_sample += 1;
        Ok(Some(sample))
    }
}

struct MemoryWriter {
    destination: PathBuf,
    settings: OutputSettings,
    readiness_window: Option<usize>,
    rejected_appends: HashSet<usize>,
    refuse_settings: bool,
    fail_start: bool,
    pending: usize,
    append_attempts: usize,
    recording: WriterRecording,
    recordings: Recordings,
}

impl MemoryWriter {
    fn publish(&self) {
        if let Ok(mut recordings) = self.recordings.lock() {
            recordings.insert(self.destination.clone(), self.recording.clone());
        }
    }
}

impl AssetWriter for MemoryWriter {
    fn can_apply(&self, settings: &OutputSettings) -> bool {
        !self.refuse_settings && settings.width > 0 && settings.height > 0
    }

    fn start_writing(&mut self) -> PipelineResult<()> {
        if self.fail_start {
            return Err(PipelineError::WriterStartFailed {
                reason: "synthetic start failure".to_string(),
            });
        }
        std::fs::write(&self.destination, b"")?;
        self.recording.settings = Some(self.settings.clone());
        self.recording.started = true;
        self.publish();
        Ok(())
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        self.readiness_window
            .map(|window| self.pending < window)
            .unwrap_or(true)
    }

    fn wait_until_ready(&mut self) -> PipelineResult<()> {
        self.pending = 0;
        self.recording.readiness_waits += 1;
        Ok(())
    }

    fn append(&mut self, buffer: &PixelBuffer, presentation_time: MediaTime) -> PipelineResult<bool> {
        let attempt = self.append_attempts;
        self.append_attempts += 1;
        if self.rejected_appends.contains(&attempt) {
            self.recording.rejected_appends += 1;
            return Ok(false);
        }

        self.pending += 1;
        self.recording.presentation_times.push(presentation_time);
        self.recording.frame_sizes.push((buffer.width(), buffer.height()));
        self.recording.first_pixels.push(buffer.pixel(0, 0));
        self.publish();
        Ok(true)
    }

    fn mark_as_finished(&mut self) -> PipelineResult<()> {
        self.recording.marked_finished = true;
        Ok(())
    }

    fn finish_writing(&mut self) -> PipelineResult<()> {
        self.recording.finished = true;
        let summary = serde_json::to_vec_pretty(&self.recording).map_err(|e| {
            PipelineError::WriterFailed {
                message: e.to_string(),
            }
        })?;
        std::fs::write(&self.destination, summary)?;
        debug!(
            "Memory writer finished {} with {} frames",
            self.destination.display(),
            self.recording.presentation_times.len()
        );
        self.publish();
        Ok(())
    }
}
