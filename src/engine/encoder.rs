//! Frames to video: job preconditions, the write worker and its state machine

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, warn};

use crate::config::EncoderConfig;
use crate::domain::model::{FrameImage, FrameSequence, MediaTime};
use crate::engine::pixel_buffer::FrameBufferConverter;
use crate::engine::progress::CancellationToken;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{AssetWriter, MediaBackend, OutputSettings, VideoCodec};

/// Name of the write worker thread
pub const WRITER_THREAD_NAME: &str = "vidframes-writer";

/// Outcome of a finished encode job
#[derive(Debug, Clone, Serialize)]
pub struct EncodeReport {
    pub destination: PathBuf,
    pub frames_written: usize,
    /// Frames dropped because they could not be converted
    pub frames_skipped: usize,
    /// Frames the writer refused
    pub frames_rejected: usize,
    /// Presentation time of every appended frame, in order
    pub presentation_times: Vec<MediaTime>,
    /// Times the driver had to wait for the writer
    pub readiness_waits: usize,
    pub elapsed: Duration,
}

impl EncodeReport {
    fn new(destination: PathBuf) -> Self {
        Self {
            destination,
            frames_written: 0,
            frames_skipped: 0,
            frames_rejected: 0,
            presentation_times: Vec::new(),
            readiness_waits: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn presentation_seconds(&self) -> Vec<f64> {
        self.presentation_times.iter().map(MediaTime::seconds).collect()
    }
}

/// Completion of an encode job, delivered exactly once
pub struct EncodeHandle {
    receiver: oneshot::Receiver<PipelineResult<EncodeReport>>,
    cancel: CancellationToken,
}

impl EncodeHandle {
    fn completed(result: PipelineResult<EncodeReport>, cancel: CancellationToken) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(result);
        Self { receiver, cancel }
    }

    /// Ask the worker to stop before its next write
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job outcome
    pub async fn wait(self) -> PipelineResult<EncodeReport> {
        self.receiver.await.unwrap_or(Err(PipelineError::WorkerLost))
    }

    /// Wait for the job outcome from synchronous code
    pub fn wait_blocking(self) -> PipelineResult<EncodeReport> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(PipelineError::WorkerLost))
    }
}

/// Destinations currently owned by a running job
#[derive(Debug, Clone, Default)]
struct ActiveDestinations {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ActiveDestinations {
    fn claim(&self, path: &Path) -> PipelineResult<DestinationClaim> {
        let mut paths = self.paths.lock().map_err(|_| PipelineError::WorkerLost)?;
        if !paths.insert(path.to_path_buf()) {
            return Err(PipelineError::DestinationBusy {
                path: path.to_path_buf(),
            });
        }
        Ok(DestinationClaim {
            registry: self.clone(),
            path: path.to_path_buf(),
        })
    }
}

/// Releases a destination when the job ends
struct DestinationClaim {
    registry: ActiveDestinations,
    path: PathBuf,
}

impl Drop for DestinationClaim {
    fn drop(&mut self) {
        if let Ok(mut paths) = self.registry.paths.lock() {
            paths.remove(&self.path);
        }
    }
}

/// Encodes frame sequences into container files
pub struct Encoder {
    backend: Arc<dyn MediaBackend>,
    converter: Arc<dyn FrameBufferConverter>,
    config: EncoderConfig,
    active: ActiveDestinations,
}

impl Encoder {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        converter: Arc<dyn FrameBufferConverter>,
        config: EncoderConfig,
    ) -> Self {
        Self {
            backend,
            converter,
            config,
            active: ActiveDestinations::default(),
        }
    }

    /// Start writing `frames` to `destination`, one frame every `frame_duration`.
    ///
    /// Preconditions are checked before returning; a failing one completes
    /// the handle immediately and leaves no file behind. Otherwise the frames
    /// are written on a dedicated worker thread.
    pub fn create_video(
        &self,
        frames: FrameSequence,
        destination: &Path,
        frame_duration: Option<MediaTime>,
    ) -> EncodeHandle {
        self.create_video_with_cancel(frames, destination, frame_duration, CancellationToken::new())
    }

    /// Like [`Encoder::create_video`], stopping once `cancel` fires.
    ///
    /// A token that fires before the worker starts writing still fails the
    /// job with `Cancelled`.
    pub fn create_video_with_cancel(
        &self,
        frames: FrameSequence,
        destination: &Path,
        frame_duration: Option<MediaTime>,
        cancel: CancellationToken,
    ) -> EncodeHandle {
        let destination = std::path::absolute(destination).unwrap_or_else(|_| destination.to_path_buf());

        let (frame_duration, claim) = match self.check_preconditions(&frames, &destination, frame_duration) {
            Ok(checked) => checked,
            Err(e) => {
                warn!("Encode job for {} refused: {}", destination.display(), e);
                return EncodeHandle::completed(Err(e), cancel);
            }
        };

        let (sender, receiver) = oneshot::channel();
        let job = EncodeJob {
            backend: Arc::clone(&self.backend),
            converter: Arc::clone(&self.converter),
            settings: self.output_settings(&frames, frame_duration),
            frames,
            destination,
            frame_duration,
            cancel: cancel.clone(),
        };

        let spawned = std::thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || {
                let _claim = claim;
                let span = info_span!("encode", destination = %job.destination.display());
                let _entered = span.enter();
                let result = job.run();
                let _ = sender.send(result);
            });
        if let Err(e) = spawned {
            error!("Failed to spawn {} thread: {}", WRITER_THREAD_NAME, e);
        }

        EncodeHandle { receiver, cancel }
    }

    fn check_preconditions(
        &self,
        frames: &FrameSequence,
        destination: &Path,
        frame_duration: Option<MediaTime>,
    ) -> PipelineResult<(MediaTime, DestinationClaim)> {
        let frame_duration = frame_duration
            .filter(MediaTime::is_positive)
            .ok_or(PipelineError::MissingFrameDuration)?;
        if frames.is_empty() {
            return Err(PipelineError::EmptyInput);
        }

        let claim = self.active.claim(destination)?;

        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(PipelineError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("destination directory does not exist: {}", parent.display()),
            )));
        }

        remove_if_exists(destination)?;
        Ok((frame_duration, claim))
    }

    fn output_settings(&self, frames: &FrameSequence, frame_duration: MediaTime) -> OutputSettings {
        let (width, height) = frames
            .first()
            .map(|frame| (frame.width(), frame.height()))
            .unwrap_or((0, 0));
        OutputSettings {
            codec: VideoCodec::H264,
            width,
            height,
            timescale: frame_duration.timescale,
            frame_ticks: frame_duration.value,
            frame_rate: frame_duration.timescale as f64 / frame_duration.value as f64,
            preset: self.config.preset.clone(),
            crf: self.config.crf,
            threads: self.config.threads,
            max_pending_packets: self.config.max_pending_packets,
        }
    }
}

/// Everything the worker thread owns
struct EncodeJob {
    backend: Arc<dyn MediaBackend>,
    converter: Arc<dyn FrameBufferConverter>,
    settings: OutputSettings,
    frames: FrameSequence,
    destination: PathBuf,
    frame_duration: MediaTime,
    cancel: CancellationToken,
}

impl EncodeJob {
    fn run(self) -> PipelineResult<EncodeReport> {
        let started = Instant::now();
        let destination = self.destination.clone();
        info!(
            "Encoding {} frames at {}x{}",
            self.frames.len(),
            self.settings.width,
            self.settings.height
        );

        let result = self.write().map(|mut report| {
            report.elapsed = started.elapsed();
            report
        });

        match &result {
            Ok(report) => {
                if report.frames_written == 0 {
                    warn!("Finished without writing any frames");
                }
                info!(
                    "Wrote {} frames ({} skipped) in {:.2}s",
                    report.frames_written,
                    report.frames_skipped,
                    report.elapsed.as_secs_f64()
                );
            }
            Err(e) => {
                error!("Encode failed: {}", e);
                if let Err(cleanup) = remove_if_exists(&destination) {
                    warn!("Failed to remove partial output: {}", cleanup);
                }
            }
        }
        result
    }

    fn write(self) -> PipelineResult<EncodeReport> {
        let mut writer = self
            .backend
            .create_writer(&self.destination, &self.settings)
            .map_err(|e| match e {
                PipelineError::UnsupportedOutputConfig { .. } => e,
                other => PipelineError::WriterStartFailed {
                    reason: other.to_string(),
                },
            })?;

        if !writer.can_apply(&self.settings) {
            return Err(PipelineError::UnsupportedOutputConfig {
                reason: format!(
                    "{:?} {}x{} at {:.3} fps",
                    self.settings.codec,
                    self.settings.width,
                    self.settings.height,
                    self.settings.frame_rate
                ),
            });
        }

        writer.start_writing().map_err(|e| match e {
            PipelineError::WriterStartFailed { .. } => e,
            other => PipelineError::WriterStartFailed {
                reason: other.to_string(),
            },
        })?;

        let driver = WriteDriver::new(
            writer,
            self.converter,
            self.frames,
            self.frame_duration,
            self.cancel,
            EncodeReport::new(self.destination),
        );
        driver.run()
    }
}

/// States of the readiness-gated write loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteState {
    Idle,
    Draining,
    WaitingForReadiness,
    Finalizing,
    Done,
    Failed,
}

/// Pushes queued frames into a writer only while it reports readiness.
///
/// The presentation time of each frame is `frame_duration * index`, where the
/// index only advances on a successful append.
pub struct WriteDriver {
    writer: Box<dyn AssetWriter>,
    converter: Arc<dyn FrameBufferConverter>,
    queue: VecDeque<FrameImage>,
    frame_duration: MediaTime,
    frame_index: i64,
    cancel: CancellationToken,
    state: WriteState,
    report: EncodeReport,
}

impl WriteDriver {
    fn new(
        writer: Box<dyn AssetWriter>,
        converter: Arc<dyn FrameBufferConverter>,
        frames: FrameSequence,
        frame_duration: MediaTime,
        cancel: CancellationToken,
        report: EncodeReport,
    ) -> Self {
        Self {
            writer,
            converter,
            queue: frames.into_iter().collect(),
            frame_duration,
            frame_index: 0,
            cancel,
            state: WriteState::Idle,
            report,
        }
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    /// Drive the writer until the queue is finalized or a step fails
    pub fn run(mut self) -> PipelineResult<EncodeReport> {
        loop {
            match self.step() {
                Ok(WriteState::Done) => {
                    self.state = WriteState::Done;
                    return Ok(self.report);
                }
                Ok(next) => self.state = next,
                Err(e) => {
                    self.state = WriteState::Failed;
                    return Err(e);
                }
            }
        }
    }

    fn step(&mut self) -> PipelineResult<WriteState> {
        match self.state {
            WriteState::Idle => Ok(WriteState::Draining),
            WriteState::Draining => self.drain(),
            WriteState::WaitingForReadiness => {
                self.check_cancelled()?;
                self.report.readiness_waits += 1;
                debug!("Writer not ready, waiting ({} frames queued)", self.queue.len());
                self.writer.wait_until_ready()?;
                Ok(WriteState::Draining)
            }
            WriteState::Finalizing => {
                self.writer.mark_as_finished()?;
                self.writer.finish_writing()?;
                Ok(WriteState::Done)
            }
            WriteState::Done => Ok(WriteState::Done),
            WriteState::Failed => Err(PipelineError::WriterFailed {
                message: "write loop already failed".to_string(),
            }),
        }
    }

    fn drain(&mut self) -> PipelineResult<WriteState> {
        while self.writer.is_ready_for_more_media_data() {
            self.check_cancelled()?;

            let Some(frame) = self.queue.pop_front() else {
                return Ok(WriteState::Finalizing);
            };

            let buffer = match self.converter.to_pixel_buffer(&frame) {
                Ok(buffer) => buffer,
                Err(e) if e.is_frame_recoverable() => {
                    warn!("Skipping frame after {} written: {}", self.frame_index, e);
                    self.report.frames_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let presentation_time = self.frame_duration.multiply(self.frame_index);
            if self.writer.append(&buffer, presentation_time)? {
                debug!("Appended frame {} at {:.3}s", self.frame_index, presentation_time.seconds());
                self.frame_index += 1;
                self.report.frames_written += 1;
                self.report.presentation_times.push(presentation_time);
            } else {
                warn!("Writer rejected frame at {:.3}s", presentation_time.seconds());
                self.report.frames_rejected += 1;
            }
        }

        if self.queue.is_empty() {
            Ok(WriteState::Finalizing)
        } else {
            Ok(WriteState::WaitingForReadiness)
        }
    }

    fn check_cancelled(&self) -> PipelineResult<()> {
        if self.cancel.is_cancelled() {
            info!("Encode cancelled with {} frames queued", self.queue.len());
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

/// Remove `path`, treating a missing file as success
pub fn remove_if_exists(path: &Path) -> PipelineResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed existing file: {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PipelineError::Io(e)),
    }
}
