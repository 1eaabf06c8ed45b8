// Pipeline orchestrator - load, edit and save use cases

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::domain::edit::FrameEdit;
use crate::domain::model::{FrameSequence, MediaTime, TrackInfo};
use crate::engine::decoder::Decoder;
use crate::engine::encoder::{remove_if_exists, EncodeReport, Encoder};
use crate::engine::progress::{CancellationToken, PipelinePhase, ProgressSnapshot};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::{AuthorizationStatus, SavedAsset, StoragePort};

/// Result of a completed load
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub track: TrackInfo,
    pub frames: usize,
    pub progress: f64,
    /// Why decoding stopped before the end of the track, if it did
    pub stopped_early: Option<String>,
}

/// What storage did with a written file
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StorageOutcome {
    Saved { asset: SavedAsset },
    PermissionDenied { status: AuthorizationStatus },
    Failed { message: String },
}

impl StorageOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, StorageOutcome::Saved { .. })
    }
}

/// Result of a save whose encode succeeded
#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub encode: EncodeReport,
    pub storage: StorageOutcome,
}

/// Scratch output removed on every exit path of `save`
struct ScratchFile {
    path: PathBuf,
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!("Failed to remove scratch file {}: {}", self.path.display(), e);
        }
    }
}

/// Owns one decoder and one encoder and exposes the frame sequences they
/// produce and consume.
///
/// The decoded and modified sequences are observable through `watch`
/// channels; the load loop is their only writer.
pub struct PipelineOrchestrator {
    decoder: tokio::sync::Mutex<Decoder>,
    encoder: Encoder,
    storage: Arc<dyn StoragePort>,
    config: PipelineConfig,
    frames: watch::Sender<FrameSequence>,
    modified: watch::Sender<FrameSequence>,
    track: watch::Sender<Option<TrackInfo>>,
    phase: watch::Sender<PipelinePhase>,
    save_lock: tokio::sync::Mutex<()>,
    active_cancel: Mutex<CancellationToken>,
}

impl PipelineOrchestrator {
    pub fn new(
        decoder: Decoder,
        encoder: Encoder,
        storage: Arc<dyn StoragePort>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            decoder: tokio::sync::Mutex::new(decoder),
            encoder,
            storage,
            config,
            frames: watch::Sender::new(FrameSequence::new()),
            modified: watch::Sender::new(FrameSequence::new()),
            track: watch::Sender::new(None),
            phase: watch::Sender::new(PipelinePhase::Idle),
            save_lock: tokio::sync::Mutex::new(()),
            active_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Decode every frame of `source` into the observable sequence.
    ///
    /// The sequence is emptied before the source is opened and grows one
    /// frame at a time. A read failure part-way through keeps the frames
    /// decoded so far and is reported in [`LoadReport::stopped_early`].
    pub async fn load(&self, source: &Path) -> PipelineResult<LoadReport> {
        let mut decoder = self.decoder.lock().await;
        let cancel = self.new_cancellation();

        self.frames.send_replace(FrameSequence::new());
        self.modified.send_replace(FrameSequence::new());
        self.track.send_replace(None);
        self.phase.send_replace(PipelinePhase::Loading);

        let track = match decoder.open(source) {
            Ok(track) => track,
            Err(e) => {
                warn!("Failed to load {}: {}", source.display(), e);
                self.phase.send_replace(PipelinePhase::Failed);
                return Err(e);
            }
        };
        info!("Video loaded successfully: {}", source.display());
        self.track.send_replace(Some(track.clone()));

        loop {
            if cancel.is_cancelled() {
                decoder.close();
                self.phase.send_replace(PipelinePhase::Failed);
                return Err(PipelineError::Cancelled);
            }
            let Some(frame) = decoder.next_frame() else {
                break;
            };
            self.frames.send_modify(|frames| frames.push(frame));
            tokio::task::yield_now().await;
        }

        let stopped_early = decoder.take_last_error().map(|e| e.to_string());
        self.phase.send_replace(PipelinePhase::Loaded);

        let progress = self.progress();
        info!("Decoded {} frames ({:.0}%)", progress.frames, progress.percent());
        Ok(LoadReport {
            track,
            frames: progress.frames,
            progress: progress.fraction,
            stopped_early,
        })
    }

    /// Read the track of `source` without decoding any frames
    pub async fn inspect(&self, source: &Path) -> PipelineResult<TrackInfo> {
        let mut decoder = self.decoder.lock().await;
        let track = decoder.open(source)?;
        decoder.close();
        Ok(track)
    }

    /// Replace the modified sequence with `edit` applied to the decoded one.
    ///
    /// Returns the number of frames in the new modified sequence.
    pub fn apply_edit(&self, edit: FrameEdit) -> usize {
        let decoded = self.frames.borrow().clone();
        let edited = edit.apply(&decoded);
        let count = edited.len();
        info!("Applied {:?} to {} frames, {} remain", edit, decoded.len(), count);
        self.modified.send_replace(edited);
        count
    }

    /// Replace the modified sequence with frames edited elsewhere
    pub fn set_modified_frames(&self, frames: FrameSequence) {
        self.modified.send_replace(frames);
    }

    /// Encode the modified sequence to the scratch file and hand it to storage.
    ///
    /// The scratch file is removed afterwards whatever the outcome. Storage
    /// refusals are reported in the returned [`SaveReport`]; only encode
    /// failures are errors.
    pub async fn save(&self) -> PipelineResult<SaveReport> {
        let frames = self.modified.borrow().clone();
        if frames.is_empty() {
            warn!("Save requested with no modified frames");
            return Err(PipelineError::NothingToSave);
        }

        let scratch_path = self.config.scratch_path();
        let _saving = self
            .save_lock
            .try_lock()
            .map_err(|_| PipelineError::DestinationBusy {
                path: scratch_path.clone(),
            })?;
        let cancel = self.new_cancellation();
        let _scratch = ScratchFile {
            path: scratch_path.clone(),
        };
        remove_if_exists(&scratch_path)?;

        let frame_duration = self.frame_duration()?;
        self.phase.send_replace(PipelinePhase::Encoding);

        let handle = self
            .encoder
            .create_video_with_cancel(frames, &scratch_path, frame_duration, cancel);
        let report = match handle.wait().await {
            Ok(report) => report,
            Err(e) => {
                warn!("Failed to create video: {}", e);
                self.phase.send_replace(PipelinePhase::Failed);
                return Err(e);
            }
        };

        self.phase.send_replace(PipelinePhase::Saving);
        let storage = self.persist(&scratch_path).await;
        self.phase.send_replace(PipelinePhase::Loaded);

        Ok(SaveReport {
            encode: report,
            storage,
        })
    }

    async fn persist(&self, file: &Path) -> StorageOutcome {
        let mut status = self.storage.authorization_status().await;
        if status == AuthorizationStatus::NotDetermined {
            status = self.storage.request_authorization().await;
        }
        if !status.allows_saving() {
            warn!("Storage access not granted: {}", status);
            return StorageOutcome::PermissionDenied { status };
        }

        match self.storage.save_video(file).await {
            Ok(asset) => {
                info!("Video saved to storage as {}", asset.identifier);
                StorageOutcome::Saved { asset }
            }
            Err(e) => {
                warn!("Failed to save video: {}", e);
                StorageOutcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    /// Stop the running load or encode at its next frame boundary
    pub fn cancel(&self) {
        if let Ok(token) = self.active_cancel.lock() {
            token.cancel();
        }
    }

    /// Replace the active token, so `cancel` reaches the work about to start
    fn new_cancellation(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut active) = self.active_cancel.lock() {
            *active = token.clone();
        }
        token
    }

    /// Frame duration of the loaded track, or the configured fallback
    pub fn frame_duration(&self) -> PipelineResult<Option<MediaTime>> {
        let from_track = self
            .track
            .borrow()
            .as_ref()
            .and_then(|track| track.clock.frame_duration);
        match from_track {
            Some(duration) => Ok(Some(duration)),
            None => self.config.fallback_frame_duration(),
        }
    }

    /// Decode progress, recomputed from the current frame count
    pub fn progress(&self) -> ProgressSnapshot {
        let frames = self.frames.borrow().len();
        let phase = *self.phase.borrow();
        let track = self.track.borrow();
        ProgressSnapshot::observe(phase, frames, track.as_ref().map(|t| &t.clock))
    }

    pub fn frames(&self) -> FrameSequence {
        self.frames.borrow().clone()
    }

    pub fn modified_frames(&self) -> FrameSequence {
        self.modified.borrow().clone()
    }

    pub fn track(&self) -> Option<TrackInfo> {
        self.track.borrow().clone()
    }

    pub fn phase(&self) -> PipelinePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<FrameSequence> {
        self.frames.subscribe()
    }

    pub fn subscribe_modified(&self) -> watch::Receiver<FrameSequence> {
        self.modified.subscribe()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<PipelinePhase> {
        self.phase.subscribe()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
