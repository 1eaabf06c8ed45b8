//! End-to-end pipeline behaviour over the in-memory media backend

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};

use tempfile::TempDir;
use vidframes::adapters::memory::{MemoryBackend, MockStorage, SyntheticTrack};
use vidframes::domain::model::{AffineTransform, FrameImage, MediaTime, Orientation, PixelRect};
use vidframes::engine::pixel_buffer::{ArgbFrameConverter, FrameBufferConverter, PixelBuffer};
use vidframes::engine::progress::PipelinePhase;
use vidframes::ports::AuthorizationStatus;
use vidframes::{
    AppContainer, DefaultAppContainer, FrameEdit, PipelineConfig, PipelineError,
    PipelineOrchestrator, PipelineResult, StorageOutcome,
};

const SOURCE: &str = "clip.mov";

struct Fixture {
    pipeline: Arc<PipelineOrchestrator>,
    backend: MemoryBackend,
    storage: Arc<MockStorage>,
    scratch: PathBuf,
    _dir: TempDir,
}

fn config_in(dir: &TempDir) -> PipelineConfig {
    PipelineConfig {
        scratch_dir: Some(dir.path().to_path_buf()),
        ..PipelineConfig::default()
    }
}

fn fixture(backend: MemoryBackend, storage: MockStorage) -> Fixture {
    fixture_with(backend, storage, Arc::new(ArgbFrameConverter), |_| {})
}

fn fixture_with(
    backend: MemoryBackend,
    storage: MockStorage,
    converter: Arc<dyn FrameBufferConverter>,
    configure: impl FnOnce(&mut PipelineConfig),
) -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    configure(&mut config);
    let scratch = config.scratch_path();
    let storage = Arc::new(storage);
    let container = DefaultAppContainer::with_converter(
        Arc::new(backend.clone()),
        storage.clone(),
        converter,
        config,
    );
    Fixture {
        pipeline: container.pipeline(),
        backend,
        storage,
        scratch,
        _dir: dir,
    }
}

fn per_second(fps: u32) -> MediaTime {
    MediaTime::new(1, fps).unwrap()
}

fn authorized() -> MockStorage {
    MockStorage::new(AuthorizationStatus::Authorized)
}

#[tokio::test]
async fn load_decodes_every_frame_and_reports_full_progress() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(16, 16, 10, per_second(25)));
    let fx = fixture(backend, authorized());
    let observer = fx.pipeline.subscribe_frames();

    let report = fx.pipeline.load(Path::new(SOURCE)).await.unwrap();

    assert_eq!(report.frames, 10);
    assert!((report.progress - 1.0).abs() < 1e-9);
    assert!(report.stopped_early.is_none());
    assert_eq!(observer.borrow().len(), 10);
    assert_eq!(fx.pipeline.phase(), PipelinePhase::Loaded);
    assert_eq!(fx.pipeline.progress().percent().round(), 100.0);
}

#[tokio::test]
async fn frames_keep_decode_order() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(4, 4, 4, per_second(10)));
    let fx = fixture(backend, authorized());

    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();

    let times: Vec<f64> = fx
        .pipeline
        .frames()
        .iter()
        .filter_map(FrameImage::presentation_time)
        .map(|t| t.seconds())
        .collect();
    assert_eq!(times, vec![0.0, 0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn crop_sides_halves_each_dimension() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(100, 100, 3, per_second(30)));
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();

    let count = fx.pipeline.apply_edit(FrameEdit::CropSides);

    assert_eq!(count, 3);
    let modified = fx.pipeline.modified_frames();
    assert!(modified.iter().all(|f| (f.width(), f.height()) == (50, 50)));
    // Decoded frames stay untouched
    assert!(fx.pipeline.frames().iter().all(|f| f.width() == 100));
}

#[tokio::test]
async fn empty_crop_drops_frames() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(20, 20, 2, per_second(30)));
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();

    let count = fx.pipeline.apply_edit(FrameEdit::Crop(PixelRect::new(30, 30, 5, 5)));

    assert_eq!(count, 0);
    assert!(fx.pipeline.modified_frames().is_empty());
}

#[tokio::test]
async fn save_writes_exact_timestamps_and_hands_file_to_storage() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 5, per_second(10)));
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.apply_edit(FrameEdit::CropSides);

    let report = fx.pipeline.save().await.unwrap();

    assert_eq!(report.encode.presentation_seconds(), vec![0.0, 0.1, 0.2, 0.3, 0.4]);
    assert!(report.storage.is_saved());
    assert_eq!(fx.storage.saved_files().len(), 1);
    let recording = fx.backend.recording(&fx.scratch).unwrap();
    assert!(recording.frame_sizes.iter().all(|&size| size == (4, 4)));
    assert!(recording.finished);
    assert!(!fx.scratch.exists(), "scratch file must be removed");
    assert_eq!(fx.pipeline.phase(), PipelinePhase::Loaded);
}

struct FailingThird;

impl FrameBufferConverter for FailingThird {
    fn to_pixel_buffer(&self, frame: &FrameImage) -> PipelineResult<PixelBuffer> {
        let third = MediaTime::new(2, 10).unwrap();
        if frame.presentation_time() == Some(third) {
            return Err(PipelineError::AllocationFailed {
                width: frame.width(),
                height: frame.height(),
            });
        }
        ArgbFrameConverter.to_pixel_buffer(frame)
    }
}

#[tokio::test]
async fn conversion_failure_skips_frame_without_gap() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 5, per_second(10)));
    let fx = fixture_with(backend, authorized(), Arc::new(FailingThird), |_| {});
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.set_modified_frames(fx.pipeline.frames());

    let report = fx.pipeline.save().await.unwrap();

    assert_eq!(report.encode.frames_written, 4);
    assert_eq!(report.encode.frames_skipped, 1);
    assert_eq!(report.encode.presentation_seconds(), vec![0.0, 0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn readiness_gating_and_rejections_keep_timeline_contiguous() {
    let backend = MemoryBackend::new()
        .with_source(SOURCE, SyntheticTrack::new(8, 8, 6, per_second(10)))
        .with_readiness_window(2)
        .rejecting_appends(&[3]);
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.set_modified_frames(fx.pipeline.frames());

    let report = fx.pipeline.save().await.unwrap();

    assert_eq!(report.encode.frames_rejected, 1);
    assert_eq!(report.encode.presentation_seconds(), vec![0.0, 0.1, 0.2, 0.3, 0.4]);
    assert!(report.encode.readiness_waits >= 2);
}

#[tokio::test]
async fn save_without_modified_frames_touches_nothing() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 3, per_second(10)));
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();

    let err = fx.pipeline.save().await.unwrap_err();

    assert!(matches!(err, PipelineError::NothingToSave));
    assert!(fx.backend.recording(&fx.scratch).is_none());
    assert_eq!(fx.storage.authorization_requests(), 0);
    assert!(fx.storage.saved_files().is_empty());
}

#[tokio::test]
async fn missing_frame_duration_fails_before_writing() {
    let track = SyntheticTrack::new(8, 8, 3, per_second(10)).without_frame_duration();
    let backend = MemoryBackend::new().with_source(SOURCE, track);
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.set_modified_frames(fx.pipeline.frames());

    let err = fx.pipeline.save().await.unwrap_err();

    assert!(matches!(err, PipelineError::MissingFrameDuration));
    assert!(!fx.scratch.exists());
    assert!(fx.storage.saved_files().is_empty());
    assert_eq!(fx.pipeline.phase(), PipelinePhase::Failed);
}

#[tokio::test]
async fn configured_fallback_frame_duration_is_used() {
    let track = SyntheticTrack::new(8, 8, 3, per_second(10)).without_frame_duration();
    let backend = MemoryBackend::new().with_source(SOURCE, track);
    let fx = fixture_with(backend, authorized(), Arc::new(ArgbFrameConverter), |config| {
        config.fallback_frame_duration = Some(0.5);
    });
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.set_modified_frames(fx.pipeline.frames());

    let report = fx.pipeline.save().await.unwrap();

    assert_eq!(report.encode.presentation_seconds(), vec![0.0, 0.5, 1.0]);
}

#[tokio::test]
async fn denied_storage_reports_permission_and_removes_scratch() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 2, per_second(10)));
    let fx = fixture(backend, MockStorage::new(AuthorizationStatus::Denied));
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.apply_edit(FrameEdit::CropSides);

    let report = fx.pipeline.save().await.unwrap();

    assert!(matches!(
        report.storage,
        StorageOutcome::PermissionDenied {
            status: AuthorizationStatus::Denied
        }
    ));
    assert!(fx.storage.saved_files().is_empty());
    assert!(!fx.scratch.exists());
}

#[tokio::test]
async fn limited_access_is_not_enough_to_save() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 2, per_second(10)));
    let fx = fixture(backend, MockStorage::new(AuthorizationStatus::Limited));
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.apply_edit(FrameEdit::CropSides);

    let report = fx.pipeline.save().await.unwrap();

    assert!(!report.storage.is_saved());
    assert_eq!(fx.storage.authorization_requests(), 0);
}

#[tokio::test]
async fn undetermined_access_prompts_once() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 2, per_second(10)));
    let storage = MockStorage::with_prompt(AuthorizationStatus::NotDetermined, AuthorizationStatus::Authorized);
    let fx = fixture(backend, storage);
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.apply_edit(FrameEdit::CropSides);

    let report = fx.pipeline.save().await.unwrap();

    assert!(report.storage.is_saved());
    assert_eq!(fx.storage.authorization_requests(), 1);
}

#[tokio::test]
async fn storage_failure_is_reported_not_raised() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 2, per_second(10)));
    let fx = fixture(backend, authorized().failing_saves("disk full"));
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.apply_edit(FrameEdit::CropSides);

    let report = fx.pipeline.save().await.unwrap();

    match report.storage {
        StorageOutcome::Failed { message } => assert!(message.contains("disk full")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!fx.scratch.exists());
}

#[tokio::test]
async fn source_without_video_track_fails_load() {
    let backend = MemoryBackend::new().with_audio_only_source("voice.m4a");
    let fx = fixture(backend, authorized());

    let err = fx.pipeline.load(Path::new("voice.m4a")).await.unwrap_err();

    assert!(matches!(err, PipelineError::NoVideoTrack { .. }));
    assert!(fx.pipeline.frames().is_empty());
    assert!(fx.pipeline.track().is_none());
    assert_eq!(fx.pipeline.phase(), PipelinePhase::Failed);
}

#[tokio::test]
async fn reader_setup_failure_fails_load() {
    let track = SyntheticTrack::new(8, 8, 2, per_second(10)).failing_setup();
    let backend = MemoryBackend::new().with_source(SOURCE, track);
    let fx = fixture(backend, authorized());

    let err = fx.pipeline.load(Path::new(SOURCE)).await.unwrap_err();

    assert!(matches!(err, PipelineError::ReaderSetupFailed { .. }));
    assert!(fx.pipeline.frames().is_empty());
}

#[tokio::test]
async fn read_failure_keeps_frames_decoded_so_far() {
    let track = SyntheticTrack::new(8, 8, 10, per_second(10)).failing_at(4);
    let backend = MemoryBackend::new().with_source(SOURCE, track);
    let fx = fixture(backend, authorized());

    let report = fx.pipeline.load(Path::new(SOURCE)).await.unwrap();

    assert_eq!(report.frames, 4);
    assert!(report.stopped_early.is_some());
    assert!((report.progress - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn rotated_source_is_delivered_upright() {
    let track = SyntheticTrack::new(8, 4, 2, per_second(10)).with_transform(AffineTransform::rotation(-90.0));
    let backend = MemoryBackend::new().with_source(SOURCE, track);
    let fx = fixture(backend, authorized());

    let report = fx.pipeline.load(Path::new(SOURCE)).await.unwrap();

    assert_eq!(report.track.orientation, Orientation::Right);
    assert_eq!(report.track.display_size(), (4, 8));
    assert!(fx.pipeline.frames().iter().all(|f| (f.width(), f.height()) == (4, 8)));
}

#[tokio::test]
async fn reload_replaces_previous_sequences() {
    let backend = MemoryBackend::new()
        .with_source(SOURCE, SyntheticTrack::new(8, 8, 5, per_second(10)))
        .with_source("short.mov", SyntheticTrack::new(8, 8, 2, per_second(10)));
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.apply_edit(FrameEdit::CropSides);

    fx.pipeline.load(Path::new("short.mov")).await.unwrap();

    assert_eq!(fx.pipeline.frames().len(), 2);
    assert!(fx.pipeline.modified_frames().is_empty());
}

#[tokio::test]
async fn inspect_reads_metadata_without_decoding() {
    let track = SyntheticTrack::new(8, 8, 5, per_second(10)).with_metadata("title", "Holiday");
    let backend = MemoryBackend::new().with_source(SOURCE, track);
    let fx = fixture(backend, authorized());

    let track = fx.pipeline.inspect(Path::new(SOURCE)).await.unwrap();

    assert_eq!(track.metadata.len(), 1);
    assert_eq!(track.metadata[0].value, "Holiday");
    assert!(fx.pipeline.frames().is_empty());
}

#[tokio::test]
async fn cancel_stops_a_running_load() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(4, 4, 1_000, per_second(30)));
    let fx = fixture(backend, authorized());
    let mut observer = fx.pipeline.subscribe_frames();

    let pipeline = Arc::clone(&fx.pipeline);
    let load = tokio::spawn(async move { pipeline.load(Path::new(SOURCE)).await });

    observer.wait_for(|frames| frames.len() >= 3).await.unwrap();
    fx.pipeline.cancel();

    let result = load.await.unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert!(fx.pipeline.frames().len() < 1_000);
}

/// Holds every conversion until the test drops the release sender
struct GatedConverter {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl FrameBufferConverter for GatedConverter {
    fn to_pixel_buffer(&self, frame: &FrameImage) -> PipelineResult<PixelBuffer> {
        if let Ok(entered) = self.entered.lock() {
            let _ = entered.send(());
        }
        if let Ok(release) = self.release.lock() {
            let _ = release.recv();
        }
        ArgbFrameConverter.to_pixel_buffer(frame)
    }
}

#[tokio::test]
async fn cancel_during_save_fails_and_leaves_nothing_behind() {
    let backend = MemoryBackend::new()
        .with_source(SOURCE, SyntheticTrack::new(8, 8, 5, per_second(10)))
        .with_readiness_window(1);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let converter = GatedConverter {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let storage = MockStorage::with_prompt(AuthorizationStatus::NotDetermined, AuthorizationStatus::Authorized);
    let fx = fixture_with(backend, storage, Arc::new(converter), |_| {});
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.set_modified_frames(fx.pipeline.frames());

    let pipeline = Arc::clone(&fx.pipeline);
    let save = tokio::spawn(async move { pipeline.save().await });

    // The worker is now inside the first conversion
    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();
    fx.pipeline.cancel();
    drop(release_tx);

    let result = save.await.unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert_eq!(fx.pipeline.phase(), PipelinePhase::Failed);
    assert!(!fx.scratch.exists());
    let recording = fx.backend.recording(&fx.scratch).unwrap();
    assert!(recording.started);
    assert!(!recording.finished);
    assert!(recording.presentation_times.len() < 5);
    assert_eq!(fx.storage.authorization_requests(), 0);
    assert!(fx.storage.saved_files().is_empty());
}

#[tokio::test]
async fn cancel_before_save_does_not_carry_over() {
    let backend = MemoryBackend::new().with_source(SOURCE, SyntheticTrack::new(8, 8, 3, per_second(10)));
    let fx = fixture(backend, authorized());
    fx.pipeline.load(Path::new(SOURCE)).await.unwrap();
    fx.pipeline.set_modified_frames(fx.pipeline.frames());

    // Only reaches the finished load
    fx.pipeline.cancel();
    let report = fx.pipeline.save().await.unwrap();

    assert_eq!(report.encode.frames_written, 3);
    assert!(matches!(report.storage, StorageOutcome::Saved { .. }));
}
