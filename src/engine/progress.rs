//! Progress snapshots and cooperative cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::domain::model::FrameClock;

/// Cooperative cancellation flag shared between a caller and a running job.
///
/// Checked between frame pulls and between writes; never interrupts a
/// single read or append.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Phase of the frame pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    Loading,
    Loaded,
    Encoding,
    Saving,
    Failed,
}

/// Point-in-time view of decode progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: PipelinePhase,
    pub frames: usize,
    /// Fraction of the source decoded, in [0, 1]
    pub fraction: f64,
}

impl ProgressSnapshot {
    /// Recompute progress for `frames` decoded frames against `clock`
    pub fn observe(phase: PipelinePhase, frames: usize, clock: Option<&FrameClock>) -> Self {
        let fraction = clock.map(|clock| clock.progress(frames)).unwrap_or(0.0);
        Self {
            phase,
            frames,
            fraction,
        }
    }

    pub fn percent(&self) -> f64 {
        self.fraction * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{AffineTransform, MediaTime};

    #[test]
    fn test_cancellation_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_snapshot_without_clock() {
        let snapshot = ProgressSnapshot::observe(PipelinePhase::Loading, 4, None);
        assert_eq!(snapshot.fraction, 0.0);
    }

    #[test]
    fn test_snapshot_percent() {
        let clock = FrameClock::new(
            Some(MediaTime::new(1, 4).unwrap()),
            4.0,
            Some(MediaTime::new(1, 1).unwrap()),
            AffineTransform::identity(),
        );
        let snapshot = ProgressSnapshot::observe(PipelinePhase::Loading, 2, Some(&clock));
        assert!((snapshot.percent() - 50.0).abs() < 1e-9);
    }
}
