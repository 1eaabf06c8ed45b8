// Domain models - timing, orientation and frame types

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use serde::Serialize;

use crate::error::{PipelineError, PipelineResult};

/// Rational media time: `value / timescale` seconds.
///
/// Arithmetic stays in integer ticks so that `duration * index` is exact.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    /// Create a new media time
    pub fn new(value: i64, timescale: u32) -> PipelineResult<Self> {
        if timescale == 0 {
            return Err(PipelineError::InvalidTime {
                message: "timescale cannot be zero".to_string(),
            });
        }
        Ok(Self { value, timescale })
    }

    /// Zero at the given timescale
    pub fn zero(timescale: u32) -> Self {
        Self {
            value: 0,
            timescale: timescale.max(1),
        }
    }

    /// Nearest representable time for `seconds` at `timescale`
    pub fn from_seconds(seconds: f64, timescale: u32) -> PipelineResult<Self> {
        if !seconds.is_finite() {
            return Err(PipelineError::InvalidTime {
                message: format!("{} is not a finite number of seconds", seconds),
            });
        }
        let value = (seconds * timescale as f64).round() as i64;
        Self::new(value, timescale)
    }

    /// Convert to floating point seconds
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    pub fn is_positive(&self) -> bool {
        self.value > 0
    }

    /// This duration repeated `count` times, in the same timescale
    pub fn multiply(&self, count: i64) -> Self {
        Self {
            value: self.value.saturating_mul(count),
            timescale: self.timescale,
        }
    }

    /// Express this time in another timescale, rounding to nearest
    pub fn convert_scale(&self, timescale: u32) -> PipelineResult<Self> {
        if timescale == self.timescale {
            return Ok(*self);
        }
        let scaled = (self.value as i128 * timescale as i128 * 2 + self.timescale as i128)
            .div_euclid(self.timescale as i128 * 2);
        let value = i64::try_from(scaled).map_err(|_| PipelineError::InvalidTime {
            message: format!("{} overflows timescale {}", self, timescale),
        })?;
        Self::new(value, timescale)
    }

    fn cross(&self, other: &Self) -> (i128, i128) {
        (
            self.value as i128 * other.timescale as i128,
            other.value as i128 * self.timescale as i128,
        )
    }
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        let (lhs, rhs) = self.cross(other);
        lhs == rhs
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let (lhs, rhs) = self.cross(other);
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.3}s)", self.value, self.timescale, self.seconds())
    }
}

/// 2D affine transform `[a b; c d; tx ty]` in a y-up coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Pure rotation by `degrees`, counter-clockwise
    pub fn rotation(degrees: f64) -> Self {
        let radians = degrees.to_radians();
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Rotation angle in degrees, `atan2(b, a)`, in (-180, 180]
    pub fn rotation_degrees(&self) -> f64 {
        self.b.atan2(self.a).to_degrees()
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Tolerance used when matching a rotation angle to a quarter turn.
pub const ORIENTATION_EPSILON_DEGREES: f64 = 1e-3;

/// Display orientation, numbered like EXIF orientation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Up = 1,
    Down = 3,
    Right = 6,
    Left = 8,
}

impl Orientation {
    /// Derive orientation from a track transform.
    ///
    /// Angles that are not within [`ORIENTATION_EPSILON_DEGREES`] of a quarter
    /// turn map to [`Orientation::Up`].
    pub fn from_transform(transform: &AffineTransform) -> Self {
        let angle = transform.rotation_degrees();
        let near = |target: f64| (angle - target).abs() < ORIENTATION_EPSILON_DEGREES;

        if near(0.0) {
            Orientation::Up
        } else if near(180.0) || near(-180.0) {
            Orientation::Down
        } else if near(90.0) {
            Orientation::Left
        } else if near(-90.0) {
            Orientation::Right
        } else {
            Orientation::Up
        }
    }

    pub fn exif_value(&self) -> u8 {
        *self as u8
    }

    /// Whether applying this orientation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Orientation::Left | Orientation::Right)
    }

    /// Return an upright copy of `image`.
    ///
    /// `Left` turns the pixels a quarter counter-clockwise, `Right` a quarter
    /// clockwise, `Down` half a turn.
    pub fn apply(&self, image: &RgbaImage) -> RgbaImage {
        match self {
            Orientation::Up => image.clone(),
            Orientation::Down => image::imageops::rotate180(image),
            Orientation::Left => image::imageops::rotate270(image),
            Orientation::Right => image::imageops::rotate90(image),
        }
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Orientation::Up
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Up => "up",
            Orientation::Down => "down",
            Orientation::Right => "right",
            Orientation::Left => "left",
        };
        write!(f, "{}", name)
    }
}

/// Timing facts of a video track.
#[derive(Debug, Clone, Serialize)]
pub struct FrameClock {
    /// Minimum frame duration reported by the track
    pub frame_duration: Option<MediaTime>,
    /// Nominal frames per second
    pub nominal_frame_rate: f32,
    /// Duration of the owning source
    pub total_duration: Option<MediaTime>,
    /// Display transform of the track
    pub transform: AffineTransform,
}

impl FrameClock {
    pub fn new(
        frame_duration: Option<MediaTime>,
        nominal_frame_rate: f32,
        total_duration: Option<MediaTime>,
        transform: AffineTransform,
    ) -> Self {
        Self {
            frame_duration,
            nominal_frame_rate,
            total_duration,
            transform,
        }
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::from_transform(&self.transform)
    }

    /// Fraction of the source covered by `frames` decoded frames, in [0, 1].
    ///
    /// Zero while either the frame duration or the total duration is unknown.
    pub fn progress(&self, frames: usize) -> f64 {
        let (Some(frame), Some(total)) = (self.frame_duration, self.total_duration) else {
            return 0.0;
        };
        let total_seconds = total.seconds();
        if total_seconds <= 0.0 {
            return 0.0;
        }
        let covered = frame.multiply(frames as i64).seconds();
        (covered / total_seconds).clamp(0.0, 1.0)
    }
}

/// One key/value pair of track metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl MetadataItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Kind of a container track, as far as track selection cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackKind {
    Video,
    /// Cover art stored as a single-picture video stream
    AttachedPicture,
    Audio,
    Other,
}

/// Index of the first playable video track, in container order.
pub fn first_video_track(kinds: &[TrackKind]) -> Option<usize> {
    kinds.iter().position(|kind| *kind == TrackKind::Video)
}

/// Everything `open` learns about the selected video track.
#[derive(Debug, Clone, Serialize)]
pub struct TrackInfo {
    pub track_id: usize,
    pub codec: String,
    /// Coded width, before orientation is applied
    pub width: u32,
    /// Coded height, before orientation is applied
    pub height: u32,
    pub clock: FrameClock,
    pub orientation: Orientation,
    pub metadata: Vec<MetadataItem>,
}

impl TrackInfo {
    pub fn new(
        track_id: usize,
        codec: impl Into<String>,
        width: u32,
        height: u32,
        clock: FrameClock,
        metadata: Vec<MetadataItem>,
    ) -> Self {
        let orientation = clock.orientation();
        Self {
            track_id,
            codec: codec.into(),
            width,
            height,
            clock,
            orientation,
            metadata,
        }
    }

    /// Dimensions of frames after orientation is applied
    pub fn display_size(&self) -> (u32, u32) {
        if self.orientation.swaps_dimensions() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

/// A decoded or edited still image. Pixel storage is shared and never mutated.
#[derive(Debug, Clone)]
pub struct FrameImage {
    pixels: Arc<RgbaImage>,
    presentation_time: Option<MediaTime>,
}

impl FrameImage {
    pub fn new(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            presentation_time: None,
        }
    }

    pub fn with_presentation_time(mut self, time: MediaTime) -> Self {
        self.presentation_time = Some(time);
        self
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Source presentation time, if the frame came from a decoder
    pub fn presentation_time(&self) -> Option<MediaTime> {
        self.presentation_time
    }

    /// Whether two frames share the same pixel storage
    pub fn shares_pixels(&self, other: &FrameImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

/// Ordered frames in presentation order.
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    frames: Vec<FrameImage>,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: FrameImage) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first(&self) -> Option<&FrameImage> {
        self.frames.first()
    }

    pub fn get(&self, index: usize) -> Option<&FrameImage> {
        self.frames.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FrameImage> {
        self.frames.iter()
    }

    pub fn as_slice(&self) -> &[FrameImage] {
        &self.frames
    }
}

impl From<Vec<FrameImage>> for FrameSequence {
    fn from(frames: Vec<FrameImage>) -> Self {
        Self { frames }
    }
}

impl FromIterator<FrameImage> for FrameSequence {
    fn from_iter<I: IntoIterator<Item = FrameImage>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for FrameSequence {
    type Item = FrameImage;
    type IntoIter = std::vec::IntoIter<FrameImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl<'a> IntoIterator for &'a FrameSequence {
    type Item = &'a FrameImage;
    type IntoIter = std::slice::Iter<'a, FrameImage>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Axis-aligned pixel rectangle, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Part of this rectangle inside a `width` x `height` image
    pub fn clamp_to(&self, width: u32, height: u32) -> PixelRect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        let right = self.x.saturating_add(self.width).min(width);
        let bottom = self.y.saturating_add(self.height).min(height);
        PixelRect::new(x, y, right - x, bottom - y)
    }
}
