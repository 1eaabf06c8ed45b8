// Frame edits - derive a new sequence from a source sequence

use image::imageops;
use serde::Serialize;
use tracing::debug;

use crate::domain::model::{FrameImage, FrameSequence, PixelRect};

/// An edit applied uniformly to every frame of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameEdit {
    /// Keep the centred half-width, half-height region
    CropSides,
    /// Keep an explicit region; clamped to each frame's bounds
    Crop(PixelRect),
}

impl FrameEdit {
    /// Region this edit keeps from a `width` x `height` frame.
    pub fn region_for(&self, width: u32, height: u32) -> PixelRect {
        match self {
            FrameEdit::CropSides => {
                PixelRect::new(width / 4, height / 4, width / 2, height / 2)
            }
            FrameEdit::Crop(rect) => rect.clamp_to(width, height),
        }
    }

    /// Apply to one frame. `None` when nothing of the frame survives.
    pub fn apply_frame(&self, frame: &FrameImage) -> Option<FrameImage> {
        let region = self.region_for(frame.width(), frame.height());
        if region.is_empty() {
            return None;
        }
        let cropped = imageops::crop_imm(
            frame.pixels(),
            region.x,
            region.y,
            region.width,
            region.height,
        )
        .to_image();
        let mut edited = FrameImage::new(cropped);
        if let Some(time) = frame.presentation_time() {
            edited = edited.with_presentation_time(time);
        }
        Some(edited)
    }

    /// Build a new sequence from `source`; `source` itself is left untouched.
    ///
    /// Frames whose region is empty are dropped.
    pub fn apply(&self, source: &FrameSequence) -> FrameSequence {
        let edited: FrameSequence = source.iter().filter_map(|frame| self.apply_frame(frame)).collect();
        let dropped = source.len() - edited.len();
        if dropped > 0 {
            debug!("Edit {:?} dropped {} empty frames", self, dropped);
        }
        edited
    }
}

impl Default for FrameEdit {
    fn default() -> Self {
        FrameEdit::CropSides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> FrameImage {
        FrameImage::new(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([x as u8, y as u8, 0, 255])
        }))
    }

    #[test]
    fn test_crop_sides_region() {
        let region = FrameEdit::CropSides.region_for(100, 100);
        assert_eq!(region, PixelRect::new(25, 25, 50, 50));
    }

    #[test]
    fn test_crop_sides_pixels() {
        let frame = gradient(100, 100);
        let cropped = FrameEdit::CropSides.apply_frame(&frame).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (50, 50));
        assert_eq!(cropped.pixels().get_pixel(0, 0), &Rgba([25, 25, 0, 255]));
        assert_eq!(cropped.pixels().get_pixel(49, 49), &Rgba([74, 74, 0, 255]));
    }

    #[test]
    fn test_crop_is_repeatable_and_source_untouched() {
        let source: FrameSequence = (0..3).map(|_| gradient(64, 48)).collect();
        let before: Vec<Vec<u8>> = source.iter().map(|f| f.pixels().as_raw().clone()).collect();

        let first = FrameEdit::CropSides.apply(&source);
        let second = FrameEdit::CropSides.apply(&source);

        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.pixels().as_raw(), b.pixels().as_raw());
            assert!(!a.shares_pixels(b));
        }
        let after: Vec<Vec<u8>> = source.iter().map(|f| f.pixels().as_raw().clone()).collect();
        assert_eq!(before, after);
        assert_eq!(source.first().unwrap().width(), 64);
    }

    #[test]
    fn test_empty_region_drops_frame() {
        let source: FrameSequence = vec![gradient(1, 1), gradient(8, 8)].into();
        let edited = FrameEdit::CropSides.apply(&source);
        assert_eq!(edited.len(), 1);
        assert_eq!(edited.first().unwrap().width(), 4);
    }

    #[test]
    fn test_explicit_crop_is_clamped() {
        let frame = gradient(10, 10);
        let edit = FrameEdit::Crop(PixelRect::new(6, 6, 10, 10));
        let cropped = edit.apply_frame(&frame).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (4, 4));

        let outside = FrameEdit::Crop(PixelRect::new(20, 20, 5, 5));
        assert!(outside.apply_frame(&frame).is_none());
    }
}
