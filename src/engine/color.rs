//! NV12 to RGBA conversion (BT.601)

use image::{Rgba, RgbaImage};

use crate::error::{PipelineError, PipelineResult};
use crate::ports::VideoSample;

/// Convert a bi-planar 4:2:0 sample into an opaque RGBA image.
pub fn nv12_to_rgba(sample: &VideoSample) -> PipelineResult<RgbaImage> {
    validate_planes(sample)?;

    let full_range = sample.format.is_full_range();
    let mut image = RgbaImage::new(sample.width, sample.height);

    for y in 0..sample.height as usize {
        let luma_row = &sample.luma[y * sample.luma_stride..];
        let chroma_row = &sample.chroma[(y / 2) * sample.chroma_stride..];
        for x in 0..sample.width as usize {
            let luma = luma_row[x];
            let cb = chroma_row[(x / 2) * 2];
            let cr = chroma_row[(x / 2) * 2 + 1];
            image.put_pixel(x as u32, y as u32, ycbcr_to_rgba(luma, cb, cr, full_range));
        }
    }

    Ok(image)
}

fn validate_planes(sample: &VideoSample) -> PipelineResult<()> {
    let width = sample.width as usize;
    let height = sample.height as usize;
    if width == 0 || height == 0 {
        return Err(PipelineError::LoadFailed {
            reason: "sample has zero dimensions".to_string(),
        });
    }

    let chroma_width = width.div_ceil(2) * 2;
    let chroma_height = height.div_ceil(2);

    let luma_ok = sample.luma_stride >= width
        && sample.luma.len() >= sample.luma_stride * (height - 1) + width;
    let chroma_ok = sample.chroma_stride >= chroma_width
        && sample.chroma.len() >= sample.chroma_stride * (chroma_height - 1) + chroma_width;

    if !luma_ok || !chroma_ok {
        return Err(PipelineError::LoadFailed {
            reason: format!(
                "malformed {}x{} sample (luma {} bytes stride {}, chroma {} bytes stride {})",
                width,
                height,
                sample.luma.len(),
                sample.luma_stride,
                sample.chroma.len(),
                sample.chroma_stride
            ),
        });
    }
    Ok(())
}

/// BT.601 YCbCr to RGB.
pub fn ycbcr_to_rgba(luma: u8, cb: u8, cr: u8, full_range: bool) -> Rgba<u8> {
    let (y, u, v) = if full_range {
        (luma as f32, cb as f32 - 128.0, cr as f32 - 128.0)
    } else {
        (
            (luma as f32 - 16.0) * 255.0 / 219.0,
            (cb as f32 - 128.0) * 255.0 / 224.0,
            (cr as f32 - 128.0) * 255.0 / 224.0,
        )
    };

    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;

    Rgba([clamp_channel(r), clamp_channel(g), clamp_channel(b), 255])
}

fn clamp_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// BT.601 RGB to full-range YCbCr. Used to synthesize samples.
pub fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    (clamp_channel(y), clamp_channel(cb), clamp_channel(cr))
}
