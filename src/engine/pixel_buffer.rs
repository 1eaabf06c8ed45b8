//! ARGB pixel buffers handed to the writer, and the frame converter that fills them

use image::RgbaImage;
use tracing::trace;

use crate::domain::model::FrameImage;
use crate::error::{PipelineError, PipelineResult};

/// Bytes per ARGB pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Row stride alignment in bytes
pub const ROW_ALIGNMENT: usize = 64;

/// Largest width or height a buffer may have
pub const MAX_DIMENSION: u32 = 16_384;

/// 32-bit ARGB buffer, byte order A R G B, alpha ignored and stored opaque.
///
/// Rows are padded to [`ROW_ALIGNMENT`]. Pixel memory is only writable while
/// the base address is locked through [`PixelBuffer::lock_base_address`].
#[derive(Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    bytes_per_row: usize,
    data: Vec<u8>,
    locked: bool,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer
    pub fn allocate(width: u32, height: u32) -> PipelineResult<Self> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(PipelineError::AllocationFailed { width, height });
        }

        let bytes_per_row = (width as usize)
            .checked_mul(BYTES_PER_PIXEL)
            .map(|row| row.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT)
            .ok_or(PipelineError::AllocationFailed { width, height })?;
        let size = bytes_per_row
            .checked_mul(height as usize)
            .ok_or(PipelineError::AllocationFailed { width, height })?;

        Ok(Self {
            width,
            height,
            bytes_per_row,
            data: vec![0; size],
            locked: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Whole buffer including row padding
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Visible pixels of row `y`, without padding
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.bytes_per_row;
        &self.data[start..start + self.width as usize * BYTES_PER_PIXEL]
    }

    /// ARGB bytes of one pixel
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.bytes_per_row + x as usize * BYTES_PER_PIXEL;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    /// Lock the base address; it is unlocked when the guard drops.
    pub fn lock_base_address(&mut self) -> BaseAddressGuard<'_> {
        self.locked = true;
        BaseAddressGuard { buffer: self }
    }

    /// Draw `image` over the full extent of the buffer.
    pub fn draw(&mut self, image: &RgbaImage) -> PipelineResult<()> {
        let mut guard = self.lock_base_address();
        guard.draw(image)
    }
}

/// Scoped lock on a buffer's pixel memory
pub struct BaseAddressGuard<'a> {
    buffer: &'a mut PixelBuffer,
}

impl BaseAddressGuard<'_> {
    pub fn base_address(&mut self) -> &mut [u8] {
        &mut self.buffer.data
    }

    pub fn bytes_per_row(&self) -> usize {
        self.buffer.bytes_per_row
    }

    fn draw(&mut self, image: &RgbaImage) -> PipelineResult<()> {
        let (width, height) = (self.buffer.width, self.buffer.height);
        if image.dimensions() != (width, height) {
            return Err(PipelineError::DrawFailed {
                message: format!(
                    "image is {}x{} but buffer is {}x{}",
                    image.width(),
                    image.height(),
                    width,
                    height
                ),
            });
        }

        let stride = self.bytes_per_row();
        let source = image.as_raw();
        let source_stride = width as usize * BYTES_PER_PIXEL;
        let base = self.base_address();

        for (y, src_row) in source.chunks_exact(source_stride).enumerate() {
            let dst_row = &mut base[y * stride..y * stride + source_stride];
            for (dst, src) in dst_row
                .chunks_exact_mut(BYTES_PER_PIXEL)
                .zip(src_row.chunks_exact(BYTES_PER_PIXEL))
            {
                dst[0] = 0xFF;
                dst[1] = src[0];
                dst[2] = src[1];
                dst[3] = src[2];
            }
        }
        Ok(())
    }
}

impl Drop for BaseAddressGuard<'_> {
    fn drop(&mut self) {
        self.buffer.locked = false;
    }
}

/// Turns a still image into the buffer layout the writer consumes.
pub trait FrameBufferConverter: Send + Sync {
    fn to_pixel_buffer(&self, frame: &FrameImage) -> PipelineResult<PixelBuffer>;
}

/// Default converter: one ARGB buffer sized to the frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArgbFrameConverter;

impl FrameBufferConverter for ArgbFrameConverter {
    fn to_pixel_buffer(&self, frame: &FrameImage) -> PipelineResult<PixelBuffer> {
        let mut buffer = PixelBuffer::allocate(frame.width(), frame.height())?;
        buffer.draw(frame.pixels())?;
        trace!(
            "Converted {}x{} frame, {} bytes per row",
            buffer.width(),
            buffer.height(),
            buffer.bytes_per_row()
        );
        Ok(buffer)
    }
}
