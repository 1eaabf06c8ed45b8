//! Frame decoding and encoding engine

pub mod color;
pub mod decoder;
pub mod encoder;
pub mod pixel_buffer;
pub mod progress;

pub use decoder::Decoder;
pub use encoder::{EncodeHandle, EncodeReport, Encoder};
pub use pixel_buffer::{ArgbFrameConverter, FrameBufferConverter, PixelBuffer};
pub use progress::{CancellationToken, PipelinePhase, ProgressSnapshot};
