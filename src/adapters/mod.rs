// Adapters - External system implementations

pub mod libav;
pub mod library_dir;
pub mod memory;

// Re-export adapters
pub use libav::FfmpegBackend;
pub use library_dir::LibraryDirStorage;
pub use memory::{MemoryBackend, MockStorage, SyntheticTrack};
