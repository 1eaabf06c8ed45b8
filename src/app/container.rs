use std::sync::Arc;

use crate::adapters::{FfmpegBackend, LibraryDirStorage};
use crate::app::pipeline::PipelineOrchestrator;
use crate::config::PipelineConfig;
use crate::engine::decoder::Decoder;
use crate::engine::encoder::Encoder;
use crate::engine::pixel_buffer::{ArgbFrameConverter, FrameBufferConverter};
use crate::error::PipelineResult;
use crate::ports::{MediaBackend, StoragePort};

pub trait AppContainer: Send + Sync {
    fn pipeline(&self) -> Arc<PipelineOrchestrator>;
}

/// Wires the orchestrator to concrete adapters
pub struct DefaultAppContainer {
    pipeline: Arc<PipelineOrchestrator>,
}

impl DefaultAppContainer {
    /// FFmpeg media backend and a library directory for storage
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let backend = Arc::new(FfmpegBackend::new()?);
        let storage = Arc::new(LibraryDirStorage::new(config.library_dir.clone()));
        Ok(Self::with_ports(
            backend as Arc<dyn MediaBackend>,
            storage as Arc<dyn StoragePort>,
            config,
        ))
    }

    /// Any media backend and storage, e.g. in-memory doubles
    pub fn with_ports(
        backend: Arc<dyn MediaBackend>,
        storage: Arc<dyn StoragePort>,
        config: PipelineConfig,
    ) -> Self {
        let converter = Arc::new(ArgbFrameConverter) as Arc<dyn FrameBufferConverter>;
        Self::with_converter(backend, storage, converter, config)
    }

    pub fn with_converter(
        backend: Arc<dyn MediaBackend>,
        storage: Arc<dyn StoragePort>,
        converter: Arc<dyn FrameBufferConverter>,
        config: PipelineConfig,
    ) -> Self {
        let decoder = Decoder::new(Arc::clone(&backend));
        let encoder = Encoder::new(backend, converter, config.encoder.clone());
        let pipeline = Arc::new(PipelineOrchestrator::new(decoder, encoder, storage, config));
        Self { pipeline }
    }
}

impl AppContainer for DefaultAppContainer {
    fn pipeline(&self) -> Arc<PipelineOrchestrator> {
        Arc::clone(&self.pipeline)
    }
}
