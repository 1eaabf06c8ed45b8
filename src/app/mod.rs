// Application layer - Use case orchestration

pub mod container;
pub mod pipeline;

pub use container::{AppContainer, DefaultAppContainer};
pub use pipeline::PipelineOrchestrator;
