// Domain layer - Frames, timing and edits

pub mod edit;
pub mod model;
