//! The chapter generation pipeline.

pub mod audio;
pub mod chunker;
pub mod worker;

pub use audio::{AudioError, AudioSegment};
pub use chunker::{ChunkError, PromptBatch};
pub use worker::{JobProcessor, PipelineError, Worker};
