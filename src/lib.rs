//! storycast - queued podcast chapter generation
//!
//! A worker that turns source content (URLs, raw text, markdown) into
//! two-host audio chapters and imports them into a book library on disk.
//!
//! # Architecture
//!
//! Producers create a durable job record, then push the job id onto a
//! Redis list. The worker pops jobs one at a time and runs the pipeline:
//! - resolve the source content
//! - generate a two-speaker dialogue script
//! - chunk the script under the synthesis prompt byte limit
//! - synthesize each batch and assemble one stereo WAV
//! - import the chapter and optionally align subtitles and mirror it
//!
//! The job record is the source of truth for lifecycle and progress;
//! queue delivery is at-most-once and the worker never retries a job.
//!
//! # Modules
//!
//! - `adapters`: External service integrations (Gemini, gsutil, subtitle aligner)
//! - `pipeline`: Chunking, audio assembly, and the worker loop
//! - `domain`: Data structures (Job, Speaker, DialogueTurn)
//! - `queue`: Redis-backed FIFO job queue
//! - `store`: SQLite job records
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start the worker
//! storycast worker
//!
//! # Enqueue a chapter from a URL
//! storycast enqueue --source-type url --source-value https://example.com/essay \
//!     --book essays --chapter 01 --create-book
//!
//! # Check job status
//! storycast status <job-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod pipeline;
pub mod queue;
pub mod store;

// Re-export main types at crate root for convenience
pub use config::{ConfigError, Settings};
pub use domain::{DialogueTurn, Job, JobPayload, JobStatus, QueueMessage, SourceType, Speaker};
pub use pipeline::{JobProcessor, PipelineError, Worker};
pub use queue::{JobQueue, QueueError, RedisJobQueue};
pub use store::{JobStore, JobUpdate, StoreError};
