//! Domain types for the storycast worker.
//!
//! This module contains the core data structures:
//! - Job: a single podcast generation request and its lifecycle
//! - Script: speakers, dialogue turns, and script text utilities

pub mod job;
pub mod script;

// Re-export commonly used types
pub use job::{Job, JobPayload, JobStatus, QueueMessage, SourceType};
pub use script::{
    clean_script, count_words, extract_turns, strip_speaker_labels, DialogueTurn, Speaker,
};
