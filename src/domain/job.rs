//! Job records and queue messages.
//!
//! A Job represents one end-to-end request to produce an audio chapter
//! from source content. Jobs are created Queued by a producer, then
//! mutated exclusively by the worker until they reach a terminal state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum stored length of a job's error message, in characters.
pub const ERROR_MESSAGE_CAP: usize = 1024;

/// Maximum stored length of a job's log excerpt, in characters.
pub const LOG_EXCERPT_CAP: usize = 2048;

/// Lifecycle state of a job. Succeeded and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Where the source content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Url,
    Text,
    #[serde(alias = "md")]
    Markdown,
}

/// Request parameters captured when the job is created. Immutable after
/// creation; the worker reads them from the job record, not the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub source_type: SourceType,
    pub source_value: String,

    /// Spoken language for the generated dialogue (default "English").
    #[serde(default)]
    pub language: Option<String>,

    /// Book directory the chapter is imported into.
    #[serde(default)]
    pub book_id: Option<String>,

    /// Chapter directory name; normalized to a `chapter_` prefix on import.
    #[serde(default)]
    pub chapter_id: Option<String>,

    /// Chapter title shown in clients.
    #[serde(default)]
    pub title: Option<String>,

    /// Bootstrap the book directory if it does not exist yet.
    #[serde(default)]
    pub create_book: bool,
}

/// A single podcast generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier (UUID v4 string)
    pub id: String,

    pub status: JobStatus,

    /// Who requested the job (if known)
    pub requested_by: Option<String>,

    pub payload: JobPayload,

    /// Artifact name -> filesystem location; present only on Succeeded
    pub result_paths: Option<HashMap<String, String>>,

    /// Truncated failure summary; present only on Failed
    pub error_message: Option<String>,

    /// 0..=100, only ever increases within a single run
    pub progress: Option<u8>,

    /// Truncated diagnostic detail
    pub log_excerpt: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire message handed from producer to worker over the queue.
///
/// The payload travels with the message but the worker treats the job
/// record as the source of truth, so it is kept opaque here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: String,
    pub payload: serde_json::Value,
}

/// Truncate a diagnostic string to a character cap.
pub fn truncate_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        s.to_string()
    } else {
        s.chars().take(cap).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("cancelled"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_payload_defaults() {
        let payload: JobPayload = serde_json::from_str(
            r#"{"source_type": "text", "source_value": "hello"}"#,
        )
        .unwrap();

        assert_eq!(payload.source_type, SourceType::Text);
        assert!(payload.language.is_none());
        assert!(!payload.create_book);
    }

    #[test]
    fn test_md_alias() {
        let payload: JobPayload =
            serde_json::from_str("{\"source_type\": \"md\", \"source_value\": \"# hi\"}").unwrap();
        assert_eq!(payload.source_type, SourceType::Markdown);
    }

    #[test]
    fn test_queue_message_wire_format() {
        let msg: QueueMessage = serde_json::from_str(
            r#"{"job_id": "abc-123", "payload": {"source_type": "text", "source_value": "x"}}"#,
        )
        .unwrap();
        assert_eq!(msg.job_id, "abc-123");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        // Truncation is per character, not per byte
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }
}
