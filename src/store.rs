//! Durable job records in SQLite.
//!
//! The store is the source of truth for job lifecycle: producers create
//! Queued records, the worker moves them through Running into a terminal
//! state. Partial updates are issued as a single UPDATE statement so
//! concurrent readers never observe a half-written record.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params_from_iter, Connection, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::{truncate_chars, ERROR_MESSAGE_CAP, LOG_EXCERPT_CAP};
use crate::domain::{Job, JobPayload, JobStatus};

/// Errors from the job record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt job record {id}: {detail}")]
    Corrupt { id: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fields of a partial status update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub progress: Option<u8>,
    pub result_paths: Option<HashMap<String, String>>,
    pub error_message: Option<String>,
    pub log_excerpt: Option<String>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id            TEXT PRIMARY KEY,
    status        TEXT NOT NULL,
    requested_by  TEXT,
    payload       TEXT NOT NULL,
    result_paths  TEXT,
    error_message TEXT,
    progress      INTEGER CHECK (progress IS NULL OR (progress >= 0 AND progress <= 100)),
    log_excerpt   TEXT,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS jobs_status_idx ON jobs (status);
CREATE INDEX IF NOT EXISTS jobs_created_at_idx ON jobs (created_at);
";

/// SQLite-backed job record store.
pub struct JobStore {
    conn: Mutex<Connection>,
}

impl JobStore {
    /// Open (or create) the store at the given path.
    ///
    /// The producer CLI and the worker open the same file from separate
    /// processes, so writes wait out short lock contention instead of
    /// surfacing SQLITE_BUSY, and WAL keeps readers off the write lock.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new Queued job and return the stored record.
    pub fn create(
        &self,
        payload: &JobPayload,
        requested_by: Option<&str>,
    ) -> Result<Job, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let payload_json = serde_json::to_string(payload)?;

        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO jobs (id, status, requested_by, payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                JobStatus::Queued.as_str(),
                requested_by,
                payload_json,
                format_ts(now),
                format_ts(now),
            ],
        )?;
        drop(conn);

        Ok(Job {
            id,
            status: JobStatus::Queued,
            requested_by: requested_by.map(str::to_string),
            payload: payload.clone(),
            result_paths: None,
            error_message: None,
            progress: None,
            log_excerpt: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Fetch a job by id.
    pub fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, status, requested_by, payload, result_paths, error_message,
                    progress, log_excerpt, created_at, updated_at
             FROM jobs WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(job_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// List jobs newest-first, optionally filtered by status, with the
    /// total number of matching records.
    pub fn list(
        &self,
        status: Option<&[JobStatus]>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Job>, u64), StoreError> {
        let (where_clause, filter_params): (String, Vec<String>) = match status {
            Some(statuses) if !statuses.is_empty() => {
                let placeholders = vec!["?"; statuses.len()].join(", ");
                (
                    format!("WHERE status IN ({})", placeholders),
                    statuses.iter().map(|s| s.as_str().to_string()).collect(),
                )
            }
            _ => (String::new(), Vec::new()),
        };

        let conn = self.conn.lock().expect("store mutex poisoned");

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM jobs {}", where_clause),
            params_from_iter(filter_params.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT id, status, requested_by, payload, result_paths, error_message,
                    progress, log_excerpt, created_at, updated_at
             FROM jobs {}
             ORDER BY created_at DESC
             LIMIT {} OFFSET {}",
            where_clause, limit, offset
        ))?;

        let mut jobs = Vec::new();
        let mut rows = stmt.query(params_from_iter(filter_params.iter()))?;
        while let Some(row) = rows.next()? {
            jobs.push(job_from_row(row)?);
        }

        Ok((jobs, total))
    }

    /// Apply a status transition plus any non-`None` update fields in a
    /// single UPDATE statement. Diagnostic strings are truncated to
    /// their fixed caps before storage.
    pub fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        let mut sets = vec!["status = ?".to_string(), "updated_at = ?".to_string()];
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(status.as_str().to_string()),
            Box::new(format_ts(Utc::now())),
        ];

        if let Some(progress) = update.progress {
            sets.push("progress = ?".to_string());
            values.push(Box::new(progress as i64));
        }
        if let Some(ref paths) = update.result_paths {
            sets.push("result_paths = ?".to_string());
            values.push(Box::new(serde_json::to_string(paths)?));
        }
        if let Some(ref message) = update.error_message {
            sets.push("error_message = ?".to_string());
            values.push(Box::new(truncate_chars(message, ERROR_MESSAGE_CAP)));
        }
        if let Some(ref excerpt) = update.log_excerpt {
            sets.push("log_excerpt = ?".to_string());
            values.push(Box::new(truncate_chars(excerpt, LOG_EXCERPT_CAP)));
        }
        values.push(Box::new(id.to_string()));

        let sql = format!("UPDATE jobs SET {} WHERE id = ?", sets.join(", "));

        let conn = self.conn.lock().expect("store mutex poisoned");
        let changed = conn.execute(&sql, params_from_iter(values.iter().map(|v| v.as_ref())))?;
        drop(conn);

        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }

        self.get(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    // Fixed-width timestamps keep lexicographic and chronological order
    // in agreement for ORDER BY.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn job_from_row(row: &Row<'_>) -> Result<Job, StoreError> {
    let id: String = row.get(0)?;
    let status_raw: String = row.get(1)?;
    let payload_raw: String = row.get(3)?;
    let result_paths_raw: Option<String> = row.get(4)?;
    let progress: Option<i64> = row.get(6)?;
    let created_raw: String = row.get(8)?;
    let updated_raw: String = row.get(9)?;

    let status = JobStatus::parse(&status_raw).ok_or_else(|| StoreError::Corrupt {
        id: id.clone(),
        detail: format!("unknown status {:?}", status_raw),
    })?;
    let payload: JobPayload = serde_json::from_str(&payload_raw)?;
    let result_paths = match result_paths_raw {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };

    Ok(Job {
        id: id.clone(),
        status,
        requested_by: row.get(2)?,
        payload,
        result_paths,
        error_message: row.get(5)?,
        progress: progress.map(|p| p as u8),
        log_excerpt: row.get(7)?,
        created_at: parse_ts(&id, &created_raw)?,
        updated_at: parse_ts(&id, &updated_raw)?,
    })
}

fn parse_ts(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            id: id.to_string(),
            detail: format!("bad timestamp {:?}: {}", raw, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceType;

    fn test_payload() -> JobPayload {
        JobPayload {
            source_type: SourceType::Text,
            source_value: "some content".to_string(),
            language: None,
            book_id: Some("demo".to_string()),
            chapter_id: Some("one".to_string()),
            title: None,
            create_book: true,
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create(&test_payload(), Some("tester")).unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.progress.is_none());

        let fetched = store.get(&job.id).unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.requested_by.as_deref(), Some("tester"));
        assert_eq!(fetched.payload.source_value, "some content");
    }

    #[test]
    fn test_open_shared_file_from_two_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        // Producer and worker each hold their own connection to the
        // same file; writes from both must go through.
        let producer = JobStore::open(&path).unwrap();
        let worker = JobStore::open(&path).unwrap();

        let job = producer.create(&test_payload(), None).unwrap();
        worker
            .update_status(
                &job.id,
                JobStatus::Running,
                JobUpdate {
                    progress: Some(5),
                    ..Default::default()
                },
            )
            .unwrap();
        producer.create(&test_payload(), None).unwrap();

        let (jobs, total) = worker.list(None, 10, 0).unwrap();
        assert_eq!(total, 2);
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            producer.get(&job.id).unwrap().unwrap().status,
            JobStatus::Running
        );
    }

    #[test]
    fn test_get_absent() {
        let store = JobStore::open_in_memory().unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn test_partial_update_leaves_other_fields() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create(&test_payload(), None).unwrap();

        let updated = store
            .update_status(
                &job.id,
                JobStatus::Running,
                JobUpdate {
                    progress: Some(5),
                    log_excerpt: Some("Dequeued".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.status, JobStatus::Running);
        assert_eq!(updated.progress, Some(5));
        assert_eq!(updated.log_excerpt.as_deref(), Some("Dequeued"));
        assert!(updated.error_message.is_none());
        assert!(updated.result_paths.is_none());

        // A later update without an excerpt keeps the previous one.
        let updated = store
            .update_status(
                &job.id,
                JobStatus::Running,
                JobUpdate {
                    progress: Some(50),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.log_excerpt.as_deref(), Some("Dequeued"));
        assert_eq!(updated.progress, Some(50));
    }

    #[test]
    fn test_update_truncates_diagnostics() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create(&test_payload(), None).unwrap();

        let long = "x".repeat(5000);
        let updated = store
            .update_status(
                &job.id,
                JobStatus::Failed,
                JobUpdate {
                    progress: Some(100),
                    error_message: Some(long.clone()),
                    log_excerpt: Some(long),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.error_message.unwrap().len(), ERROR_MESSAGE_CAP);
        assert_eq!(updated.log_excerpt.unwrap().len(), LOG_EXCERPT_CAP);
    }

    #[test]
    fn test_update_missing_job() {
        let store = JobStore::open_in_memory().unwrap();
        let err = store
            .update_status("ghost", JobStatus::Running, JobUpdate::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_list_newest_first_with_filter() {
        let store = JobStore::open_in_memory().unwrap();
        let a = store.create(&test_payload(), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = store.create(&test_payload(), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let c = store.create(&test_payload(), None).unwrap();

        store
            .update_status(&a.id, JobStatus::Failed, JobUpdate::default())
            .unwrap();

        let (all, total) = store.list(None, 10, 0).unwrap();
        assert_eq!(total, 3);
        // Newest first: c, b, a
        assert_eq!(all[0].id, c.id);
        assert_eq!(all[2].id, a.id);

        let (queued, total) = store.list(Some(&[JobStatus::Queued]), 10, 0).unwrap();
        assert_eq!(total, 2);
        assert!(queued.iter().all(|j| j.status == JobStatus::Queued));
        // c is the newest Queued record; a is Failed and filtered out.
        assert_eq!(queued[0].id, c.id);
        assert_eq!(queued[1].id, b.id);

        let (page, total) = store.list(None, 1, 1).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, b.id);
    }

    #[test]
    fn test_result_paths_round_trip() {
        let store = JobStore::open_in_memory().unwrap();
        let job = store.create(&test_payload(), None).unwrap();

        let mut paths = HashMap::new();
        paths.insert("audio_wav".to_string(), "/out/demo/ch/podcast.wav".to_string());

        let updated = store
            .update_status(
                &job.id,
                JobStatus::Succeeded,
                JobUpdate {
                    progress: Some(100),
                    result_paths: Some(paths.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.result_paths.unwrap(), paths);
    }
}
