//! Job execution: the worker loop and the chapter pipeline.
//!
//! The `Worker` polls the queue and hands each dequeued job id to the
//! `JobProcessor`, which owns the full pipeline: resolve source content,
//! generate a dialogue script, synthesize audio batch by batch, assemble
//! the chapter, import it into the output library, and run the optional
//! subtitle and mirror stages. The job record tracks progress and ends
//! Succeeded or Failed; queue delivery is at-most-once, so the processor
//! never retries on its own.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ChapterMirror, ScriptGenerator, SpeechSynthesizer, SubtitleGenerator};
use crate::config::Settings;
use crate::domain::{
    clean_script, count_words, extract_turns, strip_speaker_labels, Job, JobPayload, JobStatus,
    SourceType,
};
use crate::pipeline::audio::{assemble, decode_segment, wav_duration_seconds, write_wav};
use crate::pipeline::chunker::{available_budget, chunk_turns, format_prompt};
use crate::queue::JobQueue;
use crate::store::{JobStore, JobUpdate, StoreError};

/// Speech delivery instructions prepended to every synthesis prompt.
/// `[LANGUAGE]` is replaced with the job's spoken language.
const SPEECH_INSTRUCTIONS: &str = "\
Read the following podcast conversation aloud in [LANGUAGE]. \
SpeakerA and SpeakerB are the two hosts. Keep the delivery natural, \
warm, and conversational, with the pacing of a real discussion.";

const AUDIO_FILE: &str = "podcast.wav";
const SCRIPT_FILE: &str = "podcast_script.txt";
const METADATA_FILE: &str = "metadata.json";
const SUBTITLE_FILE: &str = "subtitles.srt";

/// How a pipeline run can fail. The category is part of the stored
/// error message so operators can tell bad input from a flaky provider
/// from a corrupted output.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("external service error: {0}")]
    ExternalService(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn external(err: anyhow::Error) -> PipelineError {
    PipelineError::ExternalService(format!("{:#}", err))
}

/// Ensure a chapter directory name carries the `chapter_` prefix.
fn normalize_chapter_id(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.starts_with("chapter_") {
        trimmed.to_string()
    } else {
        format!("chapter_{}", trimmed)
    }
}

/// Move a file, falling back to copy-and-delete when the rename crosses
/// filesystems.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Executes one job end to end against the injected adapters.
pub struct JobProcessor {
    settings: Settings,
    store: Arc<JobStore>,
    generator: Arc<dyn ScriptGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    subtitles: Option<Arc<dyn SubtitleGenerator>>,
    mirror: Option<Arc<dyn ChapterMirror>>,
    http: reqwest::Client,
}

impl JobProcessor {
    pub fn new(
        settings: Settings,
        store: Arc<JobStore>,
        generator: Arc<dyn ScriptGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        subtitles: Option<Arc<dyn SubtitleGenerator>>,
        mirror: Option<Arc<dyn ChapterMirror>>,
    ) -> Self {
        Self {
            settings,
            store,
            generator,
            synthesizer,
            subtitles,
            mirror,
            http: reqwest::Client::new(),
        }
    }

    /// Run one job to a terminal state.
    ///
    /// Unknown job ids are dropped with a warning: the queue message is
    /// already consumed and there is no record to mark Failed.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn process_job(&self, job_id: &str) -> Result<(), StoreError> {
        let Some(job) = self.store.get(job_id)? else {
            warn!("Dropping queue message for unknown job");
            return Ok(());
        };
        if job.status.is_terminal() {
            warn!(status = job.status.as_str(), "Ignoring already finished job");
            return Ok(());
        }

        self.store.update_status(
            job_id,
            JobStatus::Running,
            JobUpdate {
                progress: Some(5),
                log_excerpt: Some("Dequeued".to_string()),
                ..Default::default()
            },
        )?;

        match self.execute_pipeline(&job).await {
            Ok(result_paths) => {
                info!("Job succeeded");
                self.store.update_status(
                    job_id,
                    JobStatus::Succeeded,
                    JobUpdate {
                        progress: Some(100),
                        result_paths: Some(result_paths),
                        log_excerpt: Some("Completed".to_string()),
                        ..Default::default()
                    },
                )?;
            }
            Err(err) => {
                error!(error = %err, "Job failed");
                self.store.update_status(
                    job_id,
                    JobStatus::Failed,
                    JobUpdate {
                        progress: Some(100),
                        error_message: Some(err.to_string()),
                        // Full failure detail for diagnostics; the store
                        // truncates it to the excerpt cap.
                        log_excerpt: Some(format!("{:?}", err)),
                        ..Default::default()
                    },
                )?;
            }
        }
        Ok(())
    }

    async fn execute_pipeline(
        &self,
        job: &Job,
    ) -> Result<HashMap<String, String>, PipelineError> {
        let payload = &job.payload;

        // Validate import parameters up front so a bad request fails
        // before any expensive stage runs.
        let book_id = payload
            .book_id
            .clone()
            .ok_or_else(|| PipelineError::Validation("book_id is required".to_string()))?;
        let chapter_id =
            normalize_chapter_id(payload.chapter_id.as_deref().unwrap_or(&job.id));
        let language = payload
            .language
            .clone()
            .unwrap_or_else(|| self.settings.default_language.clone());

        let content = self.resolve_content(payload).await?;
        self.advance(&job.id, 15, "Content resolved")?;

        let script = clean_script(
            &self
                .generator
                .generate_script(&content)
                .await
                .map_err(external)?,
        );
        if script.trim().is_empty() {
            return Err(PipelineError::ExternalService(
                "script generation returned an empty script".to_string(),
            ));
        }
        let turns =
            extract_turns(&script).map_err(|e| PipelineError::Validation(e.to_string()))?;
        self.advance(&job.id, 35, "Script generated")?;

        let combined = self.synthesize_audio(&job.id, &turns, &language).await?;
        self.advance(&job.id, 75, "Audio assembled")?;

        // Stage artifacts in a per-job scratch directory, then import.
        let work_dir = self.settings.work_root.join(&job.id);
        fs::create_dir_all(&work_dir)?;
        write_wav(&work_dir.join(AUDIO_FILE), &combined)
            .map_err(|e| PipelineError::Integrity(e.to_string()))?;
        fs::write(
            work_dir.join(SCRIPT_FILE),
            strip_speaker_labels(&script),
        )?;

        let chapter_dir = self.import_chapter(payload, &book_id, &chapter_id, &work_dir)?;
        self.advance(&job.id, 85, "Chapter imported")?;

        let subtitles_available = self.run_subtitles(&chapter_dir).await?;

        self.write_metadata(payload, &chapter_dir, &language, subtitles_available)?;
        self.verify_chapter(&chapter_dir)?;
        self.advance(&job.id, 95, "Chapter finalized")?;

        if let Some(mirror) = &self.mirror {
            mirror
                .mirror(&chapter_dir, &book_id, &chapter_id)
                .await
                .map_err(external)?;
        }

        let _ = fs::remove_dir_all(&work_dir);

        let mut paths = HashMap::new();
        paths.insert(
            "chapter_dir".to_string(),
            chapter_dir.display().to_string(),
        );
        paths.insert(
            "audio_wav".to_string(),
            chapter_dir.join(AUDIO_FILE).display().to_string(),
        );
        paths.insert(
            "script_file".to_string(),
            chapter_dir.join(SCRIPT_FILE).display().to_string(),
        );
        paths.insert(
            "metadata".to_string(),
            chapter_dir.join(METADATA_FILE).display().to_string(),
        );
        if subtitles_available {
            paths.insert(
                "subtitles".to_string(),
                chapter_dir.join(SUBTITLE_FILE).display().to_string(),
            );
        }
        Ok(paths)
    }

    async fn resolve_content(&self, payload: &JobPayload) -> Result<String, PipelineError> {
        if payload.source_value.trim().is_empty() {
            return Err(PipelineError::Validation(
                "source_value must not be empty".to_string(),
            ));
        }

        match payload.source_type {
            SourceType::Text | SourceType::Markdown => Ok(payload.source_value.clone()),
            SourceType::Url => {
                let url = &payload.source_value;
                let response = self
                    .http
                    .get(url)
                    .timeout(self.settings.fetch_timeout)
                    .send()
                    .await
                    .map_err(|e| {
                        PipelineError::ExternalService(format!("failed to fetch {}: {}", url, e))
                    })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(PipelineError::ExternalService(format!(
                        "fetching {} returned {}",
                        url, status
                    )));
                }

                let body = response.text().await.map_err(|e| {
                    PipelineError::ExternalService(format!(
                        "failed to read body of {}: {}",
                        url, e
                    ))
                })?;
                if body.trim().is_empty() {
                    return Err(PipelineError::ExternalService(format!(
                        "fetched document {} is empty",
                        url
                    )));
                }
                Ok(body)
            }
        }
    }

    /// Chunk the turns under the prompt byte budget, synthesize each
    /// batch in order, and assemble one stereo chapter.
    async fn synthesize_audio(
        &self,
        job_id: &str,
        turns: &[crate::domain::DialogueTurn],
        language: &str,
    ) -> Result<crate::pipeline::audio::AudioSegment, PipelineError> {
        let instructions = SPEECH_INSTRUCTIONS.replace("[LANGUAGE]", language);
        let budget = available_budget(self.settings.prompt_byte_limit, &instructions)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        let batches = chunk_turns(turns, budget)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;

        info!(job_id, batches = batches.len(), "Synthesizing audio");

        let mut segments = Vec::with_capacity(batches.len());
        for (i, batch) in batches.iter().enumerate() {
            let prompt = format_prompt(&instructions, batch);
            let audio = self.synthesizer.synthesize(&prompt).await.map_err(external)?;
            let segment = decode_segment(&audio.data, &audio.mime_type)
                .map_err(|e| PipelineError::ExternalService(e.to_string()))?;
            debug!(
                job_id,
                batch = i + 1,
                total = batches.len(),
                duration_sec = segment.duration_seconds(),
                "Synthesized batch"
            );
            segments.push(segment);
        }

        assemble(segments, self.settings.silence_ms)
            .map_err(|e| PipelineError::ExternalService(e.to_string()))
    }

    /// Move staged artifacts into `output_root/<book>/<chapter>/`,
    /// bootstrapping the book directory when requested.
    fn import_chapter(
        &self,
        payload: &JobPayload,
        book_id: &str,
        chapter_id: &str,
        work_dir: &Path,
    ) -> Result<PathBuf, PipelineError> {
        let book_dir = self.settings.output_root.join(book_id);
        if !book_dir.is_dir() {
            if !payload.create_book {
                return Err(PipelineError::Integrity(format!(
                    "book '{}' does not exist and create_book is not set",
                    book_id
                )));
            }
            fs::create_dir_all(&book_dir)?;
            let book_metadata = serde_json::json!({
                "book_id": book_id,
                "title": book_id,
                "created_at": Utc::now().to_rfc3339(),
            });
            fs::write(
                book_dir.join("book_metadata.json"),
                serde_json::to_vec_pretty(&book_metadata)
                    .map_err(|e| PipelineError::Integrity(e.to_string()))?,
            )?;
            info!(book_id, "Bootstrapped book directory");
        }

        let chapter_dir = book_dir.join(chapter_id);
        fs::create_dir_all(&chapter_dir)?;

        move_file(&work_dir.join(AUDIO_FILE), &chapter_dir.join(AUDIO_FILE))?;
        move_file(&work_dir.join(SCRIPT_FILE), &chapter_dir.join(SCRIPT_FILE))?;

        Ok(chapter_dir)
    }

    /// Run the subtitle aligner if one is configured. The aligner must
    /// leave `subtitles.srt` in the chapter directory; a run that
    /// completes without producing it is an integrity failure.
    async fn run_subtitles(&self, chapter_dir: &Path) -> Result<bool, PipelineError> {
        let Some(subtitles) = &self.subtitles else {
            return Ok(false);
        };

        subtitles.generate(chapter_dir).await.map_err(external)?;
        if !chapter_dir.join(SUBTITLE_FILE).is_file() {
            return Err(PipelineError::Integrity(format!(
                "subtitle generator produced no {}",
                SUBTITLE_FILE
            )));
        }
        Ok(true)
    }

    fn write_metadata(
        &self,
        payload: &JobPayload,
        chapter_dir: &Path,
        language: &str,
        subtitles_available: bool,
    ) -> Result<(), PipelineError> {
        let script_text = fs::read_to_string(chapter_dir.join(SCRIPT_FILE))?;
        let duration = wav_duration_seconds(&chapter_dir.join(AUDIO_FILE))
            .map_err(|e| PipelineError::Integrity(e.to_string()))?;

        let chapter_title = payload
            .title
            .clone()
            .or_else(|| payload.chapter_id.clone())
            .unwrap_or_else(|| "Untitled chapter".to_string());
        let source_type =
            serde_json::to_value(payload.source_type).unwrap_or(serde_json::Value::Null);

        let metadata = serde_json::json!({
            "chapter_title": chapter_title,
            "language": language,
            "audio_file": AUDIO_FILE,
            "script_file": SCRIPT_FILE,
            "audio_duration_sec": (duration * 1000.0).round() / 1000.0,
            "word_count": count_words(&script_text),
            "subtitles_available": subtitles_available,
            "generation_source": source_type,
            "created_at": Utc::now().to_rfc3339(),
        });

        fs::write(
            chapter_dir.join(METADATA_FILE),
            serde_json::to_vec_pretty(&metadata)
                .map_err(|e| PipelineError::Integrity(e.to_string()))?,
        )?;
        Ok(())
    }

    /// A finished chapter must contain audio, script, and metadata.
    fn verify_chapter(&self, chapter_dir: &Path) -> Result<(), PipelineError> {
        for name in [AUDIO_FILE, SCRIPT_FILE, METADATA_FILE] {
            if !chapter_dir.join(name).is_file() {
                return Err(PipelineError::Integrity(format!(
                    "finished chapter is missing {}",
                    name
                )));
            }
        }
        Ok(())
    }

    fn advance(&self, job_id: &str, progress: u8, note: &str) -> Result<(), PipelineError> {
        debug!(job_id, progress, note, "Pipeline progress");
        self.store.update_status(
            job_id,
            JobStatus::Running,
            JobUpdate {
                progress: Some(progress),
                log_excerpt: Some(note.to_string()),
                ..Default::default()
            },
        )?;
        Ok(())
    }
}

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Long-running consumer loop over the job queue.
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, processor: Arc<JobProcessor>) -> Self {
        Self {
            queue,
            processor,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between polls; set it to drain the loop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Poll until the stop flag is set. A job that fails is recorded on
    /// its record; the loop itself only stops on request.
    pub async fn run(&self) {
        info!("Worker started");
        while !self.stop.load(Ordering::Relaxed) {
            self.poll_once().await;
        }
        info!("Worker stopped");
    }

    /// One dequeue attempt. Transport errors back off briefly rather
    /// than spinning against a dead connection.
    pub async fn poll_once(&self) {
        match self.queue.dequeue(DEQUEUE_TIMEOUT).await {
            Ok(Some(message)) => {
                if let Err(err) = self.processor.process_job(&message.job_id).await {
                    error!(job_id = %message.job_id, error = %err, "Failed to record job outcome");
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!(error = %err, "Queue dequeue failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
