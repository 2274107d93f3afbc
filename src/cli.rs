//! Command-line interface for storycast.
//!
//! Provides commands for running the worker, enqueuing generation jobs,
//! and inspecting job records.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use crate::adapters::{
    ChapterMirror, CommandSubtitleGenerator, GeminiScriptGenerator, GeminiSpeechSynthesizer,
    GsutilMirror, ScriptGenerator, SpeechSynthesizer, SubtitleGenerator,
};
use crate::config::{ConfigError, Settings};
use crate::domain::{JobPayload, JobStatus, SourceType};
use crate::pipeline::{JobProcessor, Worker};
use crate::queue::{JobQueue, RedisJobQueue};
use crate::store::JobStore;

/// storycast - turn source content into two-host audio chapters
#[derive(Parser, Debug)]
#[command(name = "storycast")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter, e.g. "debug" or "storycast=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline worker
    Worker {
        /// Process at most one job, then exit
        #[arg(long)]
        once: bool,
    },

    /// Create a job record and enqueue it
    Enqueue {
        /// Where the content comes from
        #[arg(long, value_enum, default_value = "text")]
        source_type: SourceArg,

        /// Inline source value (URL or raw text)
        #[arg(long, conflicts_with = "input")]
        source_value: Option<String>,

        /// Read the source value from a file
        #[arg(long)]
        input: Option<PathBuf>,

        /// Spoken language for the dialogue
        #[arg(long)]
        language: Option<String>,

        /// Book the chapter is imported into
        #[arg(long)]
        book: Option<String>,

        /// Chapter directory name
        #[arg(long)]
        chapter: Option<String>,

        /// Chapter title shown in clients
        #[arg(long)]
        title: Option<String>,

        /// Bootstrap the book directory if missing
        #[arg(long)]
        create_book: bool,

        /// Requester recorded on the job
        #[arg(long)]
        requested_by: Option<String>,
    },

    /// Show one job record
    Status {
        /// Job ID
        job_id: String,
    },

    /// List recent jobs
    List {
        /// Filter by status
        #[arg(long, value_enum)]
        status: Option<StatusArg>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Skip this many jobs
        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SourceArg {
    Url,
    Text,
    Markdown,
}

impl From<SourceArg> for SourceType {
    fn from(s: SourceArg) -> Self {
        match s {
            SourceArg::Url => SourceType::Url,
            SourceArg::Text => SourceType::Text,
            SourceArg::Markdown => SourceType::Markdown,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl From<StatusArg> for JobStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Queued => JobStatus::Queued,
            StatusArg::Running => JobStatus::Running,
            StatusArg::Succeeded => JobStatus::Succeeded,
            StatusArg::Failed => JobStatus::Failed,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Worker { once } => run_worker(once).await,
            Commands::Enqueue {
                source_type,
                source_value,
                input,
                language,
                book,
                chapter,
                title,
                create_book,
                requested_by,
            } => {
                let payload = JobPayload {
                    source_type: source_type.into(),
                    source_value: resolve_source_value(source_value, input)?,
                    language,
                    book_id: book,
                    chapter_id: chapter,
                    title,
                    create_book,
                };
                enqueue_job(payload, requested_by).await
            }
            Commands::Status { job_id } => show_status(&job_id),
            Commands::List {
                status,
                limit,
                offset,
            } => list_jobs(status.map(JobStatus::from), limit, offset),
            Commands::Config => show_config(),
        }
    }
}

fn resolve_source_value(inline: Option<String>, input: Option<PathBuf>) -> Result<String> {
    match (inline, input) {
        (Some(value), _) => Ok(value),
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display())),
        (None, None) => anyhow::bail!("No source provided. Use --source-value or --input <file>"),
    }
}

/// Run the worker loop until interrupted (or for one job with `once`).
async fn run_worker(once: bool) -> Result<()> {
    let settings = Settings::load()?;
    if settings.gemini_api_key.is_empty() {
        return Err(ConfigError::Missing("GEMINI_API_KEY").into());
    }

    let store = Arc::new(JobStore::open(&settings.db_path)?);
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::connect(
        &settings.queue_url,
        settings.queue_name.clone(),
    )?);

    let generator: Arc<dyn ScriptGenerator> = Arc::new(GeminiScriptGenerator::new(
        settings.gemini_api_key.clone(),
        settings.script_model.clone(),
    ));
    let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(GeminiSpeechSynthesizer::new(
        settings.gemini_api_key.clone(),
        settings.tts_model.clone(),
        settings.tts_language_code.clone(),
        settings.voice_a.clone(),
        settings.voice_b.clone(),
    ));
    let subtitles: Option<Arc<dyn SubtitleGenerator>> =
        settings.subtitle_command.clone().map(|command| {
            Arc::new(CommandSubtitleGenerator::new(command, settings.stage_timeout))
                as Arc<dyn SubtitleGenerator>
        });
    let mirror: Option<Arc<dyn ChapterMirror>> = settings.mirror_bucket.clone().map(|bucket| {
        Arc::new(GsutilMirror::new(
            bucket,
            settings.mirror_exclude.clone(),
            settings.stage_timeout,
        )) as Arc<dyn ChapterMirror>
    });

    let processor = Arc::new(JobProcessor::new(
        settings,
        store,
        generator,
        synthesizer,
        subtitles,
        mirror,
    ));
    let worker = Worker::new(queue, processor);

    if once {
        worker.poll_once().await;
        return Ok(());
    }

    let stop = worker.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, finishing current poll");
            stop.store(true, Ordering::Relaxed);
        }
    });

    worker.run().await;
    Ok(())
}

/// Create the job record, then hand the id to the queue.
async fn enqueue_job(payload: JobPayload, requested_by: Option<String>) -> Result<()> {
    let settings = Settings::load()?;
    let store = JobStore::open(&settings.db_path)?;
    let queue = RedisJobQueue::connect(&settings.queue_url, settings.queue_name.clone())?;

    let job = store.create(&payload, requested_by.as_deref())?;
    queue
        .enqueue(&job.id, &serde_json::to_value(&payload)?)
        .await?;

    println!("{}", job.id);
    Ok(())
}

fn show_status(job_id: &str) -> Result<()> {
    let settings = Settings::load()?;
    let store = JobStore::open(&settings.db_path)?;

    let Some(job) = store.get(job_id)? else {
        eprintln!("Job not found: {}", job_id);
        std::process::exit(1);
    };

    println!("Job ID: {}", job.id);
    println!("Status: {}", job.status.as_str());
    if let Some(progress) = job.progress {
        println!("Progress: {}%", progress);
    }
    if let Some(by) = &job.requested_by {
        println!("Requested by: {}", by);
    }
    println!("Created: {}", job.created_at);
    println!("Updated: {}", job.updated_at);
    if let Some(error) = &job.error_message {
        println!("Error: {}", error);
    }
    if let Some(excerpt) = &job.log_excerpt {
        println!("Log: {}", excerpt);
    }
    if let Some(paths) = &job.result_paths {
        println!("\nResults:");
        let mut entries: Vec<_> = paths.iter().collect();
        entries.sort();
        for (name, path) in entries {
            println!("  {}: {}", name, path);
        }
    }
    Ok(())
}

fn list_jobs(status: Option<JobStatus>, limit: usize, offset: usize) -> Result<()> {
    let settings = Settings::load()?;
    let store = JobStore::open(&settings.db_path)?;

    let filter = status.map(|s| vec![s]);
    let (jobs, total) = store.list(filter.as_deref(), limit, offset)?;

    for job in &jobs {
        let progress = job
            .progress
            .map(|p| format!("{:>3}%", p))
            .unwrap_or_else(|| "   -".to_string());
        println!(
            "{}  {:<9}  {}  {}",
            job.id,
            job.status.as_str(),
            progress,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!("\n{} of {} job(s)", jobs.len(), total);
    Ok(())
}

fn show_config() -> Result<()> {
    let settings = Settings::load()?;

    println!("Queue URL: {}", settings.queue_url);
    println!("Queue name: {}", settings.queue_name);
    println!("Database: {}", settings.db_path.display());
    println!("Output root: {}", settings.output_root.display());
    println!("Work root: {}", settings.work_root.display());
    println!("Prompt byte limit: {}", settings.prompt_byte_limit);
    println!("Silence between batches: {} ms", settings.silence_ms);
    println!("Default language: {}", settings.default_language);
    println!("Script model: {}", settings.script_model);
    println!("TTS model: {}", settings.tts_model);
    println!(
        "Gemini API key: {}",
        if settings.gemini_api_key.is_empty() {
            "(not set)"
        } else {
            "(set)"
        }
    );
    println!(
        "Subtitle command: {}",
        settings.subtitle_command.as_deref().unwrap_or("(disabled)")
    );
    println!(
        "Mirror bucket: {}",
        settings.mirror_bucket.as_deref().unwrap_or("(disabled)")
    );
    Ok(())
}
