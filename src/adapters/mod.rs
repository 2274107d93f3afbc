//! Capability adapters for external services.
//!
//! The pipeline depends on these traits, never on concrete services:
//! script generation and speech synthesis are HTTP calls to Gemini,
//! subtitle alignment and remote mirroring wrap external tools. Tests
//! substitute stub implementations.

pub mod gemini;
pub mod mirror;
pub mod subtitles;

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

pub use gemini::{GeminiScriptGenerator, GeminiSpeechSynthesizer};
pub use mirror::GsutilMirror;
pub use subtitles::CommandSubtitleGenerator;

/// Audio returned by one speech synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub data: Vec<u8>,
    /// Declared format tag, e.g. "audio/wav" or "audio/pcm"
    pub mime_type: String,
}

/// Turns source content into a dialogue script.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate_script(&self, content: &str) -> Result<String>;
}

/// Synthesizes speech audio for one prompt.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, prompt: &str) -> Result<SynthesizedAudio>;
}

/// Produces subtitles for a finalized chapter directory.
///
/// Implementations run the generator; the orchestrator verifies the
/// expected output file afterwards.
#[async_trait]
pub trait SubtitleGenerator: Send + Sync {
    async fn generate(&self, chapter_dir: &Path) -> Result<()>;
}

/// Mirrors a finalized chapter directory to remote storage.
#[async_trait]
pub trait ChapterMirror: Send + Sync {
    async fn mirror(&self, chapter_dir: &Path, book_id: &str, chapter_id: &str) -> Result<()>;
}

/// Run a subprocess to completion with a timeout, failing on non-zero
/// exit with stderr captured into the error.
pub(crate) async fn run_checked(
    command: &mut Command,
    what: &str,
    timeout: Duration,
) -> Result<Output> {
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .with_context(|| format!("{} timed out after {:?}", what, timeout))?
        .with_context(|| format!("failed to run {}", what))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        anyhow::bail!(
            "{} failed with exit code {}: {}",
            what,
            exit_code,
            stderr.trim()
        );
    }

    Ok(output)
}
