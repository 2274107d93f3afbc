//! Subtitle generation through an external alignment command.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{run_checked, SubtitleGenerator};

/// Runs a configured subtitle aligner as `<program> <chapter_dir>`.
///
/// The aligner is expected to read the chapter's audio and script and
/// write `subtitles.srt` into the same directory.
pub struct CommandSubtitleGenerator {
    program: String,
    timeout: Duration,
}

impl CommandSubtitleGenerator {
    pub fn new(program: String, timeout: Duration) -> Self {
        Self { program, timeout }
    }
}

#[async_trait]
impl SubtitleGenerator for CommandSubtitleGenerator {
    async fn generate(&self, chapter_dir: &Path) -> Result<()> {
        debug!(program = %self.program, dir = %chapter_dir.display(), "running subtitle aligner");

        let mut command = Command::new(&self.program);
        command.arg(chapter_dir);
        run_checked(&mut command, "subtitle aligner", self.timeout).await?;
        Ok(())
    }
}
