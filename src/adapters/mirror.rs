//! Chapter mirroring to a Cloud Storage bucket via gsutil.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::{run_checked, ChapterMirror};

/// Mirrors a finalized chapter directory with `gsutil -m rsync`.
///
/// The destination is `<bucket>/<book_id>/<chapter_id>`; files matching
/// the exclude pattern are skipped.
pub struct GsutilMirror {
    bucket: String,
    exclude: String,
    timeout: Duration,
}

impl GsutilMirror {
    pub fn new(bucket: String, exclude: String, timeout: Duration) -> Self {
        Self {
            bucket,
            exclude,
            timeout,
        }
    }

    fn destination(&self, book_id: &str, chapter_id: &str) -> String {
        format!("{}/{}/{}", self.bucket, book_id, chapter_id)
    }
}

#[async_trait]
impl ChapterMirror for GsutilMirror {
    async fn mirror(&self, chapter_dir: &Path, book_id: &str, chapter_id: &str) -> Result<()> {
        let destination = self.destination(book_id, chapter_id);
        info!(dir = %chapter_dir.display(), %destination, "mirroring chapter");

        let mut command = Command::new("gsutil");
        command
            .arg("-m")
            .arg("rsync")
            .arg("-r")
            .arg("-x")
            .arg(&self.exclude)
            .arg(chapter_dir)
            .arg(&destination);
        run_checked(&mut command, "gsutil rsync", self.timeout).await?;
        Ok(())
    }
}
