//! Worker configuration loaded from the environment.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STORYCAST_*, GEMINI_API_KEY)
//! 2. Defaults (state under ~/.storycast)
//!
//! The queue URL and the output root are required; the worker refuses to
//! start without them rather than running degraded.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Errors that make the configuration unusable at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting {0} is not configured")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("failed to determine home directory")]
    NoHomeDir,
}

/// Resolved worker settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Redis transport address, e.g. "redis://127.0.0.1/"
    pub queue_url: String,

    /// Logical queue (Redis list) name
    pub queue_name: String,

    /// SQLite job record database
    pub db_path: PathBuf,

    /// Canonical location of finished chapters (output_root/<book>/<chapter>/)
    pub output_root: PathBuf,

    /// Scratch space for in-flight jobs (work_root/<job_id>/)
    pub work_root: PathBuf,

    /// Total byte budget for one synthesis prompt, instructions included
    pub prompt_byte_limit: usize,

    /// Silence inserted between assembled audio segments
    pub silence_ms: u64,

    /// Timeout for fetching url sources
    pub fetch_timeout: Duration,

    /// Timeout for external subprocess stages (subtitles, mirror)
    pub stage_timeout: Duration,

    pub default_language: String,
    pub tts_language_code: String,
    pub voice_a: String,
    pub voice_b: String,
    pub script_model: String,
    pub tts_model: String,
    pub gemini_api_key: String,

    /// Subtitle generator command; subtitles are skipped when unset
    pub subtitle_command: Option<String>,

    /// Remote mirror destination (gs:// bucket prefix); mirroring is
    /// skipped when unset
    pub mirror_bucket: Option<String>,

    /// Regex of paths excluded from mirroring
    pub mirror_exclude: String,
}

impl Settings {
    /// Load settings from the environment, failing fast on anything
    /// required or unparseable.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir()
            .ok_or(ConfigError::NoHomeDir)?
            .join(".storycast");

        let queue_url = env("STORYCAST_QUEUE_URL")
            .ok_or(ConfigError::Missing("STORYCAST_QUEUE_URL"))?;
        let output_root = env("STORYCAST_OUTPUT_ROOT")
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing("STORYCAST_OUTPUT_ROOT"))?;

        Ok(Self {
            queue_url,
            queue_name: env("STORYCAST_QUEUE_NAME")
                .unwrap_or_else(|| "podcast_jobs".to_string()),
            db_path: env("STORYCAST_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join("jobs.db")),
            output_root,
            work_root: env("STORYCAST_WORK_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join("work")),
            prompt_byte_limit: env_parse("STORYCAST_PROMPT_BYTE_LIMIT", 3600)?,
            silence_ms: env_parse("STORYCAST_SILENCE_MS", 50)?,
            fetch_timeout: Duration::from_secs(env_parse("STORYCAST_FETCH_TIMEOUT_SECS", 30)?),
            stage_timeout: Duration::from_secs(env_parse("STORYCAST_STAGE_TIMEOUT_SECS", 600)?),
            default_language: env("STORYCAST_LANGUAGE").unwrap_or_else(|| "English".to_string()),
            tts_language_code: env("STORYCAST_TTS_LANGUAGE_CODE")
                .unwrap_or_else(|| "en-US".to_string()),
            voice_a: env("STORYCAST_VOICE_A").unwrap_or_else(|| "Puck".to_string()),
            voice_b: env("STORYCAST_VOICE_B").unwrap_or_else(|| "Kore".to_string()),
            script_model: env("STORYCAST_SCRIPT_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            tts_model: env("STORYCAST_TTS_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash-tts".to_string()),
            gemini_api_key: env("GEMINI_API_KEY").unwrap_or_default(),
            subtitle_command: env("STORYCAST_SUBTITLE_COMMAND"),
            mirror_bucket: env("STORYCAST_MIRROR_BUCKET")
                .map(|b| b.trim_end_matches('/').to_string()),
            mirror_exclude: env("STORYCAST_MIRROR_EXCLUDE")
                .unwrap_or_else(|| r".*\.tmp$".to_string()),
        })
    }
}

/// Read a trimmed, non-empty environment variable.
fn env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
{
    match env(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Settings::load reads process-global env vars, so these tests only
    // exercise the helpers; end-to-end settings are built directly in
    // pipeline tests.

    #[test]
    fn test_env_parse_default() {
        let value: usize = env_parse("STORYCAST_TEST_UNSET_VALUE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_missing_queue_url_is_fatal() {
        std::env::remove_var("STORYCAST_QUEUE_URL");
        let err = Settings::load().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("STORYCAST_QUEUE_URL")));
    }
}
