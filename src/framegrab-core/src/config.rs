//! Configuration management
//!
//! TOML file with `[ffmpeg]`, `[extract]` and `[storage]` sections. Every
//! field has a default, and a handful of environment variables override the
//! file so deployments can be tuned without editing it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name of the temp inputs root, also the logical prefix `/tmp/<name>/`
pub const TEMP_INPUTS_DIR: &str = "video_extract_inputs";

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,

    #[serde(default)]
    pub extract: ExtractConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// External tool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// ffmpeg executable (path or name resolvable on PATH)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// ffprobe executable (path or name resolvable on PATH)
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Wall-clock deadline for one probe
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

/// Worker pool and paging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Concurrent extraction workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the task queue
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Default frame page size for task detail
    #[serde(default = "default_frame_page_size")]
    pub frame_page_size: u32,

    /// Period of frame ingestion while a run is live
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

/// Filesystem locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base data directory (defaults to the platform local data dir)
    pub data_dir: Option<PathBuf>,

    /// SQLite database file (defaults to `<data_dir>/framegrab.db`)
    pub database_path: Option<PathBuf>,

    /// Root of uploaded files and extraction output (defaults to `<data_dir>/upload`)
    pub upload_root: Option<PathBuf>,

    /// Root behind the `/tmp/video_extract_inputs/` prefix
    pub temp_inputs_root: Option<PathBuf>,

    /// Root of the content-hash store (defaults to `/lsp`)
    pub content_store_root: Option<PathBuf>,
}

// Default value functions
fn default_ffmpeg_path() -> PathBuf { PathBuf::from("ffmpeg") }
fn default_ffprobe_path() -> PathBuf { PathBuf::from("ffprobe") }
fn default_probe_timeout_secs() -> u64 { 20 }
fn default_workers() -> usize { 1 }
fn default_queue_size() -> usize { 32 }
fn default_frame_page_size() -> u32 { 120 }
fn default_flush_interval_ms() -> u64 { 600 }

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_size: default_queue_size(),
            frame_page_size: default_frame_page_size(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl FfmpegConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl ExtractConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl StorageConfig {
    /// Resolve data directory with fallback to default
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("framegrab")
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("framegrab.db"))
    }

    pub fn upload_root(&self) -> PathBuf {
        self.upload_root
            .clone()
            .unwrap_or_else(|| self.data_dir().join("upload"))
    }

    pub fn temp_inputs_root(&self) -> PathBuf {
        self.temp_inputs_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(TEMP_INPUTS_DIR))
    }

    pub fn content_store_root(&self) -> PathBuf {
        self.content_store_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("/lsp"))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {:?}", path))
    }

    /// Load from an optional file, apply environment overrides and normalize
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        Ok(config
            .with_env_overrides(|key| std::env::var(key).ok())
            .normalized())
    }

    /// Apply `FFMPEG_PATH`, `FFPROBE_PATH`, `VIDEO_EXTRACT_WORKERS`,
    /// `VIDEO_EXTRACT_QUEUE_SIZE`, `VIDEO_EXTRACT_FRAME_PAGE_SIZE` and `LSP_ROOT`.
    ///
    /// Blank values and non-positive numbers are ignored.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let positive = |key: &str| {
            text(key)
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
        };

        if let Some(v) = text("FFMPEG_PATH") {
            self.ffmpeg.ffmpeg_path = PathBuf::from(v);
        }
        if let Some(v) = text("FFPROBE_PATH") {
            self.ffmpeg.ffprobe_path = PathBuf::from(v);
        }
        if let Some(v) = positive("VIDEO_EXTRACT_WORKERS") {
            self.extract.workers = v;
        }
        if let Some(v) = positive("VIDEO_EXTRACT_QUEUE_SIZE") {
            self.extract.queue_size = v;
        }
        if let Some(v) = positive("VIDEO_EXTRACT_FRAME_PAGE_SIZE") {
            self.extract.frame_page_size = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = text("LSP_ROOT") {
            self.storage.content_store_root = Some(PathBuf::from(v));
        }

        self
    }

    /// Replace out-of-range values with their defaults
    pub fn normalized(mut self) -> Self {
        if self.ffmpeg.ffmpeg_path.as_os_str().is_empty() {
            self.ffmpeg.ffmpeg_path = default_ffmpeg_path();
        }
        if self.ffmpeg.ffprobe_path.as_os_str().is_empty() {
            self.ffmpeg.ffprobe_path = default_ffprobe_path();
        }
        if self.ffmpeg.probe_timeout_secs == 0 {
            self.ffmpeg.probe_timeout_secs = default_probe_timeout_secs();
        }
        if self.extract.workers == 0 {
            self.extract.workers = default_workers();
        }
        if self.extract.queue_size == 0 {
            self.extract.queue_size = default_queue_size();
        }
        if self.extract.frame_page_size == 0 {
            self.extract.frame_page_size = default_frame_page_size();
        }
        if self.extract.flush_interval_ms == 0 {
            self.extract.flush_interval_ms = default_flush_interval_ms();
        }
        self
    }
}
