//! Database schema types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the input video of a task comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    /// A file under the upload root (or the temp inputs root)
    #[serde(rename = "upload")]
    Upload,
    /// A file in the content store, addressed by its 32-hex md5
    #[serde(rename = "contentHash", alias = "mtPhoto")]
    ContentHash,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Upload => "upload",
            SourceType::ContentHash => "contentHash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(SourceType::Upload),
            "contentHash" | "mtPhoto" => Some(SourceType::ContentHash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpg,
    Png,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        }
    }

    /// File extension used for produced frames
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpg" => Some(OutputFormat::Jpg),
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }
}

/// Frame sampling rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    Keyframe,
    Fps,
    All,
}

impl ExtractMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractMode::Keyframe => "keyframe",
            ExtractMode::Fps => "fps",
            ExtractMode::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyframe" => Some(ExtractMode::Keyframe),
            "fps" => Some(ExtractMode::Fps),
            "all" => Some(ExtractMode::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyframeMode {
    /// Intra-coded pictures only
    Iframe,
    /// Scene-change detection against a threshold
    Scene,
}

impl KeyframeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyframeMode::Iframe => "iframe",
            KeyframeMode::Scene => "scene",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "iframe" => Some(KeyframeMode::Iframe),
            "scene" => Some(KeyframeMode::Scene),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Preparing,
    Running,
    PausedUser,
    PausedLimit,
    Finished,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Preparing => "PREPARING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::PausedUser => "PAUSED_USER",
            TaskStatus::PausedLimit => "PAUSED_LIMIT",
            TaskStatus::Finished => "FINISHED",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "PREPARING" => Some(TaskStatus::Preparing),
            "RUNNING" => Some(TaskStatus::Running),
            "PAUSED_USER" => Some(TaskStatus::PausedUser),
            "PAUSED_LIMIT" => Some(TaskStatus::PausedLimit),
            "FINISHED" => Some(TaskStatus::Finished),
            "FAILED" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// A worker may currently own the task
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Preparing)
    }

    /// Paused or terminal: the task can be continued
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TaskStatus::PausedUser
                | TaskStatus::PausedLimit
                | TaskStatus::Finished
                | TaskStatus::Failed
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    MaxFrames,
    EndSec,
    Eof,
    User,
    Error,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxFrames => "MAX_FRAMES",
            StopReason::EndSec => "END_SEC",
            StopReason::Eof => "EOF",
            StopReason::User => "USER",
            StopReason::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MAX_FRAMES" => Some(StopReason::MaxFrames),
            "END_SEC" => Some(StopReason::EndSec),
            "EOF" => Some(StopReason::Eof),
            "USER" => Some(StopReason::User),
            "ERROR" => Some(StopReason::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistent extraction task
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub user_id: Option<String>,

    pub source_type: SourceType,
    pub source_ref: String,
    pub input_abs_path: String,

    pub output_dir_local_path: String,
    pub output_format: OutputFormat,
    pub jpg_quality: Option<u32>,

    pub mode: ExtractMode,
    pub keyframe_mode: Option<KeyframeMode>,
    pub fps: Option<f64>,
    pub scene_threshold: Option<f64>,

    pub start_sec: Option<f64>,
    pub end_sec: Option<f64>,
    pub max_frames_total: i64,
    pub frames_extracted: i64,

    pub video_width: i64,
    pub video_height: i64,
    pub duration_sec: Option<f64>,
    pub cursor_out_time_sec: Option<f64>,

    pub status: TaskStatus,
    pub stop_reason: Option<StopReason>,
    pub last_error: Option<String>,
    /// JSON array of the last log lines captured on the final transition
    pub last_logs: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Decoded `last_logs`; malformed or empty payloads yield no lines
    pub fn last_log_lines(&self) -> Vec<String> {
        self.last_logs
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default()
    }

    /// `end_sec` when it is an effective limit (positive)
    pub fn end_limit(&self) -> Option<f64> {
        self.end_sec.filter(|v| *v > 0.0)
    }
}

/// New task to insert (always lands as PENDING with zero frames)
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_id: String,
    pub user_id: Option<String>,
    pub source_type: SourceType,
    pub source_ref: String,
    pub input_abs_path: String,
    pub output_dir_local_path: String,
    pub output_format: OutputFormat,
    pub jpg_quality: Option<u32>,
    pub mode: ExtractMode,
    pub keyframe_mode: Option<KeyframeMode>,
    pub fps: Option<f64>,
    pub scene_threshold: Option<f64>,
    pub start_sec: Option<f64>,
    pub end_sec: Option<f64>,
    pub max_frames_total: i64,
    pub video_width: i64,
    pub video_height: i64,
    pub duration_sec: Option<f64>,
}

/// Limits changed by a continue request
#[derive(Debug, Clone, Default)]
pub struct TaskLimits {
    pub end_sec: Option<f64>,
    pub max_frames_total: Option<i64>,
}

/// One produced frame image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub task_id: String,
    pub seq: i64,
    pub rel_path: String,
    pub time_sec: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Frames after a cursor, plus whether more rows follow
#[derive(Debug, Clone, Default)]
pub struct FrameSlice {
    pub frames: Vec<Frame>,
    pub has_more: bool,
}
