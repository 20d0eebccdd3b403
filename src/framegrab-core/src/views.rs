//! JSON views returned to front ends

use crate::runtime::RuntimeView;
use framegrab_db::{
    format_timestamp, ExtractMode, Frame, KeyframeMode, OutputFormat, SourceType, StopReason, Task,
    TaskStatus,
};
use framegrab_processing::ProbeResult;
use serde::Serialize;

/// Public URL of a path under the upload root: `<base>/upload<local>`
pub fn upload_url(base_url: &str, local_path: &str) -> Option<String> {
    let local = local_path.trim();
    if local.is_empty() {
        return None;
    }
    let base = base_url.trim().trim_end_matches('/');
    if local.starts_with('/') {
        Some(format!("{}/upload{}", base, local))
    } else {
        Some(format!("{}/upload/{}", base, local))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    pub source_type: SourceType,
    pub source_ref: String,

    pub output_dir_local_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir_url: Option<String>,
    pub output_format: OutputFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpg_quality: Option<u32>,

    pub mode: ExtractMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyframe_mode: Option<KeyframeMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_threshold: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_sec: Option<f64>,
    #[serde(rename = "maxFrames")]
    pub max_frames_total: i64,

    pub frames_extracted: i64,
    pub video_width: i64,
    pub video_height: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_out_time_sec: Option<f64>,

    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    pub created_at: String,
    pub updated_at: String,

    /// Live progress, or the persisted log tail of the last run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeView>,
}

impl TaskView {
    pub fn new(task: Task, base_url: Option<&str>, runtime: Option<RuntimeView>) -> Self {
        let output_dir_url =
            base_url.and_then(|base| upload_url(base, &task.output_dir_local_path));
        Self {
            task_id: task.task_id,
            user_id: task.user_id,
            source_type: task.source_type,
            source_ref: task.source_ref,
            output_dir_local_path: task.output_dir_local_path,
            output_dir_url,
            output_format: task.output_format,
            jpg_quality: task.jpg_quality,
            mode: task.mode,
            keyframe_mode: task.keyframe_mode,
            fps: task.fps,
            scene_threshold: task.scene_threshold,
            start_sec: task.start_sec,
            end_sec: task.end_sec,
            max_frames_total: task.max_frames_total,
            frames_extracted: task.frames_extracted,
            video_width: task.video_width,
            video_height: task.video_height,
            duration_sec: task.duration_sec,
            cursor_out_time_sec: task.cursor_out_time_sec,
            status: task.status,
            stop_reason: task.stop_reason,
            last_error: task.last_error,
            created_at: format_timestamp(task.created_at),
            updated_at: format_timestamp(task.updated_at),
            runtime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameItem {
    pub seq: i64,
    pub rel_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FrameItem {
    pub fn new(frame: Frame, base_url: Option<&str>) -> Self {
        let url = base_url.and_then(|base| upload_url(base, &frame.rel_path));
        Self {
            seq: frame.seq,
            rel_path: frame.rel_path,
            url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FramesPage {
    pub items: Vec<FrameItem>,
    /// Sequence number to pass as the next cursor
    pub next_cursor: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub items: Vec<TaskView>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDetail {
    pub task: TaskView,
    pub frames: FramesPage,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskResponse {
    pub task_id: String,
    pub probe: ProbeResult,
}
