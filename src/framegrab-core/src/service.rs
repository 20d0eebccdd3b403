//! Extraction task operations
//!
//! [`ExtractService`] is what front ends (the CLI, an HTTP layer) talk to. It
//! validates requests, persists tasks, feeds the scheduler and assembles the
//! JSON views.

use crate::config::Config;
use crate::error::{ExtractError, Result};
use crate::executor::Executor;
use crate::paths::PathResolver;
use crate::runtime::{RuntimeRegistry, RuntimeView};
use crate::scheduler::Scheduler;
use crate::views::{CreateTaskResponse, FrameItem, FramesPage, TaskDetail, TaskPage, TaskView};
use framegrab_db::{
    ExtractMode, KeyframeMode, NewTask, OutputFormat, SourceType, StopReason, Task, TaskLimits,
    TaskStatus, TaskStore, MAX_FRAME_PAGE_SIZE, MAX_TASK_PAGE_SIZE,
};
use framegrab_processing::args::DEFAULT_SCENE_THRESHOLD;
use framegrab_processing::{probe_video, ProbeResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Page size of task listings when the caller gives none
pub const DEFAULT_TASK_PAGE_SIZE: u32 = 20;

const LIST_RUNTIME_LOGS: usize = 20;
const DETAIL_RUNTIME_LOGS: usize = 60;

/// Highest accepted JPEG quality (ffmpeg `-q:v` scale)
const MAX_JPG_QUALITY: i64 = 31;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTaskRequest {
    pub user_id: Option<String>,
    /// `upload` or `contentHash`
    pub source_type: String,
    pub local_path: Option<String>,
    pub md5: Option<String>,
    /// `keyframe`, `fps` or `all`
    pub mode: String,
    pub keyframe_mode: Option<String>,
    pub scene_threshold: Option<f64>,
    pub fps: Option<f64>,
    pub start_sec: Option<f64>,
    pub end_sec: Option<f64>,
    pub max_frames: i64,
    pub output_format: Option<String>,
    pub jpg_quality: Option<i64>,
}

/// New absolute limits for a paused or finished task
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContinueTaskRequest {
    pub task_id: String,
    pub end_sec: Option<f64>,
    pub max_frames: Option<i64>,
}

/// Request fields after validation and defaulting
#[derive(Debug, Clone, PartialEq)]
struct CreateParams {
    source_type: SourceType,
    mode: ExtractMode,
    keyframe_mode: Option<KeyframeMode>,
    scene_threshold: Option<f64>,
    fps: Option<f64>,
    start_sec: Option<f64>,
    end_sec: Option<f64>,
    output_format: OutputFormat,
    jpg_quality: Option<u32>,
}

fn validate_create(req: &CreateTaskRequest) -> Result<CreateParams> {
    if req.max_frames <= 0 {
        return Err(ExtractError::validation("maxFrames must be positive"));
    }

    let source_type = SourceType::parse(req.source_type.trim())
        .ok_or_else(|| {
            ExtractError::validation(format!("invalid sourceType: {:?}", req.source_type))
        })?;

    let mode = ExtractMode::parse(&req.mode)
        .ok_or_else(|| ExtractError::validation(format!("invalid mode: {:?}", req.mode)))?;

    let mut keyframe_mode = None;
    let mut scene_threshold = None;
    let mut fps = None;
    match mode {
        ExtractMode::Fps => match req.fps {
            Some(v) if v.is_finite() && v > 0.0 => fps = Some(v),
            _ => return Err(ExtractError::validation("fps must be positive")),
        },
        ExtractMode::Keyframe => {
            // unknown keyframe modes fall back to I-frames
            let kind = req
                .keyframe_mode
                .as_deref()
                .and_then(KeyframeMode::parse)
                .unwrap_or(KeyframeMode::Iframe);
            if kind == KeyframeMode::Scene {
                let threshold = req.scene_threshold.unwrap_or(DEFAULT_SCENE_THRESHOLD);
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(ExtractError::validation("sceneThreshold must be within [0, 1]"));
                }
                scene_threshold = Some(threshold);
            }
            keyframe_mode = Some(kind);
        }
        ExtractMode::All => {}
    }

    if let Some(start) = req.start_sec {
        if !start.is_finite() || start < 0.0 {
            return Err(ExtractError::validation("startSec must be non-negative"));
        }
    }
    if let Some(end) = req.end_sec {
        if !end.is_finite() || end < 0.0 {
            return Err(ExtractError::validation("endSec must be non-negative"));
        }
    }
    if let (Some(start), Some(end)) = (req.start_sec, req.end_sec) {
        if end <= start {
            return Err(ExtractError::validation("endSec must be greater than startSec"));
        }
    }

    let output_format = match req.output_format.as_deref().map(str::trim) {
        None | Some("") => OutputFormat::Jpg,
        Some(raw) => OutputFormat::parse(raw)
            .ok_or_else(|| ExtractError::validation(format!("invalid outputFormat: {:?}", raw)))?,
    };

    let jpg_quality = match req.jpg_quality {
        Some(q) if !(1..=MAX_JPG_QUALITY).contains(&q) => {
            return Err(ExtractError::validation("jpgQuality must be within [1, 31]"));
        }
        Some(q) if output_format == OutputFormat::Jpg => u32::try_from(q).ok(),
        _ => None,
    };

    Ok(CreateParams {
        source_type,
        mode,
        keyframe_mode,
        scene_threshold,
        fps,
        start_sec: req.start_sec,
        end_sec: req.end_sec,
        output_format,
        jpg_quality,
    })
}

fn require_task_id(raw: &str) -> Result<&str> {
    let task_id = raw.trim();
    if task_id.is_empty() {
        return Err(ExtractError::validation("taskId is empty"));
    }
    Ok(task_id)
}

pub struct ExtractService {
    store: TaskStore,
    resolver: Arc<PathResolver>,
    runtimes: RuntimeRegistry,
    scheduler: Scheduler,
    ffprobe_path: PathBuf,
    probe_timeout: Duration,
    frame_page_size: u32,
}

impl ExtractService {
    /// Wire the executor and worker pool. Must be called from within a tokio runtime.
    pub fn start(config: &Config, store: TaskStore, resolver: PathResolver) -> Self {
        let resolver = Arc::new(resolver);
        let runtimes = RuntimeRegistry::new();
        let executor = Arc::new(Executor::new(
            store.clone(),
            runtimes.clone(),
            resolver.clone(),
            config.ffmpeg.ffmpeg_path.clone(),
            config.extract.flush_interval(),
        ));
        let scheduler =
            Scheduler::start(executor, config.extract.workers, config.extract.queue_size);

        Self {
            store,
            resolver,
            runtimes,
            scheduler,
            ffprobe_path: config.ffmpeg.ffprobe_path.clone(),
            probe_timeout: config.ffmpeg.probe_timeout(),
            frame_page_size: config.extract.frame_page_size,
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn runtimes(&self) -> &RuntimeRegistry {
        &self.runtimes
    }

    pub fn queue_len(&self) -> usize {
        self.scheduler.queue_len()
    }

    async fn probe(&self, input: &Path) -> Result<ProbeResult> {
        Ok(probe_video(&self.ffprobe_path, input, self.probe_timeout).await?)
    }

    /// Resolve and probe a source without creating a task
    pub async fn probe_source(
        &self,
        source_type: &str,
        local_path: Option<&str>,
        md5: Option<&str>,
    ) -> Result<ProbeResult> {
        let source_type = SourceType::parse(source_type.trim())
            .ok_or_else(|| {
                ExtractError::validation(format!("invalid sourceType: {:?}", source_type))
            })?;
        let resolved = self.resolver.resolve(source_type, local_path, md5).await?;
        self.probe(&resolved.input_abs_path).await
    }

    /// Validate, probe and persist a new task, then queue it.
    ///
    /// A full or closed queue leaves the task PENDING and is not an error.
    pub async fn create_task(&self, req: CreateTaskRequest) -> Result<CreateTaskResponse> {
        let params = validate_create(&req)?;

        let resolved = self
            .resolver
            .resolve(params.source_type, req.local_path.as_deref(), req.md5.as_deref())
            .await?;

        let probe = self.probe(&resolved.input_abs_path).await?;
        if probe.width <= 0 || probe.height <= 0 {
            return Err(ExtractError::ProbeFailed(format!(
                "no video dimensions for {}",
                resolved.input_abs_path.display()
            )));
        }

        let task_id = Uuid::new_v4().to_string();
        let output_dir_local_path = format!("/extract/{}", task_id);
        let frames_dir = self.resolver.upload_abs_path(&output_dir_local_path)?.join("frames");
        tokio::fs::create_dir_all(&frames_dir)
            .await
            .map_err(|e| {
                ExtractError::Internal(format!("failed to create {:?}: {}", frames_dir, e))
            })?;

        self.store.insert(&NewTask {
            task_id: task_id.clone(),
            user_id: req.user_id.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()),
            source_type: resolved.source_type,
            source_ref: resolved.source_ref,
            input_abs_path: resolved.input_abs_path.to_string_lossy().into_owned(),
            output_dir_local_path,
            output_format: params.output_format,
            jpg_quality: params.jpg_quality,
            mode: params.mode,
            keyframe_mode: params.keyframe_mode,
            fps: params.fps,
            scene_threshold: params.scene_threshold,
            start_sec: params.start_sec,
            end_sec: params.end_sec,
            max_frames_total: req.max_frames,
            video_width: probe.width,
            video_height: probe.height,
            duration_sec: Some(probe.duration_sec).filter(|d| *d > 0.0),
        })?;

        info!(
            task_id = %task_id,
            mode = params.mode.as_str(),
            max_frames = req.max_frames,
            "task created"
        );

        if let Err(e) = self.scheduler.enqueue(&task_id) {
            warn!(task_id = %task_id, "task left pending: {}", e);
        }

        Ok(CreateTaskResponse { task_id, probe })
    }

    /// Raise the limits of a stopped task and queue it again
    pub fn continue_task(&self, req: &ContinueTaskRequest) -> Result<()> {
        let task_id = require_task_id(&req.task_id)?;

        if self.runtimes.contains(task_id) {
            return Err(ExtractError::Conflict(format!("task {} is running", task_id)));
        }
        let task = self.store.load(task_id)?;
        if !task.status.is_resumable() {
            return Err(ExtractError::Conflict(format!(
                "task {} cannot be continued while {}",
                task_id, task.status
            )));
        }

        if req.end_sec.is_none() && req.max_frames.is_none() {
            return Err(ExtractError::validation("endSec or maxFrames is required"));
        }
        if let Some(end) = req.end_sec {
            if !end.is_finite() || end < 0.0 {
                return Err(ExtractError::validation("endSec must be non-negative"));
            }
            if let Some(start) = task.start_sec {
                if end > 0.0 && end <= start {
                    return Err(ExtractError::validation("endSec must be greater than startSec"));
                }
            }
        }
        if let Some(max) = req.max_frames {
            if max <= 0 {
                return Err(ExtractError::validation("maxFrames must be positive"));
            }
            if max <= task.frames_extracted {
                return Err(ExtractError::validation(format!(
                    "maxFrames must exceed the {} frames already extracted",
                    task.frames_extracted
                )));
            }
        }

        let limits = TaskLimits {
            end_sec: req.end_sec,
            max_frames_total: req.max_frames,
        };
        if !self.store.reset_for_continue(task_id, &limits)? {
            return Err(ExtractError::NotFound(format!("task {}", task_id)));
        }

        info!(task_id, "task continued");
        self.scheduler.enqueue(task_id)
    }

    /// Signal the live run of `task_id`, if any. Idempotent.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        let cancelled = self.runtimes.cancel(task_id.trim());
        if cancelled {
            debug!(task_id, "cancel signalled");
        }
        cancelled
    }

    /// Cancel any live run and mark the task PAUSED_USER
    pub fn cancel_and_mark(&self, task_id: &str) -> Result<()> {
        let task_id = require_task_id(task_id)?;
        self.cancel_task(task_id);

        let task = self.store.load(task_id)?;
        self.store.update_status(
            task_id,
            TaskStatus::PausedUser,
            Some(StopReason::User),
            None,
            task.last_logs.as_deref(),
        )?;
        info!(task_id, "task paused by user");
        Ok(())
    }

    /// Delete a task and its frame rows, optionally with its output directory
    pub async fn delete_task(&self, task_id: &str, delete_files: bool) -> Result<()> {
        let task_id = require_task_id(task_id)?;
        self.cancel_task(task_id);

        let task = self.store.load(task_id)?;
        let frames = self.store.count_frames(task_id)?;
        self.store.delete(task_id)?;
        info!(task_id, frames, delete_files, "task deleted");

        if delete_files {
            match self.resolver.upload_abs_path(&task.output_dir_local_path) {
                Ok(dir) => {
                    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(task_id, "failed to remove {:?}: {}", dir, e);
                        }
                    }
                }
                Err(e) => warn!(task_id, "refusing to remove output directory: {}", e),
            }
        }
        Ok(())
    }

    /// Page of tasks, most recently updated first
    pub fn list_tasks(
        &self,
        page: u32,
        page_size: u32,
        base_url: Option<&str>,
    ) -> Result<TaskPage> {
        let page = page.max(1);
        let page_size = match page_size {
            0 => DEFAULT_TASK_PAGE_SIZE,
            n => n.min(MAX_TASK_PAGE_SIZE),
        };

        let (tasks, total) = self.store.list_tasks(page, page_size)?;
        let items = tasks
            .into_iter()
            .map(|task| {
                let runtime = self
                    .runtimes
                    .get(&task.task_id)
                    .map(|rt| rt.snapshot(LIST_RUNTIME_LOGS));
                TaskView::new(task, base_url, runtime)
            })
            .collect();

        Ok(TaskPage {
            items,
            total,
            page,
            page_size,
        })
    }

    /// Task view plus one page of frames after `frame_cursor`
    pub fn get_task_detail(
        &self,
        task_id: &str,
        frame_cursor: i64,
        frame_limit: i64,
        base_url: Option<&str>,
    ) -> Result<TaskDetail> {
        let task_id = require_task_id(task_id)?;
        let cursor = frame_cursor.max(0);
        let limit = if frame_limit <= 0 {
            self.frame_page_size
        } else {
            u32::try_from(frame_limit).unwrap_or(MAX_FRAME_PAGE_SIZE)
        }
        .min(MAX_FRAME_PAGE_SIZE);

        let task = self.store.load(task_id)?;
        let runtime = detail_runtime(&self.runtimes, &task);
        let slice = self.store.list_frames(task_id, cursor, limit)?;

        let next_cursor = slice.frames.last().map(|f| f.seq).unwrap_or(cursor);
        let frames = FramesPage {
            items: slice
                .frames
                .into_iter()
                .map(|frame| FrameItem::new(frame, base_url))
                .collect(),
            next_cursor,
            has_more: slice.has_more,
        };

        Ok(TaskDetail {
            task: TaskView::new(task, base_url, runtime),
            frames,
        })
    }

    /// Queue every PENDING task, oldest first. Stops at the first admission failure.
    pub fn resume_pending(&self) -> Result<usize> {
        let pending = self.store.task_ids_with_status(&[TaskStatus::Pending])?;
        let mut admitted = 0;
        for task_id in &pending {
            if let Err(e) = self.scheduler.enqueue(task_id) {
                warn!(task_id = %task_id, "stopped resuming pending tasks: {}", e);
                break;
            }
            admitted += 1;
        }
        if admitted > 0 {
            info!(admitted, total = pending.len(), "pending tasks queued");
        }
        Ok(admitted)
    }

    /// Mark RUNNING/PREPARING rows without a live runtime as paused by the user
    pub fn mark_stale_running(&self) -> Result<usize> {
        let stale = self
            .store
            .task_ids_with_status(&[TaskStatus::Running, TaskStatus::Preparing])?;
        let mut marked = 0;
        for task_id in stale.iter().filter(|id| !self.runtimes.contains(id)) {
            let changed = self.store.update_status(
                task_id,
                TaskStatus::PausedUser,
                Some(StopReason::User),
                Some("interrupted by restart"),
                None,
            )?;
            if changed {
                warn!(task_id = %task_id, "stale run marked as paused");
                marked += 1;
            }
        }
        Ok(marked)
    }

    /// Stop admitting work, cancel live runs and wait for the workers
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

/// Live snapshot, or the persisted log tail when nothing runs
fn detail_runtime(runtimes: &RuntimeRegistry, task: &Task) -> Option<RuntimeView> {
    if let Some(runtime) = runtimes.get(&task.task_id) {
        return Some(runtime.snapshot(DETAIL_RUNTIME_LOGS));
    }
    let logs = task.last_log_lines();
    if logs.is_empty() {
        return None;
    }
    Some(RuntimeView {
        logs,
        ..RuntimeView::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request() -> CreateTaskRequest {
        CreateTaskRequest {
            source_type: "upload".to_string(),
            local_path: Some("/videos/in.mp4".to_string()),
            mode: "all".to_string(),
            max_frames: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_defaults() {
        let params = validate_create(&create_request()).unwrap();
        assert_eq!(params.source_type, SourceType::Upload);
        assert_eq!(params.mode, ExtractMode::All);
        assert_eq!(params.output_format, OutputFormat::Jpg);
        assert_eq!(params.jpg_quality, None);
        assert_eq!(params.keyframe_mode, None);

        let mut req = create_request();
        req.mode = "KEYFRAME".to_string();
        req.keyframe_mode = Some("bogus".to_string());
        let params = validate_create(&req).unwrap();
        assert_eq!(params.keyframe_mode, Some(KeyframeMode::Iframe));
        assert_eq!(params.scene_threshold, None);

        req.keyframe_mode = Some("scene".to_string());
        let params = validate_create(&req).unwrap();
        assert_eq!(params.scene_threshold, Some(0.3));
    }

    #[test]
    fn test_validate_rejections() {
        let cases: Vec<(&str, Box<dyn Fn(&mut CreateTaskRequest)>)> = vec![
            ("max frames", Box::new(|r| r.max_frames = 0)),
            ("source type", Box::new(|r| r.source_type = "ftp".into())),
            ("mode", Box::new(|r| r.mode = "every".into())),
            ("fps missing", Box::new(|r| r.mode = "fps".into())),
            (
                "fps zero",
                Box::new(|r| {
                    r.mode = "fps".into();
                    r.fps = Some(0.0);
                }),
            ),
            (
                "scene threshold",
                Box::new(|r| {
                    r.mode = "keyframe".into();
                    r.keyframe_mode = Some("scene".into());
                    r.scene_threshold = Some(1.5);
                }),
            ),
            ("negative start", Box::new(|r| r.start_sec = Some(-1.0))),
            ("negative end", Box::new(|r| r.end_sec = Some(-0.5))),
            (
                "end equals start",
                Box::new(|r| {
                    r.start_sec = Some(2.0);
                    r.end_sec = Some(2.0);
                }),
            ),
            (
                "zero start and end",
                Box::new(|r| {
                    r.start_sec = Some(0.0);
                    r.end_sec = Some(0.0);
                }),
            ),
            ("format", Box::new(|r| r.output_format = Some("gif".into()))),
            ("quality high", Box::new(|r| r.jpg_quality = Some(40))),
            ("quality zero", Box::new(|r| r.jpg_quality = Some(0))),
        ];

        for (name, mutate) in cases {
            let mut req = create_request();
            mutate(&mut req);
            let err = validate_create(&req).unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation, "case {}", name);
        }
    }

    #[test]
    fn test_quality_dropped_for_png() {
        let mut req = create_request();
        req.output_format = Some("png".to_string());
        req.jpg_quality = Some(5);
        let params = validate_create(&req).unwrap();
        assert_eq!(params.output_format, OutputFormat::Png);
        assert_eq!(params.jpg_quality, None);

        req.output_format = None;
        assert_eq!(validate_create(&req).unwrap().jpg_quality, Some(5));
    }

    #[test]
    fn test_detail_runtime_falls_back_to_last_logs() {
        let registry = RuntimeRegistry::new();
        let store = TaskStore::open_in_memory().unwrap();
        store
            .insert(&NewTask {
                task_id: "t1".to_string(),
                user_id: None,
                source_type: SourceType::Upload,
                source_ref: "/in.mp4".to_string(),
                input_abs_path: "/in.mp4".to_string(),
                output_dir_local_path: "/extract/t1".to_string(),
                output_format: OutputFormat::Jpg,
                jpg_quality: None,
                mode: ExtractMode::All,
                keyframe_mode: None,
                fps: None,
                scene_threshold: None,
                start_sec: None,
                end_sec: None,
                max_frames_total: 1,
                video_width: 2,
                video_height: 2,
                duration_sec: None,
            })
            .unwrap();

        let task = store.load("t1").unwrap();
        assert_eq!(detail_runtime(&registry, &task), None);

        store
            .update_status(
                "t1",
                TaskStatus::Finished,
                Some(StopReason::Eof),
                None,
                Some("[\"a\",\"b\"]"),
            )
            .unwrap();
        let task = store.load("t1").unwrap();
        let view = detail_runtime(&registry, &task).unwrap();
        assert_eq!(view.frame, 0);
        assert_eq!(view.logs, vec!["a", "b"]);

        let guard = registry.try_acquire("t1").unwrap();
        guard.append_log("live");
        let view = detail_runtime(&registry, &task).unwrap();
        assert_eq!(view.logs, vec!["live"]);
        assert_eq!(view.frame, -1);
    }

    #[cfg(unix)]
    mod flows {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Instant;

        const FFPROBE: &str = r#"#!/bin/sh
case "$*" in
  *flat.mp4*) echo '{"streams":[{"width":0,"height":0}],"format":{"duration":"1.0"}}' ;;
  *) echo '{"streams":[{"width":640,"height":360,"avg_frame_rate":"25/1"}],"format":{"duration":"10.000000"}}' ;;
esac
"#;

        /// Writes up to 20 frames honoring `-frames:v` and `-start_number`
        const FFMPEG: &str = r#"#!/bin/sh
start=1
limit=0
prev=""
for arg in "$@"; do
  case "$prev" in
    -start_number) start=$arg ;;
    -frames:v) limit=$arg ;;
  esac
  prev=$arg
  pattern=$arg
done
count=20
if [ "$limit" -lt "$count" ]; then count=$limit; fi
i=0
while [ "$i" -lt "$count" ]; do
  seq=$((start + i))
  i=$((i + 1))
  : > "$(printf "$pattern" "$seq")"
  echo "frame=$i"
  echo "out_time_ms=$((i * 250000))"
  echo "progress=continue"
done
echo "progress=end"
"#;

        struct Fixture {
            _dir: tempfile::TempDir,
            upload: PathBuf,
            service: ExtractService,
        }

        fn write_script(path: &Path, body: &str) {
            std::fs::write(path, body).unwrap();
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn fixture() -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let upload = dir.path().join("upload");
            std::fs::create_dir_all(upload.join("videos")).unwrap();
            std::fs::write(upload.join("videos/in.mp4"), b"not really a video").unwrap();
            std::fs::write(upload.join("videos/flat.mp4"), b"").unwrap();

            let ffprobe = dir.path().join("ffprobe");
            let ffmpeg = dir.path().join("ffmpeg");
            write_script(&ffprobe, FFPROBE);
            write_script(&ffmpeg, FFMPEG);

            let mut config = Config::default();
            config.ffmpeg.ffmpeg_path = ffmpeg;
            config.ffmpeg.ffprobe_path = ffprobe;
            config.extract.flush_interval_ms = 50;
            config.extract.frame_page_size = 2;

            let resolver =
                PathResolver::new(&upload, dir.path().join("tmp"), dir.path().join("lsp"));
            let store = TaskStore::open_in_memory().unwrap();
            let service = ExtractService::start(&config, store, resolver);
            Fixture {
                _dir: dir,
                upload,
                service,
            }
        }

        async fn wait_for_status(
            service: &ExtractService,
            task_id: &str,
            status: TaskStatus,
        ) -> Task {
            let deadline = Instant::now() + Duration::from_secs(10);
            loop {
                let task = service.store().load(task_id).unwrap();
                if task.status == status && !service.runtimes().contains(task_id) {
                    return task;
                }
                assert!(Instant::now() < deadline, "task {} stuck in {}", task_id, task.status);
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        #[tokio::test]
        async fn test_create_and_continue() {
            let f = fixture();
            let mut req = create_request();
            req.max_frames = 2;
            req.user_id = Some("  ".to_string());

            let created = f.service.create_task(req).await.unwrap();
            assert_eq!(created.probe.width, 640);
            assert_eq!(created.probe.avg_fps, 25.0);
            assert!(f.upload.join("extract").join(&created.task_id).join("frames").is_dir());

            let id = created.task_id.as_str();
            let task = wait_for_status(&f.service, id, TaskStatus::PausedLimit).await;
            assert_eq!(task.stop_reason, Some(StopReason::MaxFrames));
            assert_eq!(task.frames_extracted, 2);
            assert_eq!(task.user_id, None);
            assert_eq!(task.duration_sec, Some(10.0));

            let equal = ContinueTaskRequest {
                task_id: id.to_string(),
                end_sec: None,
                max_frames: Some(2),
            };
            assert_eq!(
                f.service.continue_task(&equal).unwrap_err().kind(),
                crate::error::ErrorKind::Validation
            );

            let more = ContinueTaskRequest {
                task_id: id.to_string(),
                end_sec: None,
                max_frames: Some(4),
            };
            f.service.continue_task(&more).unwrap();
            let task = wait_for_status(&f.service, id, TaskStatus::PausedLimit).await;
            assert_eq!(task.frames_extracted, 4);

            let detail = f.service.get_task_detail(id, 0, 0, Some("http://h")).unwrap();
            assert_eq!(detail.frames.items.len(), 2);
            assert_eq!(detail.frames.next_cursor, 2);
            assert!(detail.frames.has_more);
            assert_eq!(
                detail.frames.items[0].url.as_deref(),
                Some(format!("http://h/upload/extract/{}/frames/frame_000001.jpg", id).as_str())
            );
            assert!(detail.task.runtime.is_some());

            let rest = f.service.get_task_detail(id, 2, 10, None).unwrap();
            let seqs: Vec<i64> = rest.frames.items.iter().map(|i| i.seq).collect();
            assert_eq!(seqs, vec![3, 4]);
            assert_eq!(rest.frames.next_cursor, 4);
            assert!(!rest.frames.has_more);
            assert_eq!(rest.frames.items[0].url, None);

            let empty = f.service.get_task_detail(id, 9, 10, None).unwrap();
            assert!(empty.frames.items.is_empty());
            assert_eq!(empty.frames.next_cursor, 9);

            f.service.shutdown().await;
        }

        #[tokio::test]
        async fn test_create_rejects_bad_quality_without_row() {
            let f = fixture();
            let mut req = create_request();
            req.jpg_quality = Some(40);

            let err = f.service.create_task(req).await.unwrap_err();
            assert_eq!(err.kind().http_status(), 400);
            assert_eq!(f.service.list_tasks(1, 0, None).unwrap().total, 0);
            f.service.shutdown().await;
        }

        #[tokio::test]
        async fn test_create_source_failures() {
            let f = fixture();

            let mut req = create_request();
            req.local_path = Some("/../../etc/passwd".to_string());
            let err = f.service.create_task(req).await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Traversal);
            assert_eq!(err.kind().public(), crate::error::ErrorKind::Validation);

            let mut req = create_request();
            req.local_path = Some("/videos/missing.mp4".to_string());
            let err = f.service.create_task(req).await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::InputMissing);

            let mut req = create_request();
            req.local_path = Some("/videos/flat.mp4".to_string());
            let err = f.service.create_task(req).await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::ProbeFailed);

            let mut req = create_request();
            req.source_type = "contentHash".to_string();
            req.md5 = Some("not-a-hash".to_string());
            let err = f.service.create_task(req).await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

            assert_eq!(f.service.list_tasks(1, 0, None).unwrap().total, 0);

            let probe = f
                .service
                .probe_source("upload", Some("http://h/upload/videos/in.mp4?x=1"), None)
                .await
                .unwrap();
            assert_eq!(probe.height, 360);

            f.service.shutdown().await;
        }

        #[tokio::test]
        async fn test_continue_conflicts_and_cancel_and_mark() {
            let f = fixture();
            let mut req = create_request();
            req.max_frames = 1;
            let id = f.service.create_task(req).await.unwrap().task_id;
            wait_for_status(&f.service, &id, TaskStatus::PausedLimit).await;

            f.service
                .store()
                .update_status(&id, TaskStatus::Running, None, None, None)
                .unwrap();
            let req = ContinueTaskRequest {
                task_id: id.clone(),
                end_sec: None,
                max_frames: Some(5),
            };
            let err = f.service.continue_task(&req).unwrap_err();
            assert_eq!(err.kind().http_status(), 409);

            f.service.cancel_and_mark(&id).unwrap();
            f.service.cancel_and_mark(&id).unwrap();
            let task = f.service.store().load(&id).unwrap();
            assert_eq!(task.status, TaskStatus::PausedUser);
            assert_eq!(task.stop_reason, Some(StopReason::User));

            let none = ContinueTaskRequest {
                task_id: id.clone(),
                ..Default::default()
            };
            assert_eq!(
                f.service.continue_task(&none).unwrap_err().kind(),
                crate::error::ErrorKind::Validation
            );

            let missing = ContinueTaskRequest {
                task_id: "nope".to_string(),
                max_frames: Some(3),
                ..Default::default()
            };
            assert_eq!(f.service.continue_task(&missing).unwrap_err().kind().http_status(), 404);
            assert!(f.service.cancel_and_mark("nope").is_err());

            f.service.shutdown().await;
        }

        #[tokio::test]
        async fn test_delete_with_files() {
            let f = fixture();
            let mut req = create_request();
            req.max_frames = 1;
            let id = f.service.create_task(req).await.unwrap().task_id;
            wait_for_status(&f.service, &id, TaskStatus::PausedLimit).await;

            let out_dir = f.upload.join("extract").join(&id);
            assert!(out_dir.join("frames/frame_000001.jpg").is_file());

            f.service.delete_task(&id, true).await.unwrap();
            assert!(!out_dir.exists());
            assert!(f.service.store().get(&id).unwrap().is_none());
            assert_eq!(f.service.store().count_frames(&id).unwrap(), 0);
            assert!(f.upload.join("videos/in.mp4").is_file());

            let err = f.service.delete_task(&id, false).await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);

            f.service.shutdown().await;
        }

        #[tokio::test]
        async fn test_list_and_recovery() {
            let f = fixture();
            let store = f.service.store().clone();

            let rows = [
                ("a", TaskStatus::Running),
                ("b", TaskStatus::Pending),
                ("c", TaskStatus::Preparing),
            ];
            for (id, status) in rows {
                store
                    .insert(&NewTask {
                        task_id: id.to_string(),
                        user_id: None,
                        source_type: SourceType::Upload,
                        source_ref: "/videos/in.mp4".to_string(),
                        input_abs_path: f
                            .upload
                            .join("videos/in.mp4")
                            .to_string_lossy()
                            .into_owned(),
                        output_dir_local_path: format!("/extract/{}", id),
                        output_format: OutputFormat::Png,
                        jpg_quality: None,
                        mode: ExtractMode::All,
                        keyframe_mode: None,
                        fps: None,
                        scene_threshold: None,
                        start_sec: None,
                        end_sec: None,
                        max_frames_total: 3,
                        video_width: 640,
                        video_height: 360,
                        duration_sec: Some(10.0),
                    })
                    .unwrap();
                store.update_status(id, status, None, None, None).unwrap();
            }

            assert_eq!(f.service.mark_stale_running().unwrap(), 2);
            let a = store.load("a").unwrap();
            assert_eq!(a.status, TaskStatus::PausedUser);
            assert_eq!(a.last_error.as_deref(), Some("interrupted by restart"));

            assert_eq!(f.service.resume_pending().unwrap(), 1);
            let b = wait_for_status(&f.service, "b", TaskStatus::PausedLimit).await;
            assert_eq!(b.frames_extracted, 3);
            assert!(f.upload.join("extract/b/frames/frame_000003.png").is_file());

            let page = f.service.list_tasks(0, 500, Some("http://h/")).unwrap();
            assert_eq!(page.page, 1);
            assert_eq!(page.page_size, 100);
            assert_eq!(page.total, 3);
            assert_eq!(page.items[0].task_id, "b");
            assert_eq!(page.items[0].output_dir_url.as_deref(), Some("http://h/upload/extract/b"));

            let second = f.service.list_tasks(2, 2, None).unwrap();
            assert_eq!(second.items.len(), 1);

            f.service.shutdown().await;
        }
    }
}
