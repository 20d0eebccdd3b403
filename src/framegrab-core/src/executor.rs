//! Single-run driver
//!
//! Takes one PENDING task through an extractor run: claims the row, spawns
//! ffmpeg, streams its progress into the runtime, ingests produced frames on a
//! ticker and finally classifies why the run stopped.

use crate::error::{ExtractError, Result};
use crate::flusher::FrameFlusher;
use crate::paths::PathResolver;
use crate::runtime::{Runtime, RuntimeRegistry};
use framegrab_db::{StopReason, Task, TaskStatus, TaskStore};
use framegrab_processing::{resume_start_sec, ExtractPlan, ProgressLine, ProgressParser};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Log lines persisted with a terminal status
pub const PERSISTED_LOG_LINES: usize = 50;

/// Tolerance below the duration for an end limit to count as END_SEC
const END_SEC_DURATION_MARGIN: f64 = 0.05;

/// Tolerance below the end limit for the cursor to count as having reached it
const END_SEC_CURSOR_MARGIN: f64 = 0.02;

/// Flush period used when a zero interval is configured
const FALLBACK_FLUSH_INTERVAL: Duration = Duration::from_millis(600);

/// Result of [`Executor::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Another worker owns the task or the row is no longer PENDING
    Skipped,
    Completed {
        status: TaskStatus,
        stop_reason: StopReason,
    },
}

/// How the extractor process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitState {
    Cancelled,
    Failed(String),
    Exited,
}

/// Decide the terminal status of a run from how it ended and the reloaded row
pub fn classify(exit: &ExitState, task: &Task) -> (TaskStatus, StopReason) {
    match exit {
        ExitState::Cancelled => (TaskStatus::PausedUser, StopReason::User),
        ExitState::Failed(_) => (TaskStatus::Failed, StopReason::Error),
        ExitState::Exited => {
            if task.frames_extracted >= task.max_frames_total {
                return (TaskStatus::PausedLimit, StopReason::MaxFrames);
            }
            if reached_end_limit(task) {
                return (TaskStatus::PausedLimit, StopReason::EndSec);
            }
            (TaskStatus::Finished, StopReason::Eof)
        }
    }
}

/// End limit set strictly inside the media and the cursor has reached it
fn reached_end_limit(task: &Task) -> bool {
    let (Some(end), Some(cursor)) = (task.end_limit(), task.cursor_out_time_sec) else {
        return false;
    };
    let duration = task.duration_sec.unwrap_or(0.0);
    duration > 0.0
        && end < duration - END_SEC_DURATION_MARGIN
        && cursor >= end - END_SEC_CURSOR_MARGIN
}

#[derive(Debug)]
pub struct Executor {
    store: TaskStore,
    runtimes: RuntimeRegistry,
    resolver: Arc<PathResolver>,
    ffmpeg_path: PathBuf,
    flush_interval: Duration,
}

impl Executor {
    pub fn new(
        store: TaskStore,
        runtimes: RuntimeRegistry,
        resolver: Arc<PathResolver>,
        ffmpeg_path: impl Into<PathBuf>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            runtimes,
            resolver,
            ffmpeg_path: ffmpeg_path.into(),
            // interval_at panics on a zero period
            flush_interval: if flush_interval.is_zero() {
                FALLBACK_FLUSH_INTERVAL
            } else {
                flush_interval
            },
        }
    }

    pub fn runtimes(&self) -> &RuntimeRegistry {
        &self.runtimes
    }

    /// Drive one run of `task_id`. Never leaves a claimed task RUNNING.
    pub async fn run(&self, task_id: &str) -> RunOutcome {
        let Some(guard) = self.runtimes.try_acquire(task_id) else {
            debug!(task_id, "task already live, skipping");
            return RunOutcome::Skipped;
        };

        match self.store.claim_pending(task_id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(task_id, "task is not pending, skipping");
                return RunOutcome::Skipped;
            }
            Err(e) => {
                error!(task_id, "failed to claim task: {}", e);
                return RunOutcome::Skipped;
            }
        }

        match self.drive(guard.runtime(), task_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = e.to_string();
                error!(task_id, "run failed: {}", message);
                guard.append_log(&message);
                let logs = persisted_logs(&guard).unwrap_or(None);
                if let Err(e) = self.store.update_status(
                    task_id,
                    TaskStatus::Failed,
                    Some(StopReason::Error),
                    Some(&message),
                    logs.as_deref(),
                ) {
                    error!(task_id, "failed to record run failure: {}", e);
                }
                RunOutcome::Completed {
                    status: TaskStatus::Failed,
                    stop_reason: StopReason::Error,
                }
            }
        }
    }

    async fn drive(&self, runtime: &Arc<Runtime>, task_id: &str) -> Result<RunOutcome> {
        let task = self.store.load(task_id)?;
        let start_sec = resume_start_sec(task.start_sec, task.cursor_out_time_sec);

        if let Some(end) = task.end_limit() {
            if start_sec >= end {
                runtime.append_log(&format!(
                    "start {:.3}s is past the end limit {:.3}s",
                    start_sec, end
                ));
                return self.finish(
                    runtime,
                    task_id,
                    TaskStatus::PausedLimit,
                    StopReason::EndSec,
                    None,
                );
            }
        }

        let frames_remaining = task.max_frames_total - task.frames_extracted;
        if frames_remaining <= 0 {
            runtime.append_log(&format!("frame limit {} already reached", task.max_frames_total));
            return self.finish(
                runtime,
                task_id,
                TaskStatus::PausedLimit,
                StopReason::MaxFrames,
                None,
            );
        }

        let frames_dir = self
            .resolver
            .upload_abs_path(&task.output_dir_local_path)?
            .join("frames");
        tokio::fs::create_dir_all(&frames_dir)
            .await
            .map_err(|e| {
                ExtractError::Internal(format!("failed to create {:?}: {}", frames_dir, e))
            })?;

        let plan = ExtractPlan {
            input: PathBuf::from(&task.input_abs_path),
            frames_dir: frames_dir.clone(),
            start_sec,
            end_sec: task.end_limit(),
            mode: task.mode,
            keyframe_mode: task.keyframe_mode,
            scene_threshold: task.scene_threshold,
            fps: task.fps,
            frames_remaining,
            output_format: task.output_format,
            jpg_quality: task.jpg_quality,
            start_number: task.frames_extracted + 1,
        };
        let args = plan.to_args();
        debug!(task_id, "ffmpeg args: {:?}", args);

        let mut child = match Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start ffmpeg: {}", e);
                runtime.append_log(&message);
                return self.finish(
                    runtime,
                    task_id,
                    TaskStatus::Failed,
                    StopReason::Error,
                    Some(&message),
                );
            }
        };

        info!(
            task_id,
            start_sec,
            frames_remaining,
            start_number = plan.start_number,
            "extractor started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractError::internal("extractor stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractError::internal("extractor stderr was not captured"))?;

        let stdout_reader = tokio::spawn(read_progress(
            stdout,
            runtime.clone(),
            self.store.clone(),
            task_id.to_string(),
            start_sec,
        ));
        let stderr_reader = tokio::spawn(read_stderr(stderr, runtime.clone()));

        let mut flusher = FrameFlusher::new(
            task_id,
            frames_dir,
            &task.output_dir_local_path,
            task.output_format,
            task.frames_extracted + 1,
        );

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut kill_sent = false;

        let wait_result = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = runtime.cancelled(), if !kill_sent => {
                    info!(task_id, "cancel requested, stopping extractor");
                    flusher.flush(&self.store);
                    if let Err(e) = child.start_kill() {
                        warn!(task_id, "failed to kill extractor: {}", e);
                    }
                    kill_sent = true;
                }
                _ = ticker.tick() => {
                    flusher.flush(&self.store);
                }
            }
        };

        // readers end once the pipes close
        if let Err(e) = stdout_reader.await {
            warn!(task_id, "progress reader failed: {}", e);
        }
        let last_stderr = match stderr_reader.await {
            Ok(line) => line,
            Err(e) => {
                warn!(task_id, "stderr reader failed: {}", e);
                None
            }
        };

        flusher.flush(&self.store);

        let exit = if runtime.is_cancelled() {
            ExitState::Cancelled
        } else {
            match wait_result {
                Ok(status) if status.success() => ExitState::Exited,
                Ok(status) => ExitState::Failed(
                    last_stderr.unwrap_or_else(|| format!("ffmpeg exited with {}", status)),
                ),
                Err(e) => ExitState::Failed(
                    last_stderr.unwrap_or_else(|| format!("failed to wait for ffmpeg: {}", e)),
                ),
            }
        };

        let task = self.store.load(task_id)?;
        let (status, stop_reason) = classify(&exit, &task);
        let last_error = match &exit {
            ExitState::Failed(message) => Some(message.as_str()),
            _ => None,
        };
        self.finish(runtime, task_id, status, stop_reason, last_error)
    }

    fn finish(
        &self,
        runtime: &Runtime,
        task_id: &str,
        status: TaskStatus,
        stop_reason: StopReason,
        last_error: Option<&str>,
    ) -> Result<RunOutcome> {
        let logs = persisted_logs(runtime)?;
        self.store
            .update_status(task_id, status, Some(stop_reason), last_error, logs.as_deref())?;

        info!(task_id, %status, %stop_reason, "run finished");
        Ok(RunOutcome::Completed { status, stop_reason })
    }
}

/// Newest log lines as a JSON array, None when there are none
fn persisted_logs(runtime: &Runtime) -> Result<Option<String>> {
    let logs = runtime.snapshot(PERSISTED_LOG_LINES).logs;
    if logs.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(&logs)
        .map(Some)
        .map_err(ExtractError::internal)
}

async fn read_progress<R>(
    stdout: R,
    runtime: Arc<Runtime>,
    store: TaskStore,
    task_id: String,
    start_sec: f64,
) where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stdout).split(b'\n');
    let mut parser = ProgressParser::new();

    loop {
        match segments.next_segment().await {
            Ok(Some(raw)) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches('\r');
                runtime.append_log(line);
                if let ProgressLine::Snapshot(snapshot) = parser.feed(line) {
                    runtime.set_progress(snapshot.frame, snapshot.out_time_ms, &snapshot.speed);
                    if let Some(cursor) = snapshot.cursor_sec(start_sec) {
                        if let Err(e) = store.update_cursor(&task_id, cursor) {
                            warn!(task_id = %task_id, "failed to update cursor: {}", e);
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(task_id = %task_id, "failed to read extractor stdout: {}", e);
                break;
            }
        }
    }
}

/// Copy stderr into the log ring; returns the last non-empty line.
///
/// Reads raw bytes until EOF so undecodable metadata never closes the pipe
/// under a running extractor.
async fn read_stderr<R>(stderr: R, runtime: Arc<Runtime>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(stderr).split(b'\n');
    let mut last = None;

    loop {
        let raw = match segments.next_segment().await {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                warn!("failed to read extractor stderr: {}", e);
                break;
            }
        };
        let line = String::from_utf8_lossy(&raw);
        // ffmpeg rewrites its stats line with carriage returns
        for part in line.split('\r') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            runtime.append_log(part);
            last = Some(part.to_string());
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use framegrab_db::{ExtractMode, NewTask, OutputFormat, SourceType, TaskLimits};

    fn sample_task() -> Task {
        Task {
            task_id: "t1".to_string(),
            user_id: None,
            source_type: SourceType::Upload,
            source_ref: "/in.mp4".to_string(),
            input_abs_path: "/data/in.mp4".to_string(),
            output_dir_local_path: "/extract/t1".to_string(),
            output_format: OutputFormat::Jpg,
            jpg_quality: None,
            mode: ExtractMode::All,
            keyframe_mode: None,
            fps: None,
            scene_threshold: None,
            start_sec: None,
            end_sec: None,
            max_frames_total: 10,
            frames_extracted: 3,
            video_width: 640,
            video_height: 480,
            duration_sec: Some(10.0),
            cursor_out_time_sec: Some(2.0),
            status: TaskStatus::Running,
            stop_reason: None,
            last_error: None,
            last_logs: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_classify_order() {
        let mut task = sample_task();
        task.frames_extracted = 10;

        assert_eq!(
            classify(&ExitState::Cancelled, &task),
            (TaskStatus::PausedUser, StopReason::User)
        );
        assert_eq!(
            classify(&ExitState::Failed("boom".into()), &task),
            (TaskStatus::Failed, StopReason::Error)
        );
        assert_eq!(
            classify(&ExitState::Exited, &task),
            (TaskStatus::PausedLimit, StopReason::MaxFrames)
        );

        task.frames_extracted = 3;
        assert_eq!(classify(&ExitState::Exited, &task), (TaskStatus::Finished, StopReason::Eof));
    }

    #[test]
    fn test_classify_end_sec() {
        let mut task = sample_task();
        task.end_sec = Some(3.0);
        task.cursor_out_time_sec = Some(2.985);
        assert_eq!(
            classify(&ExitState::Exited, &task),
            (TaskStatus::PausedLimit, StopReason::EndSec)
        );

        // cursor short of the limit
        task.cursor_out_time_sec = Some(2.9);
        assert_eq!(classify(&ExitState::Exited, &task), (TaskStatus::Finished, StopReason::Eof));

        // end within 50ms of the duration counts as EOF
        task.cursor_out_time_sec = Some(9.97);
        task.end_sec = Some(9.97);
        assert_eq!(classify(&ExitState::Exited, &task), (TaskStatus::Finished, StopReason::Eof));

        // unknown duration never reports END_SEC
        task.end_sec = Some(3.0);
        task.cursor_out_time_sec = Some(3.0);
        task.duration_sec = None;
        assert_eq!(classify(&ExitState::Exited, &task), (TaskStatus::Finished, StopReason::Eof));
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        /// Fake extractor: writes up to `available` frames honoring `-frames:v` and `-start_number`
        fn eof_script(available: u32) -> String {
            format!(
                r#"#!/bin/sh
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
count={available}
if [ "$limit" -lt "$count" ]; then count=$limit; fi
i=0
while [ "$i" -lt "$count" ]; do
  seq=$((start + i))
  i=$((i + 1))
  : > "$(printf "$pattern" "$seq")"
  echo "frame=$i"
  echo "out_time_ms=$((i * 500000))"
  echo "speed=2.0x"
  echo "progress=continue"
done
echo "progress=end"
exit 0
"#
            )
        }

        const SLOW_SCRIPT: &str = r#"#!/bin/sh
for arg in "$@"; do pattern=$arg; done
: > "$(printf "$pattern" 1)"
echo "frame=1"
echo "out_time_ms=400000"
echo "progress=continue"
exec sleep 30
"#;

        const FAILING_SCRIPT: &str = r#"#!/bin/sh
echo "Input #0, mov,mp4" >&2
echo "boom: invalid data found when processing input" >&2
exit 1
"#;

        const LEGACY_STDERR_SCRIPT: &str = r#"#!/bin/sh
printf 'title: \377\376 legacy tag\n' >&2
echo "moov atom not found" >&2
exit 1
"#;

        /// Undecodable byte followed by far more stderr than a pipe buffer holds
        const CHATTY_STDERR_SCRIPT: &str = r#"#!/bin/sh
printf '\377\n' >&2
i=0
while [ "$i" -lt 3000 ]; do
  echo "frame=$i fps=25 q=2.0 size=N/A time=00:00:01.00 bitrate=N/A speed=1x" >&2
  i=$((i + 1))
done
exit 0
"#;

        struct Harness {
            _dir: tempfile::TempDir,
            upload: PathBuf,
            store: TaskStore,
            runtimes: RuntimeRegistry,
            executor: Arc<Executor>,
        }

        fn write_script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-ffmpeg.sh");
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn harness(script: Option<&str>) -> Harness {
            harness_with_interval(script, Duration::from_millis(50))
        }

        fn harness_with_interval(script: Option<&str>, flush_interval: Duration) -> Harness {
            let dir = tempfile::tempdir().unwrap();
            let upload = dir.path().join("upload");
            std::fs::create_dir_all(&upload).unwrap();

            let ffmpeg = match script {
                Some(body) => write_script(dir.path(), body),
                None => dir.path().join("missing-ffmpeg"),
            };

            let store = TaskStore::open_in_memory().unwrap();
            let runtimes = RuntimeRegistry::new();
            let resolver = Arc::new(PathResolver::new(
                &upload,
                dir.path().join("tmp"),
                dir.path().join("lsp"),
            ));
            let executor = Arc::new(Executor::new(
                store.clone(),
                runtimes.clone(),
                resolver,
                ffmpeg,
                flush_interval,
            ));

            Harness {
                _dir: dir,
                upload,
                store,
                runtimes,
                executor,
            }
        }

        fn insert_task(store: &TaskStore, id: &str, max_frames: i64) {
            store
                .insert(&NewTask {
                    task_id: id.to_string(),
                    user_id: None,
                    source_type: SourceType::Upload,
                    source_ref: "/videos/in.mp4".to_string(),
                    input_abs_path: "/videos/in.mp4".to_string(),
                    output_dir_local_path: format!("/extract/{}", id),
                    output_format: OutputFormat::Jpg,
                    jpg_quality: Some(2),
                    mode: ExtractMode::All,
                    keyframe_mode: None,
                    fps: None,
                    scene_threshold: None,
                    start_sec: None,
                    end_sec: None,
                    max_frames_total: max_frames,
                    video_width: 640,
                    video_height: 480,
                    duration_sec: Some(10.0),
                })
                .unwrap();
        }

        #[tokio::test]
        async fn test_run_stops_at_max_frames_and_resumes() {
            let h = harness(Some(&eof_script(20)));
            insert_task(&h.store, "t1", 2);

            let outcome = h.executor.run("t1").await;
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::PausedLimit,
                    stop_reason: StopReason::MaxFrames
                }
            );

            let task = h.store.load("t1").unwrap();
            assert_eq!(task.frames_extracted, 2);
            assert_eq!(task.cursor_out_time_sec, Some(1.0));
            assert!(!task.last_log_lines().is_empty());

            let frames = h.store.list_frames("t1", 0, 10).unwrap().frames;
            assert_eq!(frames.len(), 2);
            assert_eq!(frames[0].rel_path, "/extract/t1/frames/frame_000001.jpg");
            assert_eq!(frames[1].rel_path, "/extract/t1/frames/frame_000002.jpg");
            assert!(h.runtimes.is_empty());

            let limits = TaskLimits {
                end_sec: None,
                max_frames_total: Some(4),
            };
            assert!(h.store.reset_for_continue("t1", &limits).unwrap());

            let outcome = h.executor.run("t1").await;
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::PausedLimit,
                    stop_reason: StopReason::MaxFrames
                }
            );

            let task = h.store.load("t1").unwrap();
            assert_eq!(task.frames_extracted, 4);
            assert!(task.cursor_out_time_sec.unwrap() > 1.0);
            assert!(h.upload.join("extract/t1/frames/frame_000003.jpg").is_file());
            assert!(h.upload.join("extract/t1/frames/frame_000004.jpg").is_file());
            assert!(!h.upload.join("extract/t1/frames/frame_000005.jpg").exists());

            let seqs: Vec<i64> = h
                .store
                .list_frames("t1", 0, 10)
                .unwrap()
                .frames
                .iter()
                .map(|f| f.seq)
                .collect();
            assert_eq!(seqs, vec![1, 2, 3, 4]);
        }

        #[tokio::test]
        async fn test_run_finishes_at_eof() {
            let h = harness(Some(&eof_script(5)));
            insert_task(&h.store, "t1", 100);

            let outcome = h.executor.run("t1").await;
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::Finished,
                    stop_reason: StopReason::Eof
                }
            );

            let task = h.store.load("t1").unwrap();
            assert_eq!(task.status, TaskStatus::Finished);
            assert_eq!(task.stop_reason, Some(StopReason::Eof));
            assert_eq!(task.frames_extracted, 5);
            assert_eq!(task.last_error, None);
        }

        #[tokio::test]
        async fn test_run_failure_records_last_stderr_line() {
            let h = harness(Some(FAILING_SCRIPT));
            insert_task(&h.store, "t1", 10);

            let outcome = h.executor.run("t1").await;
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::Failed,
                    stop_reason: StopReason::Error
                }
            );

            let task = h.store.load("t1").unwrap();
            assert_eq!(
                task.last_error.as_deref(),
                Some("boom: invalid data found when processing input")
            );
            assert!(task
                .last_log_lines()
                .iter()
                .any(|l| l.starts_with("Input #0")));
        }

        #[tokio::test]
        async fn test_undecodable_stderr_keeps_last_line() {
            let h = harness(Some(LEGACY_STDERR_SCRIPT));
            insert_task(&h.store, "t1", 10);

            h.executor.run("t1").await;

            let task = h.store.load("t1").unwrap();
            assert_eq!(task.status, TaskStatus::Failed);
            assert_eq!(task.last_error.as_deref(), Some("moov atom not found"));
            let logs = task.last_log_lines();
            assert!(logs.iter().any(|l| l.starts_with("title: ")));
            assert_eq!(logs.last().map(String::as_str), Some("moov atom not found"));
        }

        #[tokio::test]
        async fn test_stderr_drained_after_undecodable_bytes() {
            let h = harness(Some(CHATTY_STDERR_SCRIPT));
            insert_task(&h.store, "t1", 10);

            let outcome = h.executor.run("t1").await;
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::Finished,
                    stop_reason: StopReason::Eof
                }
            );
            let task = h.store.load("t1").unwrap();
            assert_eq!(task.last_error, None);
            assert!(task.last_log_lines().iter().any(|l| l.starts_with("frame=2999 ")));
        }

        #[tokio::test]
        async fn test_zero_flush_interval_falls_back() {
            let h = harness_with_interval(Some(&eof_script(3)), Duration::ZERO);
            insert_task(&h.store, "t1", 100);

            let outcome = h.executor.run("t1").await;
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::Finished,
                    stop_reason: StopReason::Eof
                }
            );
            assert_eq!(h.store.load("t1").unwrap().frames_extracted, 3);
        }

        #[tokio::test]
        async fn test_spawn_failure_marks_failed() {
            let h = harness(None);
            insert_task(&h.store, "t1", 10);

            let outcome = h.executor.run("t1").await;
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::Failed,
                    stop_reason: StopReason::Error
                }
            );
            let task = h.store.load("t1").unwrap();
            assert!(task.last_error.unwrap().starts_with("failed to start ffmpeg"));
        }

        #[tokio::test]
        async fn test_cancel_pauses_and_keeps_frames() {
            let h = harness(Some(SLOW_SCRIPT));
            insert_task(&h.store, "t1", 100);

            let executor = h.executor.clone();
            let run = tokio::spawn(async move { executor.run("t1").await });

            let deadline = Instant::now() + Duration::from_secs(10);
            while h.store.load("t1").unwrap().frames_extracted < 1 {
                assert!(Instant::now() < deadline, "no frame ingested");
                tokio::time::sleep(Duration::from_millis(20)).await;
            }

            assert!(h.runtimes.cancel("t1"));
            assert!(h.runtimes.cancel("t1"));

            let outcome = tokio::time::timeout(Duration::from_secs(10), run)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                outcome,
                RunOutcome::Completed {
                    status: TaskStatus::PausedUser,
                    stop_reason: StopReason::User
                }
            );

            let task = h.store.load("t1").unwrap();
            assert_eq!(task.frames_extracted, 1);
            assert_eq!(task.stop_reason, Some(StopReason::User));
            assert!(!h.runtimes.contains("t1"));
        }

        #[tokio::test]
        async fn test_limits_short_circuit_without_spawning() {
            // a missing binary proves nothing is spawned
            let h = harness(None);

            insert_task(&h.store, "full", 1);
            h.store.upsert_frame("full", 1, "/extract/full/frames/frame_000001.jpg").unwrap();
            assert_eq!(
                h.executor.run("full").await,
                RunOutcome::Completed {
                    status: TaskStatus::PausedLimit,
                    stop_reason: StopReason::MaxFrames
                }
            );

            insert_task(&h.store, "ended", 10);
            let limits = TaskLimits {
                end_sec: Some(3.0),
                max_frames_total: None,
            };
            h.store.reset_for_continue("ended", &limits).unwrap();
            h.store.update_cursor("ended", 3.0).unwrap();
            assert_eq!(
                h.executor.run("ended").await,
                RunOutcome::Completed {
                    status: TaskStatus::PausedLimit,
                    stop_reason: StopReason::EndSec
                }
            );
            assert_eq!(h.store.load("ended").unwrap().status, TaskStatus::PausedLimit);
        }

        #[tokio::test]
        async fn test_run_skips_live_or_non_pending_tasks() {
            let h = harness(None);
            insert_task(&h.store, "t1", 10);

            let guard = h.runtimes.try_acquire("t1").unwrap();
            assert_eq!(h.executor.run("t1").await, RunOutcome::Skipped);
            drop(guard);

            h.store
                .update_status("t1", TaskStatus::PausedUser, Some(StopReason::User), None, None)
                .unwrap();
            assert_eq!(h.executor.run("t1").await, RunOutcome::Skipped);
            assert_eq!(h.store.load("t1").unwrap().status, TaskStatus::PausedUser);

            assert_eq!(h.executor.run("missing").await, RunOutcome::Skipped);
        }
    }
}
