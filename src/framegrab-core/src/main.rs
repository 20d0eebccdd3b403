//! Framegrab - resumable video frame extraction CLI
//!
//! One-shot commands create, inspect and control extraction tasks; `run`
//! keeps a worker pool alive that picks up every PENDING task.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use framegrab_core::colored_logger::{init_logger, Component};
use framegrab_core::{
    Config, ContinueTaskRequest, CreateTaskRequest, ExtractService, PathResolver,
    ShardedContentResolver,
};
use framegrab_db::{Database, TaskStatus, TaskStore};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Poll period while following a task in the foreground
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

/// Heartbeat period of the worker process
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "framegrab")]
#[command(about = "Resumable video frame extraction driven by ffmpeg")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Plain log output without colors
    #[arg(long, global = true)]
    plain: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check dependencies (ffmpeg, ffprobe)
    Check,

    /// Probe a source video without creating a task
    Probe {
        /// Path of an uploaded file (relative to the upload root)
        #[arg(long, conflicts_with = "hash", required_unless_present = "hash")]
        local_path: Option<String>,

        /// Content hash (32 hex characters) of a file in the content store
        #[arg(long)]
        hash: Option<String>,
    },

    /// Create a task and follow it until it stops
    Create(CreateArgs),

    /// Raise the limits of a stopped task and follow it again
    Continue {
        task_id: String,

        /// New absolute end time in seconds (0 removes the limit)
        #[arg(long)]
        end_sec: Option<f64>,

        /// New total frame limit
        #[arg(long)]
        max_frames: Option<i64>,
    },

    /// Cancel a task and mark it paused
    Cancel { task_id: String },

    /// Delete a task and its frame index
    Delete {
        task_id: String,

        /// Also remove the extracted frames from disk
        #[arg(long)]
        delete_files: bool,
    },

    /// List tasks, most recently updated first
    List {
        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        page_size: u32,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one task with a page of frames as JSON
    Show {
        task_id: String,

        /// Return frames after this sequence number
        #[arg(long, default_value = "0")]
        cursor: i64,

        /// Frames per page (0 uses the configured default)
        #[arg(long, default_value = "0")]
        limit: i64,
    },

    /// Run the worker pool until Ctrl+C
    Run {
        /// Mark RUNNING tasks left by a previous process as paused first
        #[arg(long)]
        recover: bool,

        /// Seconds between sweeps for new PENDING tasks
        #[arg(long, default_value = "5")]
        poll_secs: u64,
    },
}

#[derive(Args)]
struct CreateArgs {
    /// Path of an uploaded file (relative to the upload root)
    #[arg(long, conflicts_with = "hash", required_unless_present = "hash")]
    local_path: Option<String>,

    /// Content hash (32 hex characters) of a file in the content store
    #[arg(long)]
    hash: Option<String>,

    /// Sampling mode: keyframe, fps or all
    #[arg(long, default_value = "all")]
    mode: String,

    /// Keyframe selection: iframe or scene
    #[arg(long)]
    keyframe_mode: Option<String>,

    /// Scene-change threshold in [0, 1]
    #[arg(long)]
    scene_threshold: Option<f64>,

    /// Frames per second for fps mode
    #[arg(long)]
    fps: Option<f64>,

    #[arg(long)]
    start_sec: Option<f64>,

    #[arg(long)]
    end_sec: Option<f64>,

    /// Maximum number of frames to extract
    #[arg(long)]
    max_frames: i64,

    /// Output format: jpg or png
    #[arg(long)]
    format: Option<String>,

    /// JPEG quality, 1 (best) to 31
    #[arg(long)]
    quality: Option<i64>,

    #[arg(long)]
    user_id: Option<String>,
}

impl CreateArgs {
    fn into_request(self) -> CreateTaskRequest {
        let source_type = if self.hash.is_some() { "contentHash" } else { "upload" };
        CreateTaskRequest {
            user_id: self.user_id,
            source_type: source_type.to_string(),
            local_path: self.local_path,
            md5: self.hash,
            mode: self.mode,
            keyframe_mode: self.keyframe_mode,
            scene_threshold: self.scene_threshold,
            fps: self.fps,
            start_sec: self.start_sec,
            end_sec: self.end_sec,
            max_frames: self.max_frames,
            output_format: self.format,
            jpg_quality: self.quality,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let component = match cli.command {
        Commands::Run { .. } => Component::Worker,
        _ => Component::Cli,
    };
    init_logger(component, cli.verbose, cli.plain)?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Check => cmd_check(&config),
        Commands::Probe { local_path, hash } => cmd_probe(config, local_path, hash),
        Commands::Create(args) => cmd_create(config, args),
        Commands::Continue {
            task_id,
            end_sec,
            max_frames,
        } => cmd_continue(config, task_id, end_sec, max_frames),
        Commands::Cancel { task_id } => cmd_cancel(config, task_id),
        Commands::Delete {
            task_id,
            delete_files,
        } => cmd_delete(config, task_id, delete_files),
        Commands::List {
            page,
            page_size,
            json,
        } => cmd_list(config, page, page_size, json),
        Commands::Show {
            task_id,
            cursor,
            limit,
        } => cmd_show(config, task_id, cursor, limit),
        Commands::Run { recover, poll_secs } => cmd_run(config, recover, poll_secs),
    }
}

fn open_store(config: &Config) -> Result<TaskStore> {
    let db_path = config.storage.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory {:?}", parent))?;
    }
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database {:?}", db_path))?;
    Ok(TaskStore::new(db))
}

fn build_resolver(config: &Config) -> PathResolver {
    let content_root = config.storage.content_store_root();
    PathResolver::new(
        config.storage.upload_root(),
        config.storage.temp_inputs_root(),
        content_root.clone(),
    )
    .with_content_resolver(Arc::new(ShardedContentResolver::new(content_root)))
}

/// Open the store and start the worker pool (inside a tokio runtime)
fn start_service(config: &Config) -> Result<ExtractService> {
    let upload_root = config.storage.upload_root();
    std::fs::create_dir_all(&upload_root)
        .with_context(|| format!("failed to create upload root {:?}", upload_root))?;

    let store = open_store(config)?;
    Ok(ExtractService::start(config, store, build_resolver(config)))
}

fn cmd_check(config: &Config) -> Result<()> {
    println!("checking dependencies...\n");

    let ffmpeg = framegrab_processing::tool_version(&config.ffmpeg.ffmpeg_path);
    let ffprobe = framegrab_processing::tool_version(&config.ffmpeg.ffprobe_path);

    for (name, path, version) in [
        ("ffmpeg", &config.ffmpeg.ffmpeg_path, &ffmpeg),
        ("ffprobe", &config.ffmpeg.ffprobe_path, &ffprobe),
    ] {
        match version {
            Some(v) => println!("  {:8} OK ({})", format!("{}:", name), v),
            None => println!("  {:8} NOT FOUND ({:?})", format!("{}:", name), path),
        }
    }

    println!("  database: {:?}", config.storage.database_path());
    println!("  uploads:  {:?}", config.storage.upload_root());
    println!();

    if ffmpeg.is_none() || ffprobe.is_none() {
        println!("WARNING: ffmpeg and ffprobe are required for frame extraction.");
        println!("Install FFmpeg or set FFMPEG_PATH / FFPROBE_PATH.");
        return Err(anyhow::anyhow!("missing dependencies"));
    }

    println!("all checks passed!");
    Ok(())
}

#[tokio::main]
async fn cmd_probe(config: Config, local_path: Option<String>, hash: Option<String>) -> Result<()> {
    let service = start_service(&config)?;
    let source_type = if hash.is_some() { "contentHash" } else { "upload" };

    let result = service
        .probe_source(source_type, local_path.as_deref(), hash.as_deref())
        .await;
    service.shutdown().await;

    let probe = result?;
    println!("{}", serde_json::to_string_pretty(&probe)?);
    Ok(())
}

#[tokio::main]
async fn cmd_create(config: Config, args: CreateArgs) -> Result<()> {
    let service = start_service(&config)?;

    let created = match service.create_task(args.into_request()).await {
        Ok(created) => created,
        Err(e) => {
            service.shutdown().await;
            return Err(e.into());
        }
    };

    info!(
        task_id = %created.task_id,
        "probed {}x{}, {:.2}s at {:.2} fps",
        created.probe.width,
        created.probe.height,
        created.probe.duration_sec,
        created.probe.avg_fps
    );
    println!("{}", created.task_id);

    let result = follow(&service, &created.task_id).await;
    service.shutdown().await;
    result
}

#[tokio::main]
async fn cmd_continue(
    config: Config,
    task_id: String,
    end_sec: Option<f64>,
    max_frames: Option<i64>,
) -> Result<()> {
    let service = start_service(&config)?;

    let request = ContinueTaskRequest {
        task_id: task_id.clone(),
        end_sec,
        max_frames,
    };
    if let Err(e) = service.continue_task(&request) {
        service.shutdown().await;
        return Err(e.into());
    }

    let result = follow(&service, &task_id).await;
    service.shutdown().await;
    result
}

/// Report progress until the task stops; Ctrl+C cancels it and marks it paused
async fn follow(service: &ExtractService, task_id: &str) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || {
        warn!("received interrupt, pausing task...");
        flag.store(true, Ordering::SeqCst);
    })?;

    let mut last_frames = -1;
    let mut cancel_sent = false;

    loop {
        if interrupted.load(Ordering::SeqCst) && !cancel_sent {
            service.cancel_and_mark(task_id)?;
            cancel_sent = true;
        }

        let detail = service.get_task_detail(task_id, 0, 1, None)?;
        let task = &detail.task;
        let live = service.runtimes().contains(task_id);

        if task.frames_extracted != last_frames {
            last_frames = task.frames_extracted;
            let speed = task
                .runtime
                .as_ref()
                .and_then(|rt| rt.speed.clone())
                .unwrap_or_else(|| "-".to_string());
            info!(
                task_id,
                "{}/{} frames, cursor {:.2}s, speed {}",
                task.frames_extracted,
                task.max_frames_total,
                task.cursor_out_time_sec.unwrap_or(0.0),
                speed
            );
        }

        let settled = !matches!(
            task.status,
            TaskStatus::Pending | TaskStatus::Preparing | TaskStatus::Running
        );
        if !live && (settled || cancel_sent) {
            let task = service.store().load(task_id)?;
            let reason = task.stop_reason.map(|r| r.to_string()).unwrap_or_default();
            match task.status {
                TaskStatus::Failed => error!(
                    task_id,
                    "task failed: {}",
                    task.last_error.as_deref().unwrap_or("unknown error")
                ),
                status => info!(
                    task_id,
                    "task stopped: {} ({}), {} frames",
                    status,
                    reason,
                    task.frames_extracted
                ),
            }
            return Ok(());
        }

        tokio::time::sleep(FOLLOW_INTERVAL).await;
    }
}

#[tokio::main]
async fn cmd_cancel(config: Config, task_id: String) -> Result<()> {
    let service = start_service(&config)?;
    let result = service.cancel_and_mark(&task_id);
    service.shutdown().await;

    result?;
    println!("task {} paused", task_id.trim());
    Ok(())
}

#[tokio::main]
async fn cmd_delete(config: Config, task_id: String, delete_files: bool) -> Result<()> {
    let service = start_service(&config)?;
    let result = service.delete_task(&task_id, delete_files).await;
    service.shutdown().await;

    result?;
    println!("task {} deleted", task_id.trim());
    Ok(())
}

fn cmd_list(config: Config, page: u32, page_size: u32, json: bool) -> Result<()> {
    let store = open_store(&config)?;
    let page = page.max(1);
    let page_size = page_size.clamp(1, framegrab_db::MAX_TASK_PAGE_SIZE);
    let (tasks, total) = store.list_tasks(page, page_size)?;

    if json {
        let items: Vec<_> = tasks
            .into_iter()
            .map(|task| framegrab_core::TaskView::new(task, None, None))
            .collect();
        let page = framegrab_core::TaskPage {
            items,
            total,
            page,
            page_size,
        };
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("no tasks found");
        return Ok(());
    }

    println!("found {} task(s), page {}:\n", total, page);
    println!(
        "  {:36}  {:12}  {:>11}  {:10}  SOURCE",
        "TASK ID", "STATUS", "FRAMES", "REASON"
    );
    for task in &tasks {
        println!(
            "  {:36}  {:12}  {:>11}  {:10}  {}",
            task.task_id,
            task.status.as_str(),
            format!("{}/{}", task.frames_extracted, task.max_frames_total),
            task.stop_reason.map(|r| r.as_str()).unwrap_or("-"),
            task.source_ref
        );
    }

    Ok(())
}

#[tokio::main]
async fn cmd_show(config: Config, task_id: String, cursor: i64, limit: i64) -> Result<()> {
    let service = start_service(&config)?;
    let result = service.get_task_detail(&task_id, cursor, limit, None);
    service.shutdown().await;

    let detail = result?;
    println!("{}", serde_json::to_string_pretty(&detail)?);
    Ok(())
}

#[tokio::main]
async fn cmd_run(config: Config, recover: bool, poll_secs: u64) -> Result<()> {
    info!("starting framegrab worker");
    info!("database: {:?}", config.storage.database_path());
    info!("upload root: {:?}", config.storage.upload_root());
    info!(
        "workers: {}, queue size: {}",
        config.extract.workers, config.extract.queue_size
    );

    if !framegrab_processing::check_ffmpeg(&config.ffmpeg.ffmpeg_path) {
        warn!("ffmpeg not found at {:?}, runs will fail", config.ffmpeg.ffmpeg_path);
    }
    if !framegrab_processing::check_ffprobe(&config.ffmpeg.ffprobe_path) {
        warn!("ffprobe not found at {:?}, task creation will fail", config.ffmpeg.ffprobe_path);
    }

    let service = start_service(&config)?;

    if recover {
        let marked = service.mark_stale_running()?;
        info!("marked {} interrupted task(s) as paused", marked);
    }
    service.resume_pending()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let poll_interval = Duration::from_secs(poll_secs.max(1));
    let mut last_poll = Instant::now();
    let mut last_heartbeat = Instant::now();

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(250)).await;

        // tasks created by other processes; duplicates are skipped at claim time
        if last_poll.elapsed() >= poll_interval {
            last_poll = Instant::now();
            if service.queue_len() == 0 {
                if let Err(e) = service.resume_pending() {
                    error!("pending sweep failed: {}", e);
                }
            }
        }

        if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
            last_heartbeat = Instant::now();
            info!(
                live = service.runtimes().len(),
                queued = service.queue_len(),
                "heartbeat"
            );
        }
    }

    service.shutdown().await;
    info!("worker stopped");
    Ok(())
}
