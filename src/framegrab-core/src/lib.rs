//! Framegrab Core Library
//!
//! Durable, resumable video frame extraction: source resolution, the worker
//! pool driving ffmpeg, frame ingestion and the task operations front ends use.

pub mod colored_logger;
pub mod config;
pub mod error;
pub mod executor;
pub mod flusher;
pub mod paths;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod views;

pub use config::Config;
pub use error::{ErrorKind, ExtractError, PathError, Result};
pub use executor::{Executor, RunOutcome};
pub use paths::{ContentResolver, PathResolver, ShardedContentResolver};
pub use runtime::{RuntimeRegistry, RuntimeView};
pub use scheduler::Scheduler;
pub use service::{ContinueTaskRequest, CreateTaskRequest, ExtractService};
pub use views::{CreateTaskResponse, FrameItem, FramesPage, TaskDetail, TaskPage, TaskView};
