//! framegrab-processing - ffmpeg/ffprobe plumbing for Framegrab
//!
//! Probes input videos, composes extractor argument lists and parses the
//! extractor's progress stream.

pub mod args;
pub mod probe;
pub mod progress;
pub mod tools;

pub use args::{frame_file_name, resume_start_sec, ExtractPlan};
pub use probe::{probe_video, ProbeError, ProbeResult, DEFAULT_PROBE_TIMEOUT};
pub use progress::{ProgressLine, ProgressParser, ProgressSnapshot};
pub use tools::{check_ffmpeg, check_ffprobe, tool_version};
