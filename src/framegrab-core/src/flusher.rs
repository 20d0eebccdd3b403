//! Frame ingestion
//!
//! ffmpeg writes `frame_%06d.<ext>` files in sequence. The flusher walks the
//! sequence from the next expected number and records every file that exists,
//! stopping at the first gap.

use framegrab_db::{OutputFormat, TaskStore};
use framegrab_processing::frame_file_name;
use std::path::PathBuf;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FrameFlusher {
    task_id: String,
    frames_dir: PathBuf,
    /// Local path of the frames directory under the upload root, e.g. `/extract/<id>/frames`
    frames_local_dir: String,
    format: OutputFormat,
    next_seq: i64,
}

impl FrameFlusher {
    pub fn new(
        task_id: &str,
        frames_dir: PathBuf,
        output_dir_local_path: &str,
        format: OutputFormat,
        first_seq: i64,
    ) -> Self {
        let base = output_dir_local_path.trim_end_matches('/');
        Self {
            task_id: task_id.to_string(),
            frames_dir,
            frames_local_dir: format!("{}/frames", base),
            format,
            next_seq: first_seq.max(1),
        }
    }

    /// Sequence number the next discovered file will get
    pub fn next_seq(&self) -> i64 {
        self.next_seq
    }

    /// Record every consecutive file present on disk; returns how many were recorded
    pub fn flush(&mut self, store: &TaskStore) -> usize {
        let mut recorded = 0;
        loop {
            let name = frame_file_name(self.next_seq, self.format);
            if !self.frames_dir.join(&name).is_file() {
                break;
            }

            let rel_path = format!("{}/{}", self.frames_local_dir, name);
            if let Err(e) = store.upsert_frame(&self.task_id, self.next_seq, &rel_path) {
                warn!(
                    task_id = %self.task_id,
                    seq = self.next_seq,
                    "failed to record frame: {}",
                    e
                );
                break;
            }

            self.next_seq += 1;
            recorded += 1;
        }

        if recorded > 0 {
            debug!(task_id = %self.task_id, recorded, next_seq = self.next_seq, "frames flushed");
        }
        recorded
    }
}
