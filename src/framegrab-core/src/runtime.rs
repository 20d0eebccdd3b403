//! Live per-task runtime state
//!
//! A [`Runtime`] exists only while a worker owns a task. It carries the cancel
//! token, the latest progress counters and a bounded log ring. The
//! [`RuntimeRegistry`] guarantees at most one runtime per task id in this
//! process.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::debug;

/// Log lines kept per runtime
pub const LOG_CAPACITY: usize = 200;

/// Point-in-time view of a runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeView {
    pub frame: i64,
    pub out_time_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

#[derive(Debug)]
struct RuntimeState {
    frame: i64,
    out_time_ms: i64,
    speed: String,
    logs: VecDeque<String>,
}

#[derive(Debug)]
pub struct Runtime {
    task_id: String,
    cancel: CancellationToken,
    state: Mutex<RuntimeState>,
}

impl Runtime {
    fn new(task_id: &str, cancel: CancellationToken) -> Self {
        Self {
            task_id: task_id.to_string(),
            cancel,
            state: Mutex::new(RuntimeState {
                frame: -1,
                out_time_ms: -1,
                speed: String::new(),
                logs: VecDeque::with_capacity(LOG_CAPACITY),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        // counters stay usable even if a reader panicked mid-update
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Request cancellation of the run. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Append a log line; trailing whitespace is trimmed and blank lines ignored
    pub fn append_log(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let mut state = self.state();
        if state.logs.len() >= LOG_CAPACITY {
            state.logs.pop_front();
        }
        state.logs.push_back(line.to_string());
    }

    /// Update counters; negative numbers and blank speeds leave the field unchanged
    pub fn set_progress(&self, frame: i64, out_time_ms: i64, speed: &str) {
        let mut state = self.state();
        if frame >= 0 {
            state.frame = frame;
        }
        if out_time_ms >= 0 {
            state.out_time_ms = out_time_ms;
        }
        let speed = speed.trim();
        if !speed.is_empty() {
            state.speed = speed.to_string();
        }
    }

    /// Snapshot with at most `max_logs` of the newest log lines
    pub fn snapshot(&self, max_logs: usize) -> RuntimeView {
        let state = self.state();
        let skip = state.logs.len().saturating_sub(max_logs);
        RuntimeView {
            frame: state.frame,
            out_time_sec: state.out_time_ms as f64 / 1_000_000.0,
            speed: if state.speed.is_empty() { None } else { Some(state.speed.clone()) },
            logs: state.logs.iter().skip(skip).cloned().collect(),
        }
    }
}

/// Process-wide map of live runtimes
#[derive(Debug, Clone, Default)]
pub struct RuntimeRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<Runtime>>>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Runtime>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a runtime for `task_id`, or None when one is already live.
    ///
    /// The entry is removed when the returned guard is dropped.
    pub fn try_acquire(&self, task_id: &str) -> Option<RuntimeGuard> {
        let mut map = self.map();
        if map.contains_key(task_id) {
            return None;
        }
        let runtime = Arc::new(Runtime::new(task_id, CancellationToken::new()));
        map.insert(task_id.to_string(), runtime.clone());
        debug!(task_id, "runtime registered");
        Some(RuntimeGuard {
            registry: self.clone(),
            runtime,
        })
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<Runtime>> {
        self.map().get(task_id).cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.map().contains_key(task_id)
    }

    /// Cancel the live runtime of `task_id`. Returns whether one existed.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.get(task_id) {
            Some(runtime) => {
                runtime.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live runtime; returns how many were live
    pub fn cancel_all(&self) -> usize {
        let runtimes: Vec<Arc<Runtime>> = self.map().values().cloned().collect();
        for runtime in &runtimes {
            runtime.cancel();
        }
        runtimes.len()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.map().keys().cloned().collect()
    }

    fn release(&self, runtime: &Arc<Runtime>) {
        let mut map = self.map();
        if let Some(current) = map.get(runtime.task_id()) {
            if Arc::ptr_eq(current, runtime) {
                map.remove(runtime.task_id());
                debug!(task_id = runtime.task_id(), "runtime released");
            }
        }
    }
}

/// Ownership of a registered runtime
#[derive(Debug)]
pub struct RuntimeGuard {
    registry: RuntimeRegistry,
    runtime: Arc<Runtime>,
}

impl RuntimeGuard {
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }
}

impl std::ops::Deref for RuntimeGuard {
    type Target = Runtime;

    fn deref(&self) -> &Runtime {
        &self.runtime
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        self.registry.release(&self.runtime);
    }
}
