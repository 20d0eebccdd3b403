//! Bounded worker pool
//!
//! A fixed FIFO of task ids consumed by `workers` tokio tasks. Admission never
//! blocks: a full queue or a closed scheduler is reported to the caller.

use crate::error::{ExtractError, Result};
use crate::executor::Executor;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>;

pub struct Scheduler {
    sender: mpsc::Sender<String>,
    closing: CancellationToken,
    executor: Arc<Executor>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the worker pool. Must be called from within a tokio runtime.
    pub fn start(executor: Arc<Executor>, workers: usize, queue_size: usize) -> Self {
        let workers = workers.max(1);
        let queue_size = queue_size.max(1);

        let (sender, receiver) = mpsc::channel(queue_size);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let closing = CancellationToken::new();

        let handles = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    executor.clone(),
                    receiver.clone(),
                    closing.clone(),
                ))
            })
            .collect();

        info!(workers, queue_size, "scheduler started");
        Self {
            sender,
            closing,
            executor,
            workers: Mutex::new(handles),
        }
    }

    /// Queue a task id without waiting
    pub fn enqueue(&self, task_id: &str) -> Result<()> {
        if self.closing.is_cancelled() {
            return Err(ExtractError::Shutdown);
        }
        self.sender
            .try_send(task_id.to_string())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ExtractError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ExtractError::Shutdown,
            })?;
        debug!(task_id, "task enqueued");
        Ok(())
    }

    /// Task ids waiting for a worker
    pub fn queue_len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Stop admitting work, cancel live runs and wait for every worker to exit.
    ///
    /// Tasks still queued stay PENDING in the store.
    pub async fn shutdown(&self) {
        self.closing.cancel();
        let cancelled = self.executor.runtimes().cancel_all();
        info!(cancelled, queued = self.queue_len(), "scheduler shutting down");

        let handles =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("worker join failed: {}", e);
            }
        }
        info!("scheduler stopped");
    }
}

async fn worker_loop(
    worker: usize,
    executor: Arc<Executor>,
    receiver: SharedReceiver,
    closing: CancellationToken,
) {
    debug!(worker, "worker started");

    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = closing.cancelled() => None,
                task_id = receiver.recv() => task_id,
            }
        };
        let Some(task_id) = next else {
            break;
        };

        let run = AssertUnwindSafe(executor.run(&task_id)).catch_unwind();
        tokio::pin!(run);

        // the first poll of the run registers its runtime, so cancelling after it reaches the run
        let result = tokio::select! {
            biased;
            result = &mut run => result,
            _ = closing.cancelled() => {
                executor.runtimes().cancel(&task_id);
                run.await
            }
        };

        match result {
            Ok(outcome) => debug!(worker, task_id = %task_id, ?outcome, "worker finished task"),
            Err(_) => error!(worker, task_id = %task_id, "executor panicked"),
        }
    }

    debug!(worker, "worker stopped");
}
