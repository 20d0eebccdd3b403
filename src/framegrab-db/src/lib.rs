//! framegrab-db - Task store for Framegrab
//!
//! Persists extraction tasks and their produced frames in SQLite.

mod error;
mod migrations;
mod queries;
mod schema;

pub use error::{DatabaseError, Result};
pub use queries::*;
pub use schema::*;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Database connection wrapper with initialization
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening database at {:?}", path);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Migration(format!("failed to create {:?}: {}", parent, e))
            })?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut db = Self { conn };
        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("opening in-memory database");
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let mut db = Self { conn };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Consume the wrapper and hand out the connection
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    /// Run all pending migrations
    fn run_migrations(&mut self) -> Result<()> {
        migrations::run_all(&self.conn)
    }
}

/// Shared handle to the task store.
///
/// Every call takes the connection lock for the duration of one query, so
/// callers never hold it across an await point.
#[derive(Debug, Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self {
            conn: Arc::new(Mutex::new(db.into_connection())),
        }
    }

    /// In-memory store with the schema applied (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }

    pub fn insert(&self, task: &NewTask) -> Result<()> {
        let conn = self.lock()?;
        insert_task(&conn, task)
    }

    pub fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        get_task(&conn, task_id)
    }

    pub fn load(&self, task_id: &str) -> Result<Task> {
        let conn = self.lock()?;
        load_task(&conn, task_id)
    }

    pub fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        stop_reason: Option<StopReason>,
        last_error: Option<&str>,
        last_logs: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        update_status(&conn, task_id, status, stop_reason, last_error, last_logs)
    }

    pub fn claim_pending(&self, task_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        claim_pending(&conn, task_id)
    }

    pub fn update_cursor(&self, task_id: &str, cursor_out_time_sec: f64) -> Result<()> {
        let conn = self.lock()?;
        update_cursor(&conn, task_id, cursor_out_time_sec)
    }

    pub fn upsert_frame(&self, task_id: &str, seq: i64, rel_path: &str) -> Result<bool> {
        let conn = self.lock()?;
        upsert_frame(&conn, task_id, seq, rel_path)
    }

    pub fn list_tasks(&self, page: u32, page_size: u32) -> Result<(Vec<Task>, i64)> {
        let conn = self.lock()?;
        list_tasks(&conn, page, page_size)
    }

    pub fn list_frames(&self, task_id: &str, after_seq: i64, limit: u32) -> Result<FrameSlice> {
        let conn = self.lock()?;
        list_frames(&conn, task_id, after_seq, limit)
    }

    pub fn count_frames(&self, task_id: &str) -> Result<i64> {
        let conn = self.lock()?;
        count_frames(&conn, task_id)
    }

    pub fn delete(&self, task_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        delete_task(&conn, task_id)
    }

    pub fn reset_for_continue(&self, task_id: &str, limits: &TaskLimits) -> Result<bool> {
        let conn = self.lock()?;
        reset_for_continue(&conn, task_id, limits)
    }

    pub fn task_ids_with_status(&self, statuses: &[TaskStatus]) -> Result<Vec<String>> {
        let conn = self.lock()?;
        list_task_ids_by_status(&conn, statuses)
    }
}
