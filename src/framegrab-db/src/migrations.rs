//! Database migrations

use rusqlite::Connection;
use tracing::info;

use crate::error::{DatabaseError, Result};

/// Current schema version
const SCHEMA_VERSION: i64 = 1;

/// Run all pending migrations
pub fn run_all(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(DatabaseError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    }

    if current_version < SCHEMA_VERSION {
        info!("running migrations from v{} to v{}", current_version, SCHEMA_VERSION);

        if current_version < 1 {
            migrate_v1(conn)?;
        }

        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i64> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Initial schema (v1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    info!("applying migration v1: initial schema");

    conn.execute_batch(r#"
        -- Extraction tasks
        CREATE TABLE IF NOT EXISTS task (
            task_id TEXT PRIMARY KEY,
            user_id TEXT,
            source_type TEXT NOT NULL,
            source_ref TEXT NOT NULL,
            input_abs_path TEXT NOT NULL,
            output_dir_local_path TEXT NOT NULL,
            output_format TEXT NOT NULL,
            jpg_quality INTEGER,
            mode TEXT NOT NULL,
            keyframe_mode TEXT,
            fps REAL,
            scene_threshold REAL,
            start_sec REAL,
            end_sec REAL,
            max_frames_total INTEGER NOT NULL,
            frames_extracted INTEGER NOT NULL DEFAULT 0,
            video_width INTEGER NOT NULL DEFAULT 0,
            video_height INTEGER NOT NULL DEFAULT 0,
            duration_sec REAL,
            cursor_out_time_sec REAL,
            status TEXT NOT NULL,
            stop_reason TEXT,
            last_error TEXT,
            last_logs TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Produced frames, one row per (task, seq)
        CREATE TABLE IF NOT EXISTS frame (
            id INTEGER PRIMARY KEY,
            task_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            rel_path TEXT NOT NULL,
            time_sec REAL,
            created_at TEXT NOT NULL,
            UNIQUE (task_id, seq),
            FOREIGN KEY (task_id) REFERENCES task(task_id)
        );

        CREATE INDEX IF NOT EXISTS idx_task_updated ON task(updated_at);
        CREATE INDEX IF NOT EXISTS idx_task_status ON task(status, created_at);
    "#)?;

    Ok(())
}
