//! Database query functions

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{DatabaseError, Result};
use crate::schema::*;

/// Maximum page size for task listings
pub const MAX_TASK_PAGE_SIZE: u32 = 100;

/// Maximum number of frames returned by one frame listing
pub const MAX_FRAME_PAGE_SIZE: u32 = 300;

const TASK_COLUMNS: &str = r#"task_id, user_id, source_type, source_ref, input_abs_path,
    output_dir_local_path, output_format, jpg_quality,
    mode, keyframe_mode, fps, scene_threshold,
    start_sec, end_sec, max_frames_total, frames_extracted,
    video_width, video_height, duration_sec, cursor_out_time_sec,
    status, stop_reason, last_error, last_logs, created_at, updated_at"#;

/// Timestamp format used for every stored date (lexically sortable)
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn now() -> String {
    format_timestamp(Utc::now())
}

/// Insert a new PENDING task
pub fn insert_task(conn: &Connection, task: &NewTask) -> Result<()> {
    let ts = now();
    conn.execute(
        r#"INSERT INTO task
           (task_id, user_id, source_type, source_ref, input_abs_path,
            output_dir_local_path, output_format, jpg_quality,
            mode, keyframe_mode, fps, scene_threshold,
            start_sec, end_sec, max_frames_total, frames_extracted,
            video_width, video_height, duration_sec, cursor_out_time_sec,
            status, stop_reason, last_error, last_logs, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0,
                   ?16, ?17, ?18, NULL, ?19, NULL, NULL, NULL, ?20, ?20)"#,
        params![
            task.task_id,
            task.user_id,
            task.source_type.as_str(),
            task.source_ref,
            task.input_abs_path,
            task.output_dir_local_path,
            task.output_format.as_str(),
            task.jpg_quality,
            task.mode.as_str(),
            task.keyframe_mode.map(|k| k.as_str()),
            task.fps,
            task.scene_threshold,
            task.start_sec,
            task.end_sec,
            task.max_frames_total,
            task.video_width,
            task.video_height,
            task.duration_sec,
            TaskStatus::Pending.as_str(),
            ts,
        ],
    )?;
    Ok(())
}

/// Get task by ID
pub fn get_task(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let sql = format!("SELECT {} FROM task WHERE task_id = ?1", TASK_COLUMNS);
    let task = conn
        .query_row(&sql, params![task_id], row_to_task)
        .optional()?;
    Ok(task)
}

/// Load task by ID, failing with `NotFound` when it does not exist
pub fn load_task(conn: &Connection, task_id: &str) -> Result<Task> {
    get_task(conn, task_id)?.ok_or_else(|| DatabaseError::NotFound(format!("task {}", task_id)))
}

/// Overwrite status, stop reason, last error and last logs (last writer wins).
///
/// Empty strings are stored as NULL. Returns false when the row is gone.
pub fn update_status(
    conn: &Connection,
    task_id: &str,
    status: TaskStatus,
    stop_reason: Option<StopReason>,
    last_error: Option<&str>,
    last_logs: Option<&str>,
) -> Result<bool> {
    let changed = conn.execute(
        r#"UPDATE task
           SET status = ?1, stop_reason = ?2, last_error = ?3, last_logs = ?4, updated_at = ?5
           WHERE task_id = ?6"#,
        params![
            status.as_str(),
            stop_reason.map(|r| r.as_str()),
            non_blank(last_error),
            non_blank(last_logs),
            now(),
            task_id,
        ],
    )?;
    Ok(changed > 0)
}

/// Move a PENDING task to RUNNING. Returns false when the row is gone or not PENDING.
pub fn claim_pending(conn: &Connection, task_id: &str) -> Result<bool> {
    let changed = conn.execute(
        r#"UPDATE task
           SET status = ?1, stop_reason = NULL, last_error = NULL, updated_at = ?2
           WHERE task_id = ?3 AND status = ?4"#,
        params![
            TaskStatus::Running.as_str(),
            now(),
            task_id,
            TaskStatus::Pending.as_str(),
        ],
    )?;
    Ok(changed > 0)
}

/// Move the resume cursor forward. Smaller values and missing rows are ignored.
pub fn update_cursor(conn: &Connection, task_id: &str, cursor_out_time_sec: f64) -> Result<()> {
    if !cursor_out_time_sec.is_finite() || cursor_out_time_sec < 0.0 {
        return Ok(());
    }
    conn.execute(
        r#"UPDATE task
           SET cursor_out_time_sec = ?1, updated_at = ?2
           WHERE task_id = ?3
             AND (cursor_out_time_sec IS NULL OR cursor_out_time_sec < ?1)"#,
        params![cursor_out_time_sec, now(), task_id],
    )?;
    Ok(())
}

/// Insert a frame row, or replace the rel_path of an existing `(task_id, seq)`.
///
/// Returns true on first-time insertion; in that case `frames_extracted` is
/// raised to `seq` in the same transaction.
pub fn upsert_frame(conn: &Connection, task_id: &str, seq: i64, rel_path: &str) -> Result<bool> {
    if seq <= 0 || rel_path.trim().is_empty() {
        return Ok(false);
    }

    let ts = now();
    let tx = conn.unchecked_transaction()?;

    let inserted = tx.execute(
        r#"INSERT OR IGNORE INTO frame (task_id, seq, rel_path, time_sec, created_at)
           VALUES (?1, ?2, ?3, NULL, ?4)"#,
        params![task_id, seq, rel_path, ts],
    )? > 0;

    if inserted {
        tx.execute(
            r#"UPDATE task
               SET frames_extracted = MAX(frames_extracted, ?1), updated_at = ?2
               WHERE task_id = ?3"#,
            params![seq, ts, task_id],
        )?;
    } else {
        tx.execute(
            "UPDATE frame SET rel_path = ?1 WHERE task_id = ?2 AND seq = ?3",
            params![rel_path, task_id, seq],
        )?;
    }

    tx.commit()?;
    Ok(inserted)
}

/// Page of tasks ordered by most recent update, plus the total row count.
///
/// `page` is 1-based; `page_size` is clamped to [1, 100].
pub fn list_tasks(conn: &Connection, page: u32, page_size: u32) -> Result<(Vec<Task>, i64)> {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_TASK_PAGE_SIZE);
    let offset = i64::from(page - 1) * i64::from(page_size);

    let total: i64 = conn.query_row("SELECT COUNT(*) FROM task", [], |row| row.get(0))?;

    let sql = format!(
        "SELECT {} FROM task ORDER BY updated_at DESC, task_id ASC LIMIT ?1 OFFSET ?2",
        TASK_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let tasks = stmt
        .query_map(params![page_size, offset], row_to_task)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((tasks, total))
}

/// Frames with `seq > after_seq` in ascending order. `limit` is clamped to [1, 300].
pub fn list_frames(
    conn: &Connection,
    task_id: &str,
    after_seq: i64,
    limit: u32,
) -> Result<FrameSlice> {
    let limit = limit.clamp(1, MAX_FRAME_PAGE_SIZE) as usize;

    let mut stmt = conn.prepare(
        r#"SELECT task_id, seq, rel_path, time_sec, created_at
           FROM frame
           WHERE task_id = ?1 AND seq > ?2
           ORDER BY seq ASC
           LIMIT ?3"#,
    )?;

    let mut frames = stmt
        .query_map(params![task_id, after_seq.max(0), (limit + 1) as i64], row_to_frame)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let has_more = frames.len() > limit;
    frames.truncate(limit);

    Ok(FrameSlice { frames, has_more })
}

/// Number of frame rows stored for a task
pub fn count_frames(conn: &Connection, task_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM frame WHERE task_id = ?1",
        params![task_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Delete frames then the task row. Returns false when the task did not exist.
pub fn delete_task(conn: &Connection, task_id: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM frame WHERE task_id = ?1", params![task_id])?;
    let deleted = tx.execute("DELETE FROM task WHERE task_id = ?1", params![task_id])?;
    tx.commit()?;
    Ok(deleted > 0)
}

/// Apply new limits and reset the task to PENDING with no stop reason or error
pub fn reset_for_continue(conn: &Connection, task_id: &str, limits: &TaskLimits) -> Result<bool> {
    let changed = conn.execute(
        r#"UPDATE task
           SET end_sec = CASE WHEN ?1 THEN ?2 ELSE end_sec END,
               max_frames_total = COALESCE(?3, max_frames_total),
               status = ?4, stop_reason = NULL, last_error = NULL, updated_at = ?5
           WHERE task_id = ?6"#,
        params![
            limits.end_sec.is_some(),
            limits.end_sec,
            limits.max_frames_total,
            TaskStatus::Pending.as_str(),
            now(),
            task_id,
        ],
    )?;
    Ok(changed > 0)
}

/// IDs of tasks in any of the given statuses, oldest first
pub fn list_task_ids_by_status(conn: &Connection, statuses: &[TaskStatus]) -> Result<Vec<String>> {
    if statuses.is_empty() {
        return Ok(vec![]);
    }

    let placeholders = (1..=statuses.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT task_id FROM task WHERE status IN ({}) ORDER BY created_at ASC, task_id ASC",
        placeholders
    );

    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(
            rusqlite::params_from_iter(statuses.iter().map(|s| s.as_str())),
            |row| row.get::<_, String>(0),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ids)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        task_id: row.get(0)?,
        user_id: row.get(1)?,
        source_type: parse_enum(row, 2, SourceType::parse)?,
        source_ref: row.get(3)?,
        input_abs_path: row.get(4)?,
        output_dir_local_path: row.get(5)?,
        output_format: parse_enum(row, 6, OutputFormat::parse)?,
        jpg_quality: row.get(7)?,
        mode: parse_enum(row, 8, ExtractMode::parse)?,
        keyframe_mode: parse_optional_enum(row, 9, KeyframeMode::parse)?,
        fps: row.get(10)?,
        scene_threshold: row.get(11)?,
        start_sec: row.get(12)?,
        end_sec: row.get(13)?,
        max_frames_total: row.get(14)?,
        frames_extracted: row.get(15)?,
        video_width: row.get(16)?,
        video_height: row.get(17)?,
        duration_sec: row.get(18)?,
        cursor_out_time_sec: row.get(19)?,
        status: parse_enum(row, 20, TaskStatus::parse)?,
        stop_reason: parse_optional_enum(row, 21, StopReason::parse)?,
        last_error: row.get(22)?,
        last_logs: row.get(23)?,
        created_at: parse_datetime(row, 24)?,
        updated_at: parse_datetime(row, 25)?,
    })
}

fn row_to_frame(row: &Row) -> rusqlite::Result<Frame> {
    Ok(Frame {
        task_id: row.get(0)?,
        seq: row.get(1)?,
        rel_path: row.get(2)?,
        time_sec: row.get(3)?,
        created_at: parse_datetime(row, 4)?,
    })
}

fn parse_enum<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown value {:?}", s).into(),
        )
    })
}

fn parse_optional_enum<T>(
    row: &Row,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    match s.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(_) => parse_enum(row, idx, parse).map(Some),
    }
}

fn parse_datetime(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Try SQLite datetime format
            chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
                .map(|dt| dt.and_utc())
        })
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(e),
        ))
}
