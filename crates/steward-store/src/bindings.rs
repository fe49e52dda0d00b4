//! Binding rows.
//!
//! - `addon_bind`: one row per keyword; the keyword is the primary key so a
//!   keyword can never point at two plugins.
//! - `schedule`: any number of rows per task, each with its own id.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

// ─── Keyword bindings ────────────────────────────────────────────────────────

/// A persisted `(keyword, plugin id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordBinding {
    pub keyword: String,
    pub id: String,
}

/// Returns the plugin id bound to `keyword`, if any.
pub fn keyword_owner(conn: &Connection, keyword: &str) -> StoreResult<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM addon_bind WHERE keyword = ?1",
            [keyword],
            |r| r.get(0),
        )
        .optional()?)
}

/// Binds `keyword` to `id`, replacing any previous owner of the keyword.
pub fn bind_keyword(conn: &Connection, keyword: &str, id: &str) -> StoreResult<()> {
    conn.execute("DELETE FROM addon_bind WHERE keyword = ?1", [keyword])?;
    conn.execute(
        "INSERT INTO addon_bind (keyword, id) VALUES (?1, ?2)",
        params![keyword, id],
    )?;
    Ok(())
}

/// Removes the binding for `keyword`. Returns `false` if it was not bound.
pub fn unbind_keyword(conn: &Connection, keyword: &str) -> StoreResult<bool> {
    Ok(conn.execute("DELETE FROM addon_bind WHERE keyword = ?1", [keyword])? > 0)
}

/// Removes every keyword bound to `id`, returning how many were removed.
pub fn unbind_plugin(conn: &Connection, id: &str) -> StoreResult<usize> {
    Ok(conn.execute("DELETE FROM addon_bind WHERE id = ?1", [id])?)
}

/// Lists every keyword binding ordered by keyword.
pub fn keyword_bindings(conn: &Connection) -> StoreResult<Vec<KeywordBinding>> {
    let mut stmt = conn.prepare("SELECT keyword, id FROM addon_bind ORDER BY keyword")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(KeywordBinding {
                keyword: r.get(0)?,
                id: r.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ─── Schedules ───────────────────────────────────────────────────────────────

/// A persisted task schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub id: i64,
    pub task_id: String,
    pub target: String,
    pub spec: String,
}

/// Inserts a schedule and returns its generated id.
pub fn insert_schedule(
    conn: &Connection,
    task_id: &str,
    target: &str,
    spec: &str,
) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO schedule (task_id, target, spec) VALUES (?1, ?2, ?3)",
        params![task_id, target, spec],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Looks up a schedule by id.
pub fn find_schedule(conn: &Connection, id: i64) -> StoreResult<Option<ScheduleRow>> {
    Ok(conn
        .query_row(
            "SELECT id, task_id, target, spec FROM schedule WHERE id = ?1",
            [id],
            |r| {
                Ok(ScheduleRow {
                    id: r.get(0)?,
                    task_id: r.get(1)?,
                    target: r.get(2)?,
                    spec: r.get(3)?,
                })
            },
        )
        .optional()?)
}

/// Deletes a schedule. Returns `false` if it did not exist.
pub fn delete_schedule(conn: &Connection, id: i64) -> StoreResult<bool> {
    Ok(conn.execute("DELETE FROM schedule WHERE id = ?1", [id])? > 0)
}

/// Deletes every schedule of a task, returning how many were removed.
pub fn delete_task_schedules(conn: &Connection, task_id: &str) -> StoreResult<usize> {
    Ok(conn.execute("DELETE FROM schedule WHERE task_id = ?1", [task_id])?)
}

/// Lists schedules ordered by id.
pub fn schedules(conn: &Connection) -> StoreResult<Vec<ScheduleRow>> {
    let mut stmt = conn.prepare("SELECT id, task_id, target, spec FROM schedule ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ScheduleRow {
                id: r.get(0)?,
                task_id: r.get(1)?,
                target: r.get(2)?,
                spec: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
