//! Installed extension rows.
//!
//! Plugins live in the `addon` table and tasks in the `task` table. Both share
//! the same record shape; tasks simply never carry a trigger hint.

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Which catalog a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Catalog {
    /// Keyword triggered plugins.
    Addon,
    /// Schedule triggered tasks.
    Task,
}

impl Catalog {
    /// Human readable name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Addon => "addon",
            Self::Task => "task",
        }
    }
}

impl std::fmt::Display for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable description of an installed extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    /// Extension id (primary key).
    pub id: String,
    /// Declared package name.
    pub package: String,
    /// Raw source text (script body, or endpoint URL for remote extensions).
    pub source: String,
    /// Where the source was fetched from; used by `update` without a path.
    pub location: String,
    /// Declared default keyword. Always empty for tasks.
    pub trigger_hint: String,
    /// Free-form description.
    pub description: String,
}

fn from_addon_row(row: &Row<'_>) -> rusqlite::Result<ExtensionRecord> {
    Ok(ExtensionRecord {
        id: row.get(0)?,
        package: row.get(1)?,
        source: row.get(2)?,
        location: row.get(3)?,
        trigger_hint: row.get(4)?,
        description: row.get(5)?,
    })
}

fn from_task_row(row: &Row<'_>) -> rusqlite::Result<ExtensionRecord> {
    Ok(ExtensionRecord {
        id: row.get(0)?,
        package: row.get(1)?,
        source: row.get(2)?,
        location: row.get(3)?,
        trigger_hint: String::new(),
        description: row.get(4)?,
    })
}

/// Looks up a record by id.
pub fn find(conn: &Connection, catalog: Catalog, id: &str) -> StoreResult<Option<ExtensionRecord>> {
    let record = match catalog {
        Catalog::Addon => conn
            .query_row(
                "SELECT id, package, code, location, keyword, description FROM addon WHERE id = ?1",
                [id],
                from_addon_row,
            )
            .optional()?,
        Catalog::Task => conn
            .query_row(
                "SELECT id, package, code, location, description FROM task WHERE id = ?1",
                [id],
                from_task_row,
            )
            .optional()?,
    };
    Ok(record)
}

/// Returns `true` if a record with this id exists.
pub fn exists(conn: &Connection, catalog: Catalog, id: &str) -> StoreResult<bool> {
    let sql = match catalog {
        Catalog::Addon => "SELECT 1 FROM addon WHERE id = ?1",
        Catalog::Task => "SELECT 1 FROM task WHERE id = ?1",
    };
    let found: Option<i64> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

/// Inserts a new record. Fails on a duplicate id.
pub fn insert(conn: &Connection, catalog: Catalog, record: &ExtensionRecord) -> StoreResult<()> {
    match catalog {
        Catalog::Addon => conn.execute(
            "INSERT INTO addon (id, package, code, location, keyword, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.package,
                record.source,
                record.location,
                record.trigger_hint,
                record.description
            ],
        )?,
        Catalog::Task => conn.execute(
            "INSERT INTO task (id, package, code, location, description)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.package,
                record.source,
                record.location,
                record.description
            ],
        )?,
    };
    Ok(())
}

/// Overwrites an existing record. Returns `false` if no row matched.
pub fn update(conn: &Connection, catalog: Catalog, record: &ExtensionRecord) -> StoreResult<bool> {
    let changed = match catalog {
        Catalog::Addon => conn.execute(
            "UPDATE addon SET package = ?2, code = ?3, location = ?4, keyword = ?5, description = ?6
             WHERE id = ?1",
            params![
                record.id,
                record.package,
                record.source,
                record.location,
                record.trigger_hint,
                record.description
            ],
        )?,
        Catalog::Task => conn.execute(
            "UPDATE task SET package = ?2, code = ?3, location = ?4, description = ?5
             WHERE id = ?1",
            params![
                record.id,
                record.package,
                record.source,
                record.location,
                record.description
            ],
        )?,
    };
    Ok(changed > 0)
}

/// Deletes a record. Returns `false` if no row matched.
pub fn delete(conn: &Connection, catalog: Catalog, id: &str) -> StoreResult<bool> {
    let sql = match catalog {
        Catalog::Addon => "DELETE FROM addon WHERE id = ?1",
        Catalog::Task => "DELETE FROM task WHERE id = ?1",
    };
    Ok(conn.execute(sql, [id])? > 0)
}

/// Lists every record ordered by id.
pub fn list(conn: &Connection, catalog: Catalog) -> StoreResult<Vec<ExtensionRecord>> {
    let records = match catalog {
        Catalog::Addon => {
            let mut stmt = conn.prepare(
                "SELECT id, package, code, location, keyword, description FROM addon ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], from_addon_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
        Catalog::Task => {
            let mut stmt = conn.prepare(
                "SELECT id, package, code, location, description FROM task ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], from_task_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        }
    };
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn record(id: &str) -> ExtensionRecord {
        ExtensionRecord {
            id: id.into(),
            package: id.into(),
            source: "return 1".into(),
            location: format!("/tmp/{id}.lua"),
            trigger_hint: "kw".into(),
            description: "desc".into(),
        }
    }

    #[test]
    fn test_addon_crud() {
        let store = Store::open_in_memory().unwrap();
        store
            .read(|conn| insert(conn, Catalog::Addon, &record("weather")))
            .unwrap();

        let found = store
            .read(|conn| find(conn, Catalog::Addon, "weather"))
            .unwrap()
            .unwrap();
        assert_eq!(found, record("weather"));

        let mut changed = found.clone();
        changed.description = "new".into();
        assert!(store.read(|conn| update(conn, Catalog::Addon, &changed)).unwrap());
        assert!(store.read(|conn| delete(conn, Catalog::Addon, "weather")).unwrap());
        assert!(!store.read(|conn| exists(conn, Catalog::Addon, "weather")).unwrap());
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let store = Store::open_in_memory().unwrap();
        store
            .read(|conn| insert(conn, Catalog::Task, &record("ping")))
            .unwrap();
        assert!(
            store
                .read(|conn| insert(conn, Catalog::Task, &record("ping")))
                .is_err()
        );
    }

    #[test]
    fn test_task_records_drop_trigger_hint() {
        let store = Store::open_in_memory().unwrap();
        store
            .read(|conn| insert(conn, Catalog::Task, &record("ping")))
            .unwrap();
        let all = store.read(|conn| list(conn, Catalog::Task)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].trigger_hint, "");
        assert!(store.read(|conn| list(conn, Catalog::Addon)).unwrap().is_empty());
    }
}
