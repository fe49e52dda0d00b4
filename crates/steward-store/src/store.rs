//! Shared SQLite connection with re-entrant transactions.
//!
//! A [`Store`] is a cheaply cloneable handle around one connection. The
//! connection sits behind a re-entrant mutex, so code already running inside
//! [`Store::transaction`] (an extension `init` hook, for example) can call back
//! into the same store on the same thread and simply joins the open
//! transaction instead of deadlocking.
//!
//! Guards are thread bound: never hold one across an `.await`. All methods
//! here are synchronous and release the connection before returning.
//!
//! # Example
//!
//! ```rust,ignore
//! use steward_store::{Store, records, Catalog};
//!
//! let store = Store::open("steward.db")?;
//! let installed = store.read(|conn| records::list(conn, Catalog::Addon))?;
//! ```

use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::ReentrantMutex;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::schema::init_schema;

/// A dynamically typed SQL value, as exchanged with scripted extensions.
pub type SqlValue = rusqlite::types::Value;

/// One result row of a dynamic query: `(column name, value)` pairs.
pub type SqlRow = Vec<(String, SqlValue)>;

struct Inner {
    conn: Connection,
    /// Nesting depth of [`Store::transaction`] on the owning thread.
    depth: Cell<u32>,
}

/// Handle to the Steward database.
#[derive(Clone)]
pub struct Store {
    inner: Arc<ReentrantMutex<Inner>>,
}

impl Store {
    /// Opens (or creates) the database at `path`.
    ///
    /// The special path `:memory:` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if path == Path::new(":memory:") {
            return Self::open_in_memory();
        }
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.display(), "Store opened");
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        debug!("In-memory store opened");
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        init_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(ReentrantMutex::new(Inner {
                conn,
                depth: Cell::new(0),
            })),
        })
    }

    /// Runs `f` against the connection outside of any explicit transaction.
    ///
    /// When called from inside [`transaction`](Self::transaction) on the same
    /// thread, `f` sees (and writes into) the open transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let guard = self.inner.lock();
        f(&guard.conn)
    }

    /// Runs `f` inside a transaction that commits when `f` returns `Ok` and
    /// rolls back otherwise.
    ///
    /// Nested calls on the same thread join the outermost transaction; only
    /// the outermost call commits.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let guard = self.inner.lock();
        if guard.depth.get() > 0 {
            return f(&guard.conn);
        }

        let tx = guard
            .conn
            .unchecked_transaction()
            .map_err(StoreError::from)?;
        let result = {
            let _depth = DepthGuard::enter(&guard.depth);
            f(&tx)
        };
        match result {
            Ok(value) => {
                tx.commit().map_err(StoreError::from)?;
                Ok(value)
            }
            // Dropping `tx` rolls back.
            Err(err) => Err(err),
        }
    }

    /// Executes a dynamic statement and returns the number of changed rows.
    pub fn exec(&self, sql: &str, params: &[SqlValue]) -> StoreResult<usize> {
        self.read(|conn| {
            let changed = conn.execute(sql, rusqlite::params_from_iter(params.iter()))?;
            Ok(changed)
        })
    }

    /// Runs a dynamic query and collects every row.
    pub fn query(&self, sql: &str, params: &[SqlValue]) -> StoreResult<Vec<SqlRow>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    values.push((name.clone(), row.get::<_, SqlValue>(i)?));
                }
                out.push(values);
            }
            Ok(out)
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

/// Restores the transaction depth even if the closure unwinds.
struct DepthGuard<'a>(&'a Cell<u32>);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self(depth)
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(store: &Store) -> i64 {
        store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM lock_record", [], |r| r.get(0))?)
            })
            .unwrap()
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let store = Store::open_in_memory().unwrap();
        let res: StoreResult<()> = store.transaction(|conn| {
            conn.execute("INSERT INTO lock_record (id, version) VALUES ('a', 1)", [])?;
            Ok(())
        });
        assert!(res.is_ok());
        assert_eq!(count(&store), 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_err() {
        let store = Store::open_in_memory().unwrap();
        let res: StoreResult<()> = store.transaction(|conn| {
            conn.execute("INSERT INTO lock_record (id, version) VALUES ('a', 1)", [])?;
            Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        });
        assert!(res.is_err());
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn test_nested_calls_join_outer_transaction() {
        let store = Store::open_in_memory().unwrap();
        let inner = store.clone();
        let res: StoreResult<()> = store.transaction(|_| {
            inner.exec(
                "INSERT INTO lock_record (id, version) VALUES (?1, ?2)",
                &[SqlValue::Text("nested".into()), SqlValue::Integer(3)],
            )?;
            let nested: StoreResult<()> = inner.transaction(|_| Ok(()));
            nested?;
            Err(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        });
        assert!(res.is_err());
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn test_dynamic_query_returns_named_columns() {
        let store = Store::open_in_memory().unwrap();
        store
            .exec(
                "INSERT INTO lock_record (id, version) VALUES (?1, ?2)",
                &[SqlValue::Text("k".into()), SqlValue::Integer(42)],
            )
            .unwrap();
        let rows = store
            .query("SELECT id, version FROM lock_record", &[])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ("id".to_string(), SqlValue::Text("k".into())));
        assert_eq!(rows[0][1], ("version".to_string(), SqlValue::Integer(42)));
    }

    #[test]
    fn test_open_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.db");
        {
            let store = Store::open(&path).unwrap();
            store
                .exec(
                    "INSERT INTO lock_record (id, version) VALUES ('p', 1)",
                    &[],
                )
                .unwrap();
        }
        let reopened = Store::open(&path).unwrap();
        assert_eq!(count(&reopened), 1);
    }
}
