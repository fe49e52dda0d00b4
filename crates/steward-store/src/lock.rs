//! TTL lock rows for cross-process coordination.
//!
//! A lock is a `lock_record(id, version)` row whose `version` is a unix
//! timestamp in seconds. [`DistributedLock::acquire`] is a single,
//! non-blocking attempt; callers decide whether and when to retry.
//!
//! ```text
//! no row                         ──► insert version = now      ──► 0
//! version > now                  ──► held, no ETA              ──► -1
//! now - version < ttl            ──► still valid               ──► ttl - (now - version)
//! otherwise                      ──► CAS version = now + ttl
//!                                      1 row changed           ──► 0
//!                                      0 rows (lost the race)  ──► -1
//! ```

use std::sync::Arc;
use std::time::Duration;

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::error::StoreResult;
use crate::store::Store;

/// Source of the current time, in unix seconds.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Database backed mutual exclusion with a time-to-live.
#[derive(Clone)]
pub struct DistributedLock {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl DistributedLock {
    /// Creates a lock manager using the wall clock.
    pub fn new(store: Store) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Creates a lock manager with a custom clock.
    pub fn with_clock(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Tries once to take the lock `key`.
    ///
    /// Returns `0` when the caller now owns the lock, `-1` when someone else
    /// holds it with no known expiry, or the number of seconds left before the
    /// current hold lapses.
    pub fn acquire(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let ttl = whole_seconds(ttl);
        let now = self.clock.now();
        self.store.transaction(|conn| {
            let version: Option<i64> = conn
                .query_row(
                    "SELECT version FROM lock_record WHERE id = ?1",
                    [key],
                    |r| r.get(0),
                )
                .optional()?;

            let outcome = match version {
                None => {
                    let inserted = conn.execute(
                        "INSERT OR IGNORE INTO lock_record (id, version) VALUES (?1, ?2)",
                        params![key, now],
                    )?;
                    if inserted == 1 { 0 } else { -1 }
                }
                Some(version) if version > now => -1,
                Some(version) if now - version < ttl => ttl - (now - version),
                Some(version) => {
                    let swapped = conn.execute(
                        "UPDATE lock_record SET version = ?1 WHERE id = ?2 AND version = ?3",
                        params![now.saturating_add(ttl), key, version],
                    )?;
                    if swapped == 1 { 0 } else { -1 }
                }
            };
            debug!(lock = %key, outcome, "Lock acquire attempted");
            Ok(outcome)
        })
    }

    /// Extends the hold on `key` to `now + ttl`, creating the row if needed.
    pub fn update(&self, key: &str, ttl: Duration) -> StoreResult<()> {
        let expires = self.clock.now().saturating_add(whole_seconds(ttl));
        self.store.read(|conn| {
            conn.execute(
                "INSERT INTO lock_record (id, version) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET version = excluded.version",
                params![key, expires],
            )?;
            Ok(())
        })
    }
}

/// Rounds `ttl` up to whole seconds, at least one.
fn whole_seconds(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct ManualClock(AtomicI64);

    impl ManualClock {
        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn setup() -> (DistributedLock, DistributedLock, Arc<ManualClock>) {
        let store = Store::open_in_memory().unwrap();
        let clock = Arc::new(ManualClock(AtomicI64::new(1_000)));
        let a = DistributedLock::with_clock(store.clone(), clock.clone());
        let b = DistributedLock::with_clock(store, clock.clone());
        (a, b, clock)
    }

    #[test]
    fn test_two_callers_one_wins() {
        let (a, b, clock) = setup();
        let ttl = Duration::from_secs(5);

        assert_eq!(a.acquire("job", ttl).unwrap(), 0);
        let waiting = b.acquire("job", ttl).unwrap();
        assert_eq!(waiting, 5);

        clock.advance(2);
        assert_eq!(b.acquire("job", ttl).unwrap(), 3);

        clock.advance(3);
        assert_eq!(b.acquire("job", ttl).unwrap(), 0);
    }

    #[test]
    fn test_future_version_reports_busy() {
        let (a, b, clock) = setup();
        let ttl = Duration::from_secs(5);

        a.update("job", Duration::from_secs(60)).unwrap();
        assert_eq!(b.acquire("job", ttl).unwrap(), -1);

        // Past the expiry the row still counts as a fresh hold for one ttl.
        clock.advance(62);
        assert_eq!(b.acquire("job", ttl).unwrap(), 3);

        clock.advance(3);
        assert_eq!(b.acquire("job", ttl).unwrap(), 0);
    }

    #[test]
    fn test_sub_second_ttl_rounds_up() {
        let (a, b, clock) = setup();

        assert_eq!(a.acquire("job", Duration::from_millis(200)).unwrap(), 0);
        assert_eq!(b.acquire("job", Duration::from_millis(200)).unwrap(), 1);
        assert_eq!(b.acquire("job", Duration::ZERO).unwrap(), 1);

        clock.advance(1);
        assert_eq!(a.acquire("job", Duration::from_millis(1_500)).unwrap(), 1);
        assert_eq!(b.acquire("job", Duration::from_millis(200)).unwrap(), 0);
        assert_eq!(a.acquire("job", Duration::from_millis(200)).unwrap(), -1);
    }

    #[test]
    fn test_keys_are_independent() {
        let (a, _, _) = setup();
        let ttl = Duration::from_secs(5);
        assert_eq!(a.acquire("x", ttl).unwrap(), 0);
        assert_eq!(a.acquire("y", ttl).unwrap(), 0);
    }
}
