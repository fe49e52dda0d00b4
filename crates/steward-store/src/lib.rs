//! # Steward Store
//!
//! Durable state for the Steward host, backed by an embedded SQLite database.
//!
//! - [`Store`]: a shared connection with re-entrant transactions
//! - [`records`]: installed extension rows (`addon` / `task` tables)
//! - [`bindings`]: keyword bindings and schedules
//! - [`DistributedLock`]: TTL lock rows for cross-process coordination
//! - [`history`]: inbound message history used for duplicate suppression
//! - [`keyword_rules`]: per-group keyword blocking
//!
//! Table helpers take a plain `&Connection` so the same call works inside or
//! outside [`Store::transaction`].

pub mod bindings;
pub mod error;
pub mod history;
pub mod keyword_rules;
pub mod lock;
pub mod records;
mod schema;
pub mod store;

pub use bindings::{KeywordBinding, ScheduleRow};
pub use error::{StoreError, StoreResult};
pub use history::MessageRecord;
pub use lock::{Clock, DistributedLock, SystemClock};
pub use records::{Catalog, ExtensionRecord};
pub use store::{SqlRow, SqlValue, Store};

pub use rusqlite::Connection;
