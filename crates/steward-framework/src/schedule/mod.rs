//! Cron adapter for scheduled tasks.
//!
//! [`ScheduleSpec`] parses schedule expressions and [`CronEngine`] runs one
//! timer task per entry. The engine knows nothing about extensions; the task
//! registry hands it a callback that looks the task up at fire time.

mod engine;
mod spec;

pub use engine::{CronEngine, CronHandle, FireFn};
pub use spec::ScheduleSpec;
