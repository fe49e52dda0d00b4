//! Timer tasks driving scheduled extensions.

use std::sync::Arc;

use chrono::Local;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::spec::ScheduleSpec;

/// Callback run on every firing.
pub type FireFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Owns the timer tasks of all schedule entries.
///
/// Each entry runs as its own tokio task; every firing is spawned separately
/// so a slow run never delays the next tick of any entry.
#[derive(Debug, Clone, Default)]
pub struct CronEngine {
    root: CancellationToken,
}

impl CronEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an entry. Dropping the returned handle stops it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        spec: ScheduleSpec,
        fire: FireFn,
    ) -> CronHandle {
        let name = name.into();
        let token = self.root.child_token();
        let cancelled = token.clone();

        tokio::spawn(async move {
            loop {
                let Some(delay) = spec.next_delay(Local::now()) else {
                    warn!(entry = %name, "Schedule has no upcoming firing");
                    break;
                };
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                trace!(entry = %name, "Schedule fired");
                tokio::spawn(fire());
            }
            debug!(entry = %name, "Schedule stopped");
        });

        CronHandle { token }
    }

    /// Stops every entry started by this engine.
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

/// Keeps a schedule entry running.
#[derive(Debug)]
pub struct CronHandle {
    token: CancellationToken,
}

impl CronHandle {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for CronHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
