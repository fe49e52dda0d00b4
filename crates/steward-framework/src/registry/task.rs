//! Schedule driven tasks.
//!
//! A task may be bound to any number of schedules, each delivering to its own
//! target group. Every schedule owns a cron entry; the entry resolves the task
//! at fire time, so a reload is picked up by the next firing.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use steward_core::BoxedTransport;
use steward_store::{Catalog, Connection, ScheduleRow, StoreResult, bindings};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{Instrument, Level, debug, info, span, warn};

use super::{BindingTable, ExtensionRegistry, RegistryState};
use crate::error::{ExtensionError, ExtensionResult};
use crate::extension::{BoxedExtension, CodeLoader, HostServices, Invocation, SourceFetcher};
use crate::schedule::{CronEngine, CronHandle, FireFn, ScheduleSpec};

/// A running schedule.
#[derive(Debug)]
pub struct ScheduleEntry {
    pub row: ScheduleRow,
    /// Dropping the handle stops the cron entry.
    handle: CronHandle,
}

impl ScheduleEntry {
    pub fn is_running(&self) -> bool {
        !self.handle.is_cancelled()
    }
}

/// Schedule id to running entry.
#[derive(Debug, Default)]
pub struct ScheduleTable {
    entries: BTreeMap<i64, ScheduleEntry>,
}

impl ScheduleTable {
    pub fn get(&self, schedule_id: i64) -> Option<&ScheduleEntry> {
        self.entries.get(&schedule_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.values()
    }
}

impl BindingTable for ScheduleTable {
    const CATALOG: Catalog = Catalog::Task;

    type Env = TaskEnv;

    fn referenced(&self) -> HashSet<String> {
        self.entries.values().map(|e| e.row.task_id.clone()).collect()
    }

    fn release(&mut self, id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.row.task_id != id);
        before - self.entries.len()
    }

    fn delete_rows(conn: &Connection, id: &str) -> StoreResult<usize> {
        bindings::delete_task_schedules(conn, id)
    }
}

/// Collaborators of the task registry.
pub struct TaskEnv {
    pub engine: CronEngine,
    /// Where scheduled replies are delivered.
    pub transport: BoxedTransport,
}

/// One line of a task listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskListing {
    pub task_id: String,
    /// `None` for installed tasks without a schedule for the target.
    pub schedule_id: Option<i64>,
    pub spec: Option<String>,
    pub target: Option<String>,
    pub description: String,
}

/// Registry of scheduled tasks.
pub type TaskRegistry = ExtensionRegistry<ScheduleTable>;

type SharedState = AsyncRwLock<RegistryState<ScheduleTable>>;

impl ExtensionRegistry<ScheduleTable> {
    /// Creates an empty task registry delivering through `transport`.
    pub fn new(
        services: HostServices,
        loader: Arc<dyn CodeLoader>,
        fetcher: SourceFetcher,
        transport: BoxedTransport,
    ) -> Self {
        let env = TaskEnv {
            engine: CronEngine::new(),
            transport,
        };
        Self::with_env(services, loader, fetcher, env)
    }

    /// Restarts every persisted schedule.
    ///
    /// Schedules whose spec no longer parses or whose task fails to load are
    /// logged and skipped. Returns the number of schedules started.
    pub async fn restore(&self) -> ExtensionResult<usize> {
        let rows = self.services.store.read(bindings::schedules)?;
        let mut state = self.state.write().await;
        let mut started = 0;
        for row in rows {
            let spec = match ScheduleSpec::parse(&row.spec) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!(
                        schedule = row.id,
                        extension = %row.task_id,
                        error = %e,
                        "Skipping schedule"
                    );
                    continue;
                }
            };
            if !self.restore_instance(&mut state, &row.task_id).await {
                continue;
            }
            let handle = self.start(&row, spec);
            info!(schedule = row.id, extension = %row.task_id, spec = %row.spec, "Task scheduled");
            state.bindings.entries.insert(row.id, ScheduleEntry { row, handle });
            started += 1;
        }
        Ok(started)
    }

    /// Schedules `extension` on `spec`, delivering to `target`.
    ///
    /// Returns the new schedule id.
    pub async fn bind(
        &self,
        extension: BoxedExtension,
        spec: &str,
        target: &str,
    ) -> ExtensionResult<i64> {
        let spec_text = spec.trim();
        let parsed = ScheduleSpec::parse(spec_text)?;
        if target.is_empty() {
            return Err(ExtensionError::validation("定时任务缺少目标群"));
        }

        let task_id = extension.id().to_string();
        let mut state = self.state.write().await;
        let schedule_id = self.bind_instance(&mut state, extension, |conn| {
            Ok(bindings::insert_schedule(conn, &task_id, target, spec_text)?)
        })?;

        let row = ScheduleRow {
            id: schedule_id,
            task_id: task_id.clone(),
            target: target.to_string(),
            spec: spec_text.to_string(),
        };
        let handle = self.start(&row, parsed);
        state
            .bindings
            .entries
            .insert(schedule_id, ScheduleEntry { row, handle });
        state.recycle();

        info!(schedule = schedule_id, extension = %task_id, spec = %spec_text, "Task scheduled");
        Ok(schedule_id)
    }

    /// Stops and deletes schedule `schedule_id`.
    ///
    /// Rows left behind by [`restore`](Self::restore) are deleted too.
    /// Returns `false` if the schedule neither ran nor was persisted.
    pub async fn unbind(&self, schedule_id: i64) -> ExtensionResult<bool> {
        let mut state = self.state.write().await;
        let deleted = self
            .services
            .store
            .transaction(|conn| bindings::delete_schedule(conn, schedule_id))?;
        match state.bindings.entries.remove(&schedule_id) {
            Some(entry) => {
                info!(schedule = schedule_id, extension = %entry.row.task_id, "Task unscheduled");
            }
            None if deleted => info!(schedule = schedule_id, "Stale schedule deleted"),
            None => return Ok(false),
        }
        state.recycle();
        Ok(true)
    }

    /// Lists tasks, optionally only the schedules of `target`.
    ///
    /// With `from_store` every installed task appears, those without a
    /// matching schedule once with no schedule id.
    pub async fn list(
        &self,
        from_store: bool,
        target: Option<&str>,
    ) -> ExtensionResult<Vec<TaskListing>> {
        let wanted = |row: &ScheduleRow| target.is_none_or(|t| row.target == t);
        let state = self.state.read().await;

        if !from_store {
            return Ok(state
                .bindings
                .iter()
                .filter(|entry| wanted(&entry.row))
                .filter_map(|entry| {
                    let instance = state.loaded.get(&entry.row.task_id)?;
                    Some(listing(&entry.row, instance.extension().info().description))
                })
                .collect());
        }

        let rows = self.services.store.read(bindings::schedules)?;
        let mut listed = Vec::new();
        for record in self.records()? {
            let mut scheduled = false;
            for row in rows.iter().filter(|r| r.task_id == record.id && wanted(r)) {
                scheduled = true;
                listed.push(listing(row, record.description.clone()));
            }
            if !scheduled {
                listed.push(TaskListing {
                    task_id: record.id,
                    schedule_id: None,
                    spec: None,
                    target: None,
                    description: record.description,
                });
            }
        }
        Ok(listed)
    }

    /// Stops every cron entry. Bindings stay persisted.
    pub fn shutdown(&self) {
        self.env.engine.shutdown();
        debug!("Task scheduler stopped");
    }

    fn start(&self, row: &ScheduleRow, spec: ScheduleSpec) -> CronHandle {
        let state = Arc::downgrade(&self.state);
        let services = self.services.clone();
        let transport = Arc::clone(&self.env.transport);
        let schedule_id = row.id;

        let fire: FireFn = Arc::new(move || {
            run_schedule(
                state.clone(),
                schedule_id,
                services.clone(),
                Arc::clone(&transport),
            )
            .boxed()
        });
        self.env
            .engine
            .schedule(format!("{}#{}", row.task_id, row.id), spec, fire)
    }
}

fn listing(row: &ScheduleRow, description: String) -> TaskListing {
    TaskListing {
        task_id: row.task_id.clone(),
        schedule_id: Some(row.id),
        spec: Some(row.spec.clone()),
        target: Some(row.target.clone()),
        description,
    }
}

/// One firing of schedule `schedule_id`.
async fn run_schedule(
    state: Weak<SharedState>,
    schedule_id: i64,
    services: HostServices,
    transport: BoxedTransport,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let (row, lease) = {
        let guard = state.read().await;
        let Some(entry) = guard.bindings.get(schedule_id) else {
            return;
        };
        let Some(lease) = guard.lease(&entry.row.task_id) else {
            warn!(
                schedule = schedule_id,
                extension = %entry.row.task_id,
                "Scheduled task not loaded"
            );
            return;
        };
        (entry.row.clone(), lease)
    };
    drop(state);

    let invocation = Arc::new(Invocation::schedule(&row.task_id, &row.target, &services));
    let span = span!(Level::DEBUG, "schedule", schedule = schedule_id, extension = %row.task_id);
    let result = lease.invoke(Arc::clone(&invocation)).instrument(span).await;
    drop(lease);

    if let Err(e) = result {
        warn!(
            schedule = schedule_id,
            extension = %row.task_id,
            error = %e,
            "Scheduled task failed"
        );
        return;
    }
    for reply in invocation.take_replies() {
        if let Err(e) = transport.send(&row.target, &reply).await {
            warn!(
                schedule = schedule_id,
                target = %row.target,
                error = %e,
                "Failed to deliver task reply"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Source;
    use crate::registry::testing::{ScriptedLoader, services};
    use crate::testing::MockTransport;
    use std::time::Duration;
    use steward_core::{Reply, User};

    fn registry() -> (TaskRegistry, Arc<ScriptedLoader>, Arc<MockTransport>) {
        let loader = Arc::new(ScriptedLoader::default());
        let transport = MockTransport::new(User::new("bot", "bot")).into_arc();
        let registry = TaskRegistry::new(
            services(),
            loader.clone(),
            SourceFetcher::default(),
            transport.clone(),
        );
        (registry, loader, transport)
    }

    async fn install(registry: &TaskRegistry, source: &str) -> BoxedExtension {
        registry
            .install_source(Source::inline("", source))
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbinding_one_schedule_keeps_the_other() {
        let (registry, loader, _) = registry();
        let task = install(&registry, "T||ticker").await;

        let a = registry.bind(task.clone(), "@every 5s", "g1").await.unwrap();
        let b = registry.bind(task, "@every 2s", "g2").await.unwrap();
        assert_ne!(a, b);
        assert!(registry.state.read().await.bindings.iter().all(ScheduleEntry::is_running));
        assert_eq!(loader.counters("T").init(), 1);

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(loader.counters("T").handle(), 2);

        assert!(registry.unbind(a).await.unwrap());
        assert!(registry.is_loaded("T").await);

        tokio::time::sleep(Duration::from_secs(6)).await;
        // B fired at 6s, 8s and 10s; A would have fired at 5s and 10s.
        assert_eq!(loader.counters("T").handle(), 5);
        assert_eq!(loader.counters("T").destroy(), 0);

        assert!(registry.unbind(b).await.unwrap());
        assert!(!registry.is_loaded("T").await);
        assert_eq!(loader.counters("T").destroy(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(loader.counters("T").handle(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_delivered_to_target() {
        let (registry, _, transport) = registry();
        let task = install(&registry, "report||daily report|echo").await;
        registry.bind(task, "@every 1s", "g1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(
            transport.sent(),
            vec![("g1".to_string(), Reply::text("report:"))]
        );
    }

    #[tokio::test]
    async fn test_invalid_spec_rejected_before_persisting() {
        let (registry, loader, _) = registry();
        let task = install(&registry, "T||ticker").await;

        let err = registry.bind(task, "@every soon", "g1").await.unwrap_err();
        assert!(matches!(err, ExtensionError::Validation(_)));
        assert_eq!(loader.counters("T").init(), 0);
        assert!(
            registry
                .services()
                .store
                .read(bindings::schedules)
                .unwrap()
                .is_empty()
        );
        assert!(!registry.unbind(42).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_by_target() {
        let (registry, _, _) = registry();
        let task = install(&registry, "T||ticker").await;
        install(&registry, "idle||never scheduled").await;
        registry.bind(task.clone(), "@hourly", "g1").await.unwrap();
        registry.bind(task, "@daily", "g2").await.unwrap();

        let live = registry.list(false, Some("g1")).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].spec.as_deref(), Some("@hourly"));
        assert_eq!(registry.list(false, None).await.unwrap().len(), 2);

        let all = registry.list(true, Some("g2")).await.unwrap();
        assert_eq!(all.len(), 2);
        let idle = all.iter().find(|l| l.task_id == "idle").unwrap();
        assert_eq!(idle.schedule_id, None);
        let t = all.iter().find(|l| l.task_id == "T").unwrap();
        assert_eq!(t.target.as_deref(), Some("g2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninstall_stops_every_schedule() {
        let (registry, loader, _) = registry();
        let task = install(&registry, "T||ticker").await;
        registry.bind(task.clone(), "@every 1s", "g1").await.unwrap();
        registry.bind(task, "@every 1s", "g2").await.unwrap();

        assert!(registry.uninstall("T").await.unwrap());
        assert_eq!(loader.counters("T").destroy(), 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(loader.counters("T").handle(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_restarts_schedules() {
        let loader = Arc::new(ScriptedLoader::default());
        let services = services();
        let transport = MockTransport::new(User::new("bot", "bot")).into_arc();
        {
            let first = TaskRegistry::new(
                services.clone(),
                loader.clone(),
                SourceFetcher::default(),
                transport.clone(),
            );
            let task = install(&first, "T||ticker").await;
            first.bind(task, "@every 1s", "g1").await.unwrap();
            first.shutdown();
        }

        let second =
            TaskRegistry::new(services, loader.clone(), SourceFetcher::default(), transport);
        assert_eq!(second.restore().await.unwrap(), 1);
        let fired = loader.counters("T").handle();
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(loader.counters("T").handle(), fired + 2);
    }

    #[tokio::test]
    async fn test_unbind_deletes_skipped_schedule() {
        let (registry, _, _) = registry();
        let store = registry.services().store.clone();
        let orphan = store
            .transaction(|c| bindings::insert_schedule(c, "gone", "g1", "@every 1s"))
            .unwrap();

        assert_eq!(registry.restore().await.unwrap(), 0);
        assert!(registry.unbind(orphan).await.unwrap());
        assert!(store.read(|c| bindings::find_schedule(c, orphan)).unwrap().is_none());
        assert!(!registry.unbind(orphan).await.unwrap());
    }
}
