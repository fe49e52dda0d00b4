//! Extension lifecycle management.
//!
//! [`ExtensionRegistry`] is the generic owner of installed extensions. It is
//! specialized by its binding table:
//!
//! - [`PluginRegistry`] (`ExtensionRegistry<KeywordTable>`): one plugin per
//!   chat keyword.
//! - [`TaskRegistry`] (`ExtensionRegistry<ScheduleTable>`): any number of
//!   cron schedules per task.
//!
//! # Lifecycle
//!
//! ```text
//! install ──► record persisted (not loaded)
//! bind    ──► binding persisted, instance loaded and `init`ed on first use
//! reload  ──► cached instance swapped (no init, no destroy)
//! unbind / uninstall ──► binding dropped ──► recycle ──► retire ──► destroy
//! ```
//!
//! # Consistency
//!
//! Every mutation holds the registry's write guard for its whole duration,
//! runs its database work in one transaction and touches the in-memory state
//! only after that transaction committed. After each mutation, recycling
//! evicts every loaded instance that no binding references.

mod plugin;
mod task;

pub use plugin::{KeywordTable, PluginListing, PluginRegistry};
pub use task::{ScheduleEntry, ScheduleTable, TaskEnv, TaskListing, TaskRegistry};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use steward_store::{Catalog, Connection, ExtensionRecord, StoreResult, records};
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info, warn};

use crate::error::{ExtensionError, ExtensionResult};
use crate::extension::{
    BoxedExtension, CodeLoader, HostServices, Instance, Lease, Source, SourceFetcher,
};

// =============================================================================
// Binding table abstraction
// =============================================================================

/// In-memory side of a registry's bindings.
pub trait BindingTable: Default + Send + Sync + 'static {
    /// Catalog the registry's records live in.
    const CATALOG: Catalog;

    /// Extra collaborators the specialization needs.
    type Env: Send + Sync + 'static;

    /// Ids referenced by at least one binding.
    fn referenced(&self) -> HashSet<String>;

    /// Drops every binding of `id`, returning how many were dropped.
    fn release(&mut self, id: &str) -> usize;

    /// Deletes every persisted binding of `id`.
    fn delete_rows(conn: &Connection, id: &str) -> StoreResult<usize>;
}

/// Loaded instances plus bindings, guarded together.
pub(crate) struct RegistryState<B> {
    pub(crate) loaded: HashMap<String, Arc<Instance>>,
    pub(crate) bindings: B,
}

impl<B: BindingTable> RegistryState<B> {
    pub(crate) fn lease(&self, id: &str) -> Option<Lease> {
        self.loaded.get(id).map(Instance::lease)
    }

    /// Evicts and retires instances no binding references.
    fn recycle(&mut self) -> Vec<String> {
        let referenced = self.bindings.referenced();
        let stale: Vec<String> = self
            .loaded
            .keys()
            .filter(|id| !referenced.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            if let Some(instance) = self.loaded.remove(id) {
                instance.retire();
                info!(catalog = %B::CATALOG, extension = %id, "Extension recycled");
            }
        }
        stale
    }
}

// =============================================================================
// ExtensionRegistry
// =============================================================================

/// Generic extension lifecycle over a binding table `B`.
pub struct ExtensionRegistry<B: BindingTable> {
    state: Arc<AsyncRwLock<RegistryState<B>>>,
    services: HostServices,
    loader: Arc<dyn CodeLoader>,
    fetcher: SourceFetcher,
    env: B::Env,
}

impl<B: BindingTable> ExtensionRegistry<B> {
    pub(crate) fn with_env(
        services: HostServices,
        loader: Arc<dyn CodeLoader>,
        fetcher: SourceFetcher,
        env: B::Env,
    ) -> Self {
        Self {
            state: Arc::new(AsyncRwLock::new(RegistryState {
                loaded: HashMap::new(),
                bindings: B::default(),
            })),
            services,
            loader,
            fetcher,
            env,
        }
    }

    pub fn services(&self) -> &HostServices {
        &self.services
    }

    /// Fetches `location`, loads it and persists a new record.
    ///
    /// The returned extension is not bound and not cached.
    pub async fn install(&self, location: &str) -> ExtensionResult<BoxedExtension> {
        let source = self.fetcher.fetch(location).await?;
        self.install_source(source).await
    }

    /// Installs already fetched source.
    pub async fn install_source(&self, source: Source) -> ExtensionResult<BoxedExtension> {
        let extension = self.loader.load(&source.package_hint, &source.text).await?;
        let record = record_of(&extension, &source, B::CATALOG);

        let _guard = self.state.write().await;
        self.services.store.transaction(|conn| {
            if let Some(existing) = records::find(conn, B::CATALOG, &record.id)? {
                return Err(ExtensionError::conflict(
                    existing.id,
                    format!("存在同名插件[{}],请先卸载或更新", record.id),
                ));
            }
            records::insert(conn, B::CATALOG, &record)?;
            Ok(())
        })?;

        info!(catalog = %B::CATALOG, extension = %record.id, "Extension installed");
        Ok(extension)
    }

    /// Re-fetches and re-loads `id`, overwriting its record.
    ///
    /// Without `location` the stored one is used. Bindings and the cache are
    /// not touched; use [`reload`](Self::reload) to pick up the new source.
    pub async fn update(
        &self,
        id: &str,
        location: Option<&str>,
    ) -> ExtensionResult<BoxedExtension> {
        let stored = self
            .services
            .store
            .read(|conn| records::find(conn, B::CATALOG, id))?
            .ok_or_else(|| ExtensionError::not_found(format!("未找到插件[{id}]")))?;
        let location = location
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&stored.location);
        if location.trim().is_empty() {
            return Err(ExtensionError::validation(format!("插件[{id}]没有记录源码路径")));
        }

        let source = self.fetcher.fetch(location).await?;
        let extension = self.loader.load(&source.package_hint, &source.text).await?;
        if extension.id() != id {
            return Err(ExtensionError::validation(format!(
                "源码声明的ID[{}]与[{id}]不一致",
                extension.id()
            )));
        }
        let record = record_of(&extension, &source, B::CATALOG);

        let _guard = self.state.write().await;
        let updated = self
            .services
            .store
            .transaction(|conn| records::update(conn, B::CATALOG, &record))?;
        if !updated {
            return Err(ExtensionError::not_found(format!("未找到插件[{id}]")));
        }

        info!(catalog = %B::CATALOG, extension = %id, "Extension updated");
        Ok(extension)
    }

    /// Rehydrates `id` from its stored record. `Ok(None)` if not installed.
    pub async fn load(&self, id: &str) -> ExtensionResult<Option<BoxedExtension>> {
        let Some(record) = self
            .services
            .store
            .read(|conn| records::find(conn, B::CATALOG, id))?
        else {
            return Ok(None);
        };
        let extension = self.loader.load(&record.package, &record.source).await?;
        Ok(Some(extension))
    }

    /// Like [`load`](Self::load) but treats a missing record as an error.
    pub async fn require(&self, id: &str) -> ExtensionResult<BoxedExtension> {
        self.load(id)
            .await?
            .ok_or_else(|| ExtensionError::not_found(format!("未找到插件[{id}]")))
    }

    /// Swaps the cached instance of `id` for a freshly loaded one.
    ///
    /// The id must be loaded. Neither `init` on the new instance nor
    /// `destroy` on the old one runs; bindings are untouched.
    pub async fn reload(&self, id: &str) -> ExtensionResult<()> {
        let mut state = self.state.write().await;
        if !state.loaded.contains_key(id) {
            return Err(ExtensionError::not_found(format!("插件{id}未加载")));
        }
        let extension = self.require(id).await?;
        let instance = Instance::new(extension, self.services.store.clone());
        state.loaded.insert(id.to_string(), instance);
        info!(catalog = %B::CATALOG, extension = %id, "Extension reloaded");
        Ok(())
    }

    /// Removes `id` together with all its bindings.
    ///
    /// Returns `Ok(false)` if it was not installed.
    pub async fn uninstall(&self, id: &str) -> ExtensionResult<bool> {
        let mut state = self.state.write().await;
        let removed = self.services.store.transaction(|conn| {
            if !records::delete(conn, B::CATALOG, id)? {
                return Ok::<_, ExtensionError>(None);
            }
            Ok(Some(B::delete_rows(conn, id)?))
        })?;
        let Some(rows) = removed else {
            return Ok(false);
        };

        let dropped = state.bindings.release(id);
        state.recycle();
        info!(
            catalog = %B::CATALOG,
            extension = %id,
            bindings = rows.max(dropped),
            "Extension uninstalled"
        );
        Ok(true)
    }

    /// Evicts loaded instances that no binding references.
    pub async fn recycle(&self) -> Vec<String> {
        self.state.write().await.recycle()
    }

    /// Every installed record.
    pub fn records(&self) -> ExtensionResult<Vec<ExtensionRecord>> {
        Ok(self
            .services
            .store
            .read(|conn| records::list(conn, B::CATALOG))?)
    }

    pub async fn is_loaded(&self, id: &str) -> bool {
        self.state.read().await.loaded.contains_key(id)
    }

    /// Ids currently cached.
    pub async fn loaded_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.loaded.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Persists a binding and makes sure `extension` is loaded.
    ///
    /// `persist` runs in the same transaction as `init`, which only runs when
    /// the id is not already loaded. A loaded instance is kept even if
    /// `extension` carries different source.
    fn bind_instance<T>(
        &self,
        state: &mut RegistryState<B>,
        extension: BoxedExtension,
        persist: impl FnOnce(&Connection) -> ExtensionResult<T>,
    ) -> ExtensionResult<T> {
        let id = extension.id().to_string();
        let existing = state.loaded.get(&id).cloned();
        let store = &self.services.store;

        let value = store.transaction(|conn| {
            let value = persist(conn)?;
            if existing.is_none() {
                extension.init(store)?;
            }
            Ok::<_, ExtensionError>(value)
        })?;

        match existing {
            Some(instance) => {
                if !instance.extension().same_as(extension.as_ref()) {
                    debug!(
                        catalog = %B::CATALOG,
                        extension = %id,
                        "Keeping loaded instance; reload to pick up new source"
                    );
                }
            }
            None => {
                state
                    .loaded
                    .insert(id.clone(), Instance::new(extension, store.clone()));
                info!(catalog = %B::CATALOG, extension = %id, "Extension initialized");
            }
        }
        Ok(value)
    }

    /// Loads and initializes `id` during startup, unless already loaded.
    async fn restore_instance(&self, state: &mut RegistryState<B>, id: &str) -> bool {
        if state.loaded.contains_key(id) {
            return true;
        }
        let extension = match self.load(id).await {
            Ok(Some(extension)) => extension,
            Ok(None) => {
                warn!(catalog = %B::CATALOG, extension = %id, "Binding refers to a missing record");
                return false;
            }
            Err(e) => {
                warn!(
                    catalog = %B::CATALOG,
                    extension = %id,
                    error = %e,
                    "Failed to load extension"
                );
                return false;
            }
        };
        let store = &self.services.store;
        if let Err(e) = store.transaction(|_| extension.init(store)) {
            warn!(
                catalog = %B::CATALOG,
                extension = %id,
                error = %e,
                "Failed to initialize extension"
            );
            return false;
        }
        state
            .loaded
            .insert(id.to_string(), Instance::new(extension, store.clone()));
        true
    }
}

impl<B: BindingTable> std::fmt::Debug for ExtensionRegistry<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("catalog", &B::CATALOG)
            .finish_non_exhaustive()
    }
}

fn record_of(extension: &BoxedExtension, source: &Source, catalog: Catalog) -> ExtensionRecord {
    let info = extension.info();
    ExtensionRecord {
        id: extension.id().to_string(),
        package: extension.id().to_string(),
        source: source.text.clone(),
        location: source.location.clone(),
        trigger_hint: match catalog {
            Catalog::Addon => info.trigger_hint,
            Catalog::Task => String::new(),
        },
        description: info.description,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted test extensions shared by the registry tests.

    use super::*;
    use crate::extension::{Extension, ExtensionInfo, Invocation, source_hash};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use steward_core::Reply;
    use steward_store::Store;

    /// Lifecycle counters shared by every instance of a test id.
    #[derive(Debug, Default)]
    pub struct Counters {
        pub init: AtomicUsize,
        pub destroy: AtomicUsize,
        pub handle: AtomicUsize,
    }

    impl Counters {
        pub fn init(&self) -> usize {
            self.init.load(Ordering::SeqCst)
        }

        pub fn destroy(&self) -> usize {
            self.destroy.load(Ordering::SeqCst)
        }

        pub fn handle(&self) -> usize {
            self.handle.load(Ordering::SeqCst)
        }
    }

    /// Source format: `id|keyword|description|behavior`, behavior one of
    /// `ok`, `skip`, `fail-init`, `error`, `panic`, `echo`.
    pub struct Scripted {
        id: String,
        hash: String,
        info: ExtensionInfo,
        behavior: String,
        counters: Arc<Counters>,
    }

    #[async_trait]
    impl Extension for Scripted {
        fn id(&self) -> &str {
            &self.id
        }

        fn source_hash(&self) -> &str {
            &self.hash
        }

        fn info(&self) -> ExtensionInfo {
            self.info.clone()
        }

        fn init(&self, _store: &Store) -> ExtensionResult<()> {
            if self.behavior == "fail-init" {
                return Err(ExtensionError::fault(&self.id, "init failed"));
            }
            self.counters.init.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn destroy(&self, _store: &Store) -> ExtensionResult<()> {
            self.counters.destroy.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn handle(&self, invocation: Arc<Invocation>) -> ExtensionResult<bool> {
            self.counters.handle.fetch_add(1, Ordering::SeqCst);
            match self.behavior.as_str() {
                "skip" => Ok(false),
                "error" => Err(ExtensionError::validation("bad input")),
                "panic" => panic!("scripted panic"),
                "echo" => {
                    invocation.reply(Reply::text(format!(
                        "{}:{}",
                        invocation.keyword(),
                        invocation.params().join(",")
                    )));
                    Ok(true)
                }
                _ => Ok(true),
            }
        }
    }

    /// Loader producing [`Scripted`] extensions with per-id counters.
    #[derive(Default)]
    pub struct ScriptedLoader {
        counters: parking_lot::Mutex<HashMap<String, Arc<Counters>>>,
    }

    impl ScriptedLoader {
        pub fn counters(&self, id: &str) -> Arc<Counters> {
            Arc::clone(self.counters.lock().entry(id.to_string()).or_default())
        }
    }

    #[async_trait]
    impl CodeLoader for ScriptedLoader {
        async fn load(&self, _hint: &str, source: &str) -> ExtensionResult<BoxedExtension> {
            let mut parts = source.split('|');
            let id = parts.next().unwrap_or_default().to_string();
            let trigger_hint = parts.next().unwrap_or_default().to_string();
            let description = parts.next().unwrap_or_default().to_string();
            let behavior = parts.next().unwrap_or("ok").to_string();
            if id.is_empty() {
                return Err(ExtensionError::validation("empty id"));
            }
            Ok(Arc::new(Scripted {
                counters: self.counters(&id),
                hash: source_hash(source),
                id,
                info: ExtensionInfo {
                    trigger_hint,
                    description,
                },
                behavior,
            }))
        }
    }

    pub fn services() -> HostServices {
        HostServices::new(Store::open_in_memory().unwrap())
    }
}
