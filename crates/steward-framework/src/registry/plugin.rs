//! Keyword bound plugins.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use steward_store::{Catalog, Connection, StoreResult, bindings};
use tracing::{Instrument, Level, info, span, warn};

use super::{BindingTable, ExtensionRegistry};
use crate::error::{ExtensionError, ExtensionResult};
use crate::extension::{BoxedExtension, CodeLoader, HostServices, Invocation, Lease, SourceFetcher};

/// Keyword to plugin id mapping.
#[derive(Debug, Default)]
pub struct KeywordTable {
    by_keyword: BTreeMap<String, String>,
}

impl KeywordTable {
    /// The plugin bound to `keyword`.
    pub fn owner(&self, keyword: &str) -> Option<&str> {
        self.by_keyword.get(keyword).map(String::as_str)
    }

    /// `(keyword, id)` pairs in keyword order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_keyword
            .iter()
            .map(|(k, id)| (k.as_str(), id.as_str()))
    }
}

impl BindingTable for KeywordTable {
    const CATALOG: Catalog = Catalog::Addon;

    type Env = ();

    fn referenced(&self) -> HashSet<String> {
        self.by_keyword.values().cloned().collect()
    }

    fn release(&mut self, id: &str) -> usize {
        let before = self.by_keyword.len();
        self.by_keyword.retain(|_, owner| owner != id);
        before - self.by_keyword.len()
    }

    fn delete_rows(conn: &Connection, id: &str) -> StoreResult<usize> {
        bindings::unbind_plugin(conn, id)
    }
}

/// One line of a plugin listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginListing {
    pub id: String,
    /// Bound keyword; `None` for installed but unbound plugins.
    pub keyword: Option<String>,
    /// Declared default keyword.
    pub trigger_hint: String,
    pub description: String,
}

/// Registry of keyword triggered plugins.
pub type PluginRegistry = ExtensionRegistry<KeywordTable>;

impl ExtensionRegistry<KeywordTable> {
    /// Creates an empty plugin registry.
    pub fn new(
        services: HostServices,
        loader: Arc<dyn CodeLoader>,
        fetcher: SourceFetcher,
    ) -> Self {
        Self::with_env(services, loader, fetcher, ())
    }

    /// Rebuilds bindings and instances from the store.
    ///
    /// Plugins that fail to load are logged and left unbound in memory.
    /// Returns the number of keywords restored.
    pub async fn restore(&self) -> ExtensionResult<usize> {
        let rows = self.services.store.read(bindings::keyword_bindings)?;
        let mut state = self.state.write().await;
        let mut restored = 0;
        for row in rows {
            if self.restore_instance(&mut state, &row.id).await {
                info!(extension = %row.id, keyword = %row.keyword, "Plugin enabled");
                state.bindings.by_keyword.insert(row.keyword, row.id);
                restored += 1;
            }
        }
        Ok(restored)
    }

    /// Binds `extension` to `key`, or to its declared trigger hint.
    ///
    /// A key owned by another binding is a [`Conflict`](ExtensionError::Conflict)
    /// unless `force` is set, in which case the old binding is replaced.
    /// Returns the keyword that was bound.
    pub async fn bind(
        &self,
        key: Option<&str>,
        extension: BoxedExtension,
        force: bool,
    ) -> ExtensionResult<String> {
        let keyword = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| extension.info().trigger_hint);
        if keyword.is_empty() {
            return Err(ExtensionError::validation("插件未绑定唤醒词"));
        }

        let mut state = self.state.write().await;
        if let Some(owner) = state.bindings.owner(&keyword)
            && !force
        {
            return Err(ExtensionError::conflict(
                owner,
                format!("唤醒词[{keyword}]已被占用,请先卸载或更换唤醒词绑定"),
            ));
        }

        let id = extension.id().to_string();
        self.bind_instance(&mut state, extension, |conn| {
            bindings::bind_keyword(conn, &keyword, &id)?;
            Ok(())
        })?;
        let replaced = state.bindings.by_keyword.insert(keyword.clone(), id.clone());
        state.recycle();

        info!(extension = %id, keyword = %keyword, replaced = ?replaced, "Plugin bound");
        Ok(keyword)
    }

    /// Removes the binding of `keyword`. Returns `false` if it was not bound.
    pub async fn unbind(&self, keyword: &str) -> ExtensionResult<bool> {
        let mut state = self.state.write().await;
        let removed_row = self
            .services
            .store
            .transaction(|conn| bindings::unbind_keyword(conn, keyword))?;
        let removed = state.bindings.by_keyword.remove(keyword);
        state.recycle();

        if let Some(id) = &removed {
            info!(extension = %id, keyword = %keyword, "Plugin unbound");
        }
        Ok(removed_row || removed.is_some())
    }

    /// Leases the plugin bound to `keyword`.
    pub async fn find_by_key(&self, keyword: &str) -> Option<Lease> {
        let state = self.state.read().await;
        let id = state.bindings.owner(keyword)?;
        state.lease(id)
    }

    /// Runs the plugin bound to `keyword`. Unknown keywords return `Ok(false)`.
    pub async fn invoke(
        &self,
        keyword: &str,
        invocation: Arc<Invocation>,
    ) -> ExtensionResult<bool> {
        let Some(lease) = self.find_by_key(keyword).await else {
            return Ok(false);
        };
        let span = span!(Level::DEBUG, "dispatch", keyword = %keyword, extension = %lease.id());
        let result = lease.invoke(invocation).instrument(span).await;
        if let Err(e) = &result {
            warn!(extension = %lease.id(), keyword = %keyword, error = %e, "Plugin call failed");
        }
        result
    }

    /// Lists plugins.
    ///
    /// With `from_store` every installed plugin is listed against the current
    /// bindings; otherwise only the live bound set is.
    pub async fn list(&self, from_store: bool) -> ExtensionResult<Vec<PluginListing>> {
        let state = self.state.read().await;
        if !from_store {
            return Ok(state
                .bindings
                .iter()
                .filter_map(|(keyword, id)| {
                    let info = state.loaded.get(id)?.extension().info();
                    Some(PluginListing {
                        id: id.to_string(),
                        keyword: Some(keyword.to_string()),
                        trigger_hint: info.trigger_hint,
                        description: info.description,
                    })
                })
                .collect());
        }

        let mut listing = Vec::new();
        for record in self.records()? {
            let mut bound = false;
            for (keyword, id) in state.bindings.iter() {
                if id == record.id {
                    bound = true;
                    listing.push(PluginListing {
                        id: record.id.clone(),
                        keyword: Some(keyword.to_string()),
                        trigger_hint: record.trigger_hint.clone(),
                        description: record.description.clone(),
                    });
                }
            }
            if !bound {
                listing.push(PluginListing {
                    id: record.id,
                    keyword: None,
                    trigger_hint: record.trigger_hint,
                    description: record.description,
                });
            }
        }
        Ok(listing)
    }
}
