//! Turning source text into extensions.

use std::sync::Arc;

use async_trait::async_trait;

use super::{BoxedExtension, LuaLoader, RemoteLoader};
use crate::error::ExtensionResult;

/// Builds an [`Extension`](super::Extension) from source text.
///
/// Loading resolves entry points but never calls `init`.
#[async_trait]
pub trait CodeLoader: Send + Sync + 'static {
    /// Loads `source`. `package_hint` is used when the source does not declare
    /// its own package name.
    async fn load(&self, package_hint: &str, source: &str) -> ExtensionResult<BoxedExtension>;
}

/// Chooses a loader by the shape of the source text.
///
/// Source starting with `http` is a remote endpoint URL; anything else is a
/// Lua script.
#[derive(Clone)]
pub struct SourceLoader {
    lua: Arc<dyn CodeLoader>,
    remote: Arc<dyn CodeLoader>,
}

impl SourceLoader {
    pub fn new(lua: Arc<dyn CodeLoader>, remote: Arc<dyn CodeLoader>) -> Self {
        Self { lua, remote }
    }
}

impl Default for SourceLoader {
    fn default() -> Self {
        Self::new(Arc::new(LuaLoader), Arc::new(RemoteLoader::default()))
    }
}

#[async_trait]
impl CodeLoader for SourceLoader {
    async fn load(&self, package_hint: &str, source: &str) -> ExtensionResult<BoxedExtension> {
        if source.trim_start().starts_with("http") {
            self.remote.load(package_hint, source).await
        } else {
            self.lua.load(package_hint, source).await
        }
    }
}

impl std::fmt::Debug for SourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceLoader").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{Extension, ExtensionInfo, Invocation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tagged(&'static str);

    #[async_trait]
    impl Extension for Tagged {
        fn id(&self) -> &str {
            self.0
        }

        fn source_hash(&self) -> &str {
            ""
        }

        fn info(&self) -> ExtensionInfo {
            ExtensionInfo::default()
        }

        async fn handle(&self, _invocation: Arc<Invocation>) -> ExtensionResult<bool> {
            Ok(true)
        }
    }

    struct Counting(&'static str, Arc<AtomicUsize>);

    #[async_trait]
    impl CodeLoader for Counting {
        async fn load(&self, _hint: &str, _source: &str) -> ExtensionResult<BoxedExtension> {
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Tagged(self.0)))
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_source_shape() {
        let lua_calls = Arc::new(AtomicUsize::new(0));
        let remote_calls = Arc::new(AtomicUsize::new(0));
        let loader = SourceLoader::new(
            Arc::new(Counting("lua", lua_calls.clone())),
            Arc::new(Counting("remote", remote_calls.clone())),
        );

        let ext = loader.load("x", "https://host/api/x").await.unwrap();
        assert_eq!(ext.id(), "remote");
        let ext = loader.load("x", "PACKAGE = 'x'").await.unwrap();
        assert_eq!(ext.id(), "lua");

        assert_eq!(lua_calls.load(Ordering::SeqCst), 1);
        assert_eq!(remote_calls.load(Ordering::SeqCst), 1);
    }
}
