//! Runtime orchestration.
//!
//! [`StewardRuntime`] opens the store, builds the loaders and registries,
//! assembles the routing pipeline and feeds it the events a transport
//! delivers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use steward_runtime::StewardRuntime;
//!
//! let runtime = StewardRuntime::builder()
//!     .config_file("steward.toml")
//!     .build(transport.clone())?;
//! runtime.start().await?;
//!
//! while let Some(message) = inbound.recv().await {
//!     runtime.handle_event(message);
//! }
//! runtime.stop();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use steward_core::{BoxedTransport, InboundMessage};
use steward_framework::{
    CodeLoader, CommandRelay, CommandRouter, CommandStage, DedupStage, HostServices, LuaLoader,
    PluginRegistry, QuoteStage, RecordStage, RemoteLoader, SourceFetcher, SourceLoader,
    TaskRegistry,
};
use steward_store::Store;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, error, info, span, warn};

use crate::config::{ConfigLoader, StewardConfig};
use crate::error::RuntimeResult;
use crate::logging;

/// The assembled automation host.
pub struct StewardRuntime {
    config: StewardConfig,
    store: Store,
    transport: BoxedTransport,
    plugins: Arc<PluginRegistry>,
    tasks: Arc<TaskRegistry>,
    router: Arc<CommandRouter>,
    running: AtomicBool,
}

impl StewardRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Builds a runtime from `config`, delivering replies through `transport`.
    ///
    /// Initializes logging (a no-op when a subscriber is already installed)
    /// and opens the store. Nothing is restored until [`start`](Self::start).
    pub fn from_config(config: &StewardConfig, transport: BoxedTransport) -> RuntimeResult<Self> {
        Self::assemble(config, transport, None, None)
    }

    fn assemble(
        config: &StewardConfig,
        transport: BoxedTransport,
        loader: Option<Arc<dyn CodeLoader>>,
        relay: Option<Arc<dyn CommandRelay>>,
    ) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let store = Store::open(&config.store.path)?;
        let services = HostServices::new(store.clone());
        let timeout = config.remote.timeout();
        let loader: Arc<dyn CodeLoader> = match loader {
            Some(loader) => loader,
            None => Arc::new(SourceLoader::new(
                Arc::new(LuaLoader),
                Arc::new(RemoteLoader::with_timeout(timeout)?),
            )),
        };
        let fetcher = SourceFetcher::with_timeout(timeout)?;

        let plugins = Arc::new(PluginRegistry::new(
            services.clone(),
            Arc::clone(&loader),
            fetcher.clone(),
        ));
        let tasks = Arc::new(TaskRegistry::new(
            services,
            loader,
            fetcher,
            Arc::clone(&transport),
        ));

        let mut stage = CommandStage::new(Arc::clone(&plugins), Arc::clone(&tasks))
            .with_limiter(config.router.rate_limit.to_limiter())
            .with_otp(config.auth.to_verifier()?)
            .with_settings(config.router.to_settings());
        if let Some(relay) = relay {
            stage = stage.with_relay(relay);
        }
        let router = CommandRouter::new()
            .with(DedupStage::new(store.clone()))
            .with(QuoteStage)
            .with(RecordStage::new(store.clone()))
            .with(stage);

        info!(
            store = %config.store.path.display(),
            stages = router.stage_count(),
            log_level = %config.logging.level,
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config: config.clone(),
            store,
            transport,
            plugins,
            tasks,
            router: Arc::new(router),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StewardConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn plugins(&self) -> &Arc<PluginRegistry> {
        &self.plugins
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Restores persisted bindings and schedules.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Runtime is already running");
            return Ok(());
        }
        let keywords = self.plugins.restore().await?;
        let schedules = self.tasks.restore().await?;
        info!(keywords, schedules, "Runtime started");
        Ok(())
    }

    /// Stops every schedule. Bindings stay persisted.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Runtime is not running");
            return;
        }
        self.tasks.shutdown();
        info!("Runtime stopped");
    }

    /// Routes one inbound message on its own task.
    ///
    /// The handle resolves to whether the message was absorbed.
    pub fn handle_event(&self, message: InboundMessage) -> JoinHandle<bool> {
        let router = Arc::clone(&self.router);
        let transport = Arc::clone(&self.transport);
        let span = span!(Level::DEBUG, "event", msg_id = %message.msg_id);
        tokio::spawn(async move { router.route(message, transport).await }.instrument(span))
    }

    /// Routes one inbound message on the current task.
    pub async fn dispatch(&self, message: InboundMessage) -> bool {
        self.router
            .route(message, Arc::clone(&self.transport))
            .await
    }

    /// Starts, waits for Ctrl+C or SIGTERM, then stops.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Starts, waits for `shutdown`, then stops.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.start().await?;
        shutdown.await;
        self.stop();
        Ok(())
    }
}

impl std::fmt::Debug for StewardRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StewardRuntime")
            .field("store", &self.config.store.path)
            .field("router", &self.router)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => error!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`StewardRuntime`] with custom configuration sources.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    loader: Option<Arc<dyn CodeLoader>>,
    relay: Option<Arc<dyn CommandRelay>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            loader: None,
            relay: None,
        }
    }

    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration programmatically.
    pub fn merge(mut self, config: StewardConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Replaces the default Lua/remote loader.
    pub fn code_loader(mut self, loader: Arc<dyn CodeLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Hands unhandled commands to `relay` instead of the fallback keyword.
    pub fn relay(mut self, relay: Arc<dyn CommandRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Loads the configuration and assembles the runtime.
    pub fn build(self, transport: BoxedTransport) -> RuntimeResult<StewardRuntime> {
        let config = self.config_loader.load()?;
        StewardRuntime::assemble(&config, transport, self.loader, self.relay)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use steward_core::{ChatTransport, Group, Media, TransportResult, User};

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.sent.lock())
                .into_iter()
                .map(|(_, text)| text)
                .collect()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        fn alive(&self) -> bool {
            true
        }

        async fn current_user(&self) -> TransportResult<User> {
            Ok(User::new("bot", "管家"))
        }

        async fn groups(&self, _force_refresh: bool) -> TransportResult<Vec<Group>> {
            Ok(vec![Group::new("g", "群")])
        }

        async fn members(&self, _group_id: &str) -> TransportResult<Vec<User>> {
            Ok(vec![User::new("bot", "管家"), User::new("u", "用户")])
        }

        async fn send_text(&self, group_id: &str, text: &str) -> TransportResult<String> {
            self.sent.lock().push((group_id.to_string(), text.to_string()));
            Ok("sent".to_string())
        }

        async fn send_image(&self, _: &str, _: &Media, name: &str) -> TransportResult<String> {
            self.send_text("g", name).await
        }

        async fn send_video(&self, _: &str, _: &Media, name: &str) -> TransportResult<String> {
            self.send_text("g", name).await
        }

        async fn send_file(&self, _: &str, _: &Media, name: &str) -> TransportResult<String> {
            self.send_text("g", name).await
        }
    }

    const ECHO: &str = r#"
PACKAGE = "echo"

function info() return "复读", "repeats the arguments" end

function handle(ctx)
  ctx:reply(ctx:text())
  return true
end
"#;

    fn config(dir: &std::path::Path) -> StewardConfig {
        let mut config = StewardConfig::default();
        config.store.path = dir.join("steward.db");
        config.router.rate_limit.burst = 100;
        config
    }

    fn message(id: &str, content: &str) -> InboundMessage {
        InboundMessage::text(id, User::new("u", "用户"), Group::new("g", "群"), content)
    }

    #[tokio::test]
    async fn test_bindings_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("echo.lua");
        std::fs::write(&script, ECHO).unwrap();
        let transport = Arc::new(RecordingTransport::default());

        let runtime = StewardRuntime::from_config(&config(dir.path()), transport.clone()).unwrap();
        runtime.start().await.unwrap();
        let install = format!("#插件 000000 install {}", script.display());
        assert!(runtime.dispatch(message("m1", &install)).await);
        assert!(runtime.dispatch(message("m2", "#插件 000000 bind echo")).await);
        assert!(runtime.handle_event(message("m3", "#复读 你好")).await.unwrap());

        let replies = transport.take();
        assert!(replies[0].starts_with("插件安装成功"), "{replies:?}");
        assert!(replies[1].contains("唤醒词:复读"), "{replies:?}");
        assert_eq!(replies[2], "你好");
        runtime.stop();
        drop(runtime);

        let restarted =
            StewardRuntime::from_config(&config(dir.path()), transport.clone()).unwrap();
        restarted.start().await.unwrap();
        assert!(restarted.is_running());
        assert!(restarted.dispatch(message("m4", "#复读 again")).await);
        assert_eq!(transport.take(), vec!["again"]);

        // Already recorded before the restart.
        assert!(restarted.dispatch(message("m3", "#复读 你好")).await);
        assert!(transport.take().is_empty());
        restarted.stop();
    }

    #[tokio::test]
    async fn test_builder_rejects_bad_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.auth.secret = Some("not base32!".into());

        let result = StewardRuntime::builder()
            .search_path(dir.path())
            .without_env()
            .merge(config)
            .build(Arc::new(RecordingTransport::default()));
        assert!(result.is_err());
    }
}
