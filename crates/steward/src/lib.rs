//! # Steward
//!
//! A group-chat automation host. Chat commands are routed to extensions
//! (Lua scripts or remote HTTP endpoints) that can be installed, bound to
//! keywords, scheduled and swapped out while the host keeps running.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐     ┌──────────────────────────────┐     ┌──────────────────┐
//! │ ChatTransport │────▶│ dedup ▶ quote ▶ record ▶ cmd │────▶│ PluginRegistry   │──▶ Lua / remote
//! │   (client)    │◀────│        CommandRouter         │     │ TaskRegistry     │──▶ CronEngine
//! └───────────────┘     └──────────────────────────────┘     └──────────────────┘
//!                                       │                              │
//!                                       └────────────▶ Store ◀─────────┘
//! ```
//!
//! - **Transport**: the chat client, behind the [`ChatTransport`](prelude::ChatTransport) trait
//! - **Router**: an ordered chain of stages ending in command dispatch
//! - **Registries**: transactional install/bind/reload of plugins and tasks
//! - **Store**: SQLite persistence for bindings, history, blocked keywords and locks
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use steward::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport: BoxedTransport = Arc::new(MyClient::login().await?);
//!     let runtime = StewardRuntime::builder().build(transport)?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: load `steward.toml` (default)
//! - `yaml-config`: load `steward.yaml`
//! - `json-log`: JSON log output

pub use steward_core as core;
pub use steward_framework as framework;
pub use steward_runtime as runtime;
pub use steward_store as store;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use steward::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use steward_runtime::{StewardConfig, StewardRuntime};

    // Transport seam
    pub use steward_core::{BoxedTransport, ChatTransport, Group, InboundMessage, Reply, User};

    // Extensions - for custom loaders
    pub use steward_framework::{
        CodeLoader, CommandRelay, Extension, ExtensionError, ExtensionInfo, ExtensionResult,
        Invocation,
    };

    pub use steward_store::Store;
}
