//! # Steward Framework
//!
//! Extension lifecycle and command routing for the Steward automation host.
//!
//! This layer provides:
//! - Code loaders for Lua and remote (HTTP) extensions
//! - `ExtensionRegistry` with keyword bound plugins and cron scheduled tasks
//! - The `CommandRouter` pipeline: dedup, quote parsing, history, commands
//! - OTP guarded admin commands parsed with clap
//! - A per-sender rate limiter
//!
//! Persistence lives in `steward-store`; wiring to a configured transport
//! lives in `steward-runtime`.

pub mod command;
pub mod context;
pub mod error;
pub mod extension;
pub mod limiter;
pub mod otp;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod stage;

#[cfg(test)]
mod testing;

pub use command::CommandRelay;
pub use context::{Quote, RouteContext};
pub use error::{ExtensionError, ExtensionResult};
pub use extension::{
    BoxedExtension, CodeLoader, Extension, ExtensionInfo, HostServices, Invocation, Lease,
    LuaLoader, RemoteLoader, Source, SourceFetcher, SourceLoader, Trigger,
};
pub use limiter::RateLimiter;
pub use otp::OtpVerifier;
pub use pipeline::{CommandRouter, Flow, Stage};
pub use registry::{
    BindingTable, ExtensionRegistry, PluginListing, PluginRegistry, TaskListing, TaskRegistry,
};
pub use schedule::{CronEngine, CronHandle, ScheduleSpec};
pub use stage::{CommandStage, DedupStage, QuoteStage, RecordStage, RouterSettings};
