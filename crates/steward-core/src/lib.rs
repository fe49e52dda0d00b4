//! # Steward Core
//!
//! Foundation types shared by every Steward crate.
//!
//! - **Events**: [`InboundMessage`] and the [`User`] / [`Group`] snapshots it
//!   carries.
//! - **Replies**: [`Reply`] and [`Media`], the outgoing side of a conversation.
//! - **Transport**: the [`ChatTransport`] trait implemented by a chat protocol
//!   client. Steward never talks to a network protocol itself; everything
//!   goes through this seam.
//!
//! ```text
//! ┌───────────────┐  InboundMessage  ┌───────────────┐  Invocation  ┌───────────┐
//! │ ChatTransport │─────────────────▶│ CommandRouter │─────────────▶│ Extension │
//! │   (client)    │◀─────────────────│   (stages)    │◀─────────────│  (Lua/..) │
//! └───────────────┘      Reply       └───────────────┘    outbox    └───────────┘
//! ```

pub mod error;
pub mod event;
pub mod message;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use event::{Group, InboundMessage, MsgType, User};
pub use message::{Media, Reply};
pub use transport::{BoxedTransport, ChatTransport};
