//! # lnet-relay
//!
//! Relay library for the LNET text protocol.
//!
//! Clients exchange small XML-like stanzas (`login`, `message`, `data`,
//! `request`, `ping`, `pong`) over a plain TCP stream. The relay names each
//! session after its login and forwards addressed stanzas to every session
//! whose name matches the `to` attribute, case-insensitively.
//!
//! ## Architecture
//!
//! - **Codec**: [`codec::StanzaCodec`] frames one top-level element at a time
//!   and keeps inner markup of `message`/`data` bodies verbatim
//! - **Sessions**: each connection is a [`session::Session`] owned by its own
//!   task, which is the only writer of its transport
//! - **Registry**: [`registry::SessionRegistry`] maps live sessions to their
//!   outbound queues for name-based routing
//! - **Server**: [`server::RelayServer`] accepts connections and runs the
//!   per-session dispatch loop

pub mod codec;
pub mod registry;
pub mod server;
pub mod session;
pub mod stanza;

mod error;
mod types;

pub use codec::{Frame, StanzaCodec};
pub use error::RelayError;
pub use registry::{SendResult, SessionHandle, SessionRegistry};
pub use server::{serve_session, RelayServer, RelayServerConfig};
pub use session::{Inbound, Session, SessionConfig};
pub use stanza::Stanza;
pub use types::*;
