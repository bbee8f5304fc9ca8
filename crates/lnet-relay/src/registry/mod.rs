//! Session Registry for name-based stanza routing.
//!
//! This module provides a thread-safe registry that tracks live LNET sessions
//! by id, enabling stanzas to be routed to whichever sessions currently carry
//! a given identity.
//!
//! ## Architecture
//!
//! Each session registers a handle (identity + outbound queue) when it is
//! accepted. Routing only ever queues stanzas; the owning session task is the
//! one that writes them to its transport.
//!
//! ```text
//! Session (alice) --route("bob")--> SessionRegistry --queue--> Session (bob)
//!                                          |                        |
//!                                          v                        v
//!                               DashMap<SessionId,           mpsc::Receiver
//!                                       SessionHandle>
//! ```

mod session_registry;

pub use session_registry::{OutboundStanza, SendResult, SessionHandle, SessionRegistry};
