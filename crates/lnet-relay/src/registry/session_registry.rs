//! Session Registry implementation.
//!
//! Tracks live sessions by id and routes stanzas to them by name.

use std::fmt;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::stanza::Stanza;
use crate::types::{Identity, SessionId};

/// A stanza to be sent to a session.
///
/// This is the message type sent through the outbound channel to
/// deliver stanzas to connected peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundStanza {
    /// The stanza to send
    pub stanza: Stanza,
}

impl OutboundStanza {
    /// Create a new outbound stanza.
    pub fn new(stanza: Stanza) -> Self {
        Self { stanza }
    }
}

/// What the registry holds for each live session.
///
/// The identity is the session's own live handle, so a login that happens
/// after registration is visible to routing without re-registering.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    identity: Identity,
    sender: mpsc::Sender<OutboundStanza>,
}

impl SessionHandle {
    /// Create a handle from a session's id, identity and outbound queue.
    pub fn new(id: SessionId, identity: Identity, sender: mpsc::Sender<OutboundStanza>) -> Self {
        Self {
            id,
            identity,
            sender,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queue a stanza for the owning session task to write.
    pub fn send(&self, stanza: Stanza) -> SendResult {
        match self.sender.try_send(OutboundStanza::new(stanza)) {
            Ok(()) => SendResult::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendResult::ChannelFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendResult::ChannelClosed,
        }
    }
}

/// Result of attempting to send a stanza to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult {
    /// Stanza was successfully queued for delivery
    Sent,
    /// The session's queue is full (backpressure)
    ChannelFull,
    /// The session's queue is closed; the session is gone
    ChannelClosed,
}

impl SendResult {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendResult::Sent)
    }
}

/// Directory of live sessions.
///
/// Thread-safe registry shared by every session task. Structural changes
/// (add/remove) and routing iterations are serialized by DashMap's shard
/// locks; the map itself is never exposed.
///
/// ## Usage
///
/// ```ignore
/// let registry = SessionRegistry::new();
///
/// // When a session is accepted:
/// registry.add(session.handle());
///
/// // When a session yields a routable stanza:
/// let results = registry.route(&stanza, "bob");
///
/// // When a session ends:
/// registry.remove(session.id());
/// ```
pub struct SessionRegistry {
    /// Map of session id to handle
    sessions: DashMap<SessionId, SessionHandle>,
}

impl SessionRegistry {
    /// Create a new session registry.
    pub fn new() -> Self {
        info!("Creating session registry");
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Add a live session. Identities need not be unique.
    #[instrument(skip(self, handle), fields(session = %handle.id()))]
    pub fn add(&self, handle: SessionHandle) {
        if self.sessions.insert(handle.id(), handle).is_some() {
            debug!("Replaced existing session registration");
        } else {
            debug!("Registered new session");
        }
    }

    /// Remove a session by id.
    ///
    /// Returns the handle if the session was registered, None otherwise.
    #[instrument(skip(self), fields(session = %id))]
    pub fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        let removed = self.sessions.remove(&id);
        if removed.is_some() {
            debug!("Unregistered session");
        } else {
            debug!("Session was not registered");
        }
        removed.map(|(_, handle)| handle)
    }

    /// Check if a session is currently registered.
    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of every live session and its current identity.
    ///
    /// Useful for debugging and monitoring.
    pub fn identities(&self) -> Vec<(SessionId, String)> {
        let mut identities: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().identity().get()))
            .collect();
        identities.sort_by_key(|(id, _)| *id);
        identities
    }

    /// Deliver a stanza to every session whose identity case-insensitively
    /// equals `target`.
    ///
    /// Every match is attempted even if earlier ones fail; the per-session
    /// results are returned. No match is not an error. Sessions whose queue
    /// turned out to be closed are dropped from the registry.
    #[instrument(skip(self, stanza), fields(stanza_type = %stanza.name(), to = %target))]
    pub fn route(&self, stanza: &Stanza, target: &str) -> Vec<(SessionId, SendResult)> {
        // Collect first so no shard lock is held while sending or pruning.
        let recipients: Vec<SessionHandle> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().identity().matches(target))
            .map(|entry| entry.value().clone())
            .collect();

        if recipients.is_empty() {
            debug!("No session matches target, dropping stanza");
            return Vec::new();
        }

        let mut results = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let result = recipient.send(stanza.clone());
            match result {
                SendResult::Sent => debug!(session = %recipient.id(), "Stanza queued for delivery"),
                SendResult::ChannelFull => {
                    warn!(session = %recipient.id(), "Outbound queue full, stanza dropped")
                }
                SendResult::ChannelClosed => {
                    debug!(session = %recipient.id(), "Outbound queue closed, removing session");
                    self.sessions.remove(&recipient.id());
                }
            }
            results.push((recipient.id(), result));
        }

        results
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}
