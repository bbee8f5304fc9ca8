//! Common types for the LNET relay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Session state in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no identity yet
    Unauthenticated,
    /// Identity set by a login
    Authenticated,
    /// Stream ended or failed
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unauthenticated => write!(f, "unauthenticated"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Process-unique session identifier.
///
/// The registry removes sessions by id, never by name, since several
/// sessions may share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The name a session is addressable by, shared between the session task and
/// the registry. The registry always sees the current value.
#[derive(Debug, Clone, Default)]
pub struct Identity(Arc<RwLock<String>>);

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current identity; empty before login.
    pub fn get(&self) -> String {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, name: impl Into<String>) {
        *self
            .0
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = name.into();
    }

    pub fn is_empty(&self) -> bool {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_empty()
    }

    /// Case-insensitive comparison against a routing target. An empty
    /// identity matches nothing.
    pub fn matches(&self, target: &str) -> bool {
        let current = self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        !current.is_empty() && names_equal(&current, target)
    }
}

/// Unicode case-insensitive name comparison.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}
