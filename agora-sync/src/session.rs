//! Session registry and admission gate.
//!
//! Sessions are established by an external login mechanism and kept in an
//! in-process registry keyed by an opaque token; the hub reads only the
//! `connected` flag. The registry replaces any global mutable user list
//! and is cleared on restart — no persistence is implied.
//!
//! Admission is a boolean check, not an error path: a denied request is
//! redirected to the configured logout path.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Per-session state, owned by the external session mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub connected: bool,
    pub user_login: String,
}

/// In-process session registry: token → state.
///
/// Uses a std lock so the gate can run inside the synchronous WebSocket
/// handshake callback. Critical sections are single map operations.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish a session for a user. Returns the session token.
    pub fn login(&self, user_login: impl Into<String>) -> Uuid {
        let token = Uuid::new_v4();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            token,
            SessionState {
                connected: true,
                user_login: user_login.into(),
            },
        );
        token
    }

    /// Remove a session entirely. Returns the removed state, if any.
    pub fn logout(&self, token: &Uuid) -> Option<SessionState> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(token)
    }

    /// Mark a session as no longer connected, keeping the entry.
    pub fn disconnect(&self, token: &Uuid) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(token) {
            Some(state) => {
                state.connected = false;
                true
            }
            None => false,
        }
    }

    /// Look up a session's state.
    pub fn get(&self, token: &Uuid) -> Option<SessionState> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(token).cloned()
    }

    /// Number of sessions currently marked connected.
    pub fn connected_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.values().filter(|s| s.connected).count()
    }

    /// Drop every session.
    pub fn clear(&self) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.clear();
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The request may proceed to the real-time surface.
    Admit,
    /// The request is redirected to the logout path. Normal control flow,
    /// not a fault.
    Deny { redirect: String },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Boolean admission check over externally managed session state.
///
/// Has no concept of per-user permissions and does not expire sessions —
/// expiry, if any, is owned by the session mechanism.
#[derive(Debug, Clone)]
pub struct SessionGate {
    logout_path: String,
}

impl SessionGate {
    pub fn new(logout_path: impl Into<String>) -> Self {
        Self {
            logout_path: logout_path.into(),
        }
    }

    /// Admit iff the session exists and is marked connected.
    pub fn check(&self, state: Option<&SessionState>) -> Admission {
        match state {
            Some(state) if state.connected => Admission::Admit,
            _ => Admission::Deny {
                redirect: self.logout_path.clone(),
            },
        }
    }

    /// The redirect target handed out on denial.
    pub fn logout_path(&self) -> &str {
        &self.logout_path
    }
}
