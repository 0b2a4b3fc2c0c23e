//! Connection state shared between the manager, the monitor and readers
//!
//! The monitor thread is the only writer while monitoring; everyone else
//! reads consistent snapshots.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Connection lifecycle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Opening or probing ports
    Connecting,
    /// Link open, nobody reading yet
    Connected,
    /// Monitor thread is reading the link
    Monitoring,
    /// Link failed; a reconnect sequence is running
    Error(String),
}

impl ConnectionState {
    /// Check if a link is held
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Monitoring)
    }

    pub fn is_monitoring(&self) -> bool {
        matches!(self, ConnectionState::Monitoring)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    /// Whether `next` is a legal transition from this state
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            // disconnect() is always allowed
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Monitoring) => true,
            (Monitoring, Error(_)) => true,
            // Reconnect succeeded
            (Error(_), Monitoring) => true,
            // Next failed attempt
            (Error(_), Error(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Monitoring => write!(f, "Monitoring"),
            ConnectionState::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Inner {
    state: ConnectionState,
    port: Option<String>,
    last_error: Option<String>,
    since: Option<DateTime<Utc>>,
}

/// Immutable snapshot of the connection
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub port: Option<String>,
    pub last_error: Option<String>,
    /// When the current state was entered
    pub since: Option<DateTime<Utc>>,
}

/// Thread-safe connection state
#[derive(Clone, Default)]
pub struct SharedConnectionState {
    inner: Arc<RwLock<Inner>>,
}

impl SharedConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current state (no lock held after return)
    pub fn snapshot(&self) -> ConnectionSnapshot {
        let inner = self.inner.read();
        ConnectionSnapshot {
            state: inner.state.clone(),
            port: inner.port.clone(),
            last_error: inner.last_error.clone(),
            since: inner.since,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.read().state.clone()
    }

    pub fn port(&self) -> Option<String> {
        self.inner.read().port.clone()
    }

    /// Move to `next` if the transition is legal; illegal ones are logged
    /// and ignored
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut inner = self.inner.write();
        if !inner.state.can_transition_to(&next) {
            warn!("Ignoring connection transition {} -> {}", inner.state, next);
            return false;
        }
        debug!("Connection {} -> {}", inner.state, next);
        if let ConnectionState::Error(reason) = &next {
            inner.last_error = Some(reason.clone());
        }
        if next.is_disconnected() {
            inner.port = None;
        }
        inner.state = next;
        inner.since = Some(Utc::now());
        true
    }

    /// Record which port the connection is about
    pub fn set_port(&self, port: Option<String>) {
        self.inner.write().port = port;
    }

    pub fn set_last_error(&self, error: impl Into<String>) {
        self.inner.write().last_error = Some(error.into());
    }
}
