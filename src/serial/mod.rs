//! Host side of the serial link
//!
//! - [`port`]: enumeration and opening of serial ports behind [`PortBackend`]
//! - [`manager`]: auto-detection, connect/disconnect and the connection state
//! - [`monitor`]: background reader turning the link into selection events
//! - [`mock`]: in-memory ports for tests and demos

pub mod backoff;
pub mod manager;
pub mod mock;
pub mod monitor;
pub mod port;
pub mod state;

use thiserror::Error;

pub use backoff::ReconnectPolicy;
pub use manager::{ConnectionConfig, ConnectionManager, ProbeVerdict};
pub use mock::{MockBackend, MockPortHandle};
pub use monitor::{MonitorEvent, MonitorHandle, MonitorStats, SelectorMonitor};
pub use port::{LinkSettings, OpenError, PortBackend, PortInfo, ReplayLink, SerialLink, SystemPorts};
pub use state::{ConnectionSnapshot, ConnectionState, SharedConnectionState};

/// Connection failures surfaced to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("No selector device found")]
    NoDeviceFound,

    #[error("Port {0} is busy")]
    PortBusy(String),

    #[error("Link to {port} lost: {reason}")]
    LinkLost { port: String, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Failed to open {port}: {reason}")]
    OpenFailed { port: String, reason: String },

    #[error("Serial I/O error: {0}")]
    Io(String),
}

impl ConnectionError {
    /// Whether trying again later might succeed without user action
    pub fn is_transient(&self) -> bool {
        match self {
            ConnectionError::LinkLost { .. } => true,
            ConnectionError::Io(_) => true,
            ConnectionError::NoDeviceFound => false,
            ConnectionError::PortBusy(_) => false,
            ConnectionError::NotConnected => false,
            ConnectionError::AlreadyConnected(_) => false,
            ConnectionError::OpenFailed { .. } => false,
        }
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e.to_string())
    }
}
