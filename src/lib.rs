//! Storydial - bridge between a rotary character selector and story generation
//!
//! The crate has two halves:
//! - **Device side** ([`device`]): the encoder/button input state machine that runs
//!   on the selector and announces commits as [`protocol`] lines.
//! - **Host side** ([`serial`], [`generation`], [`integration`]): discovers the
//!   selector on a serial port, watches it for commits and turns every commit
//!   into a content + narration generation run.

pub mod device;
pub mod generation;
pub mod integration;
pub mod protocol;
pub mod serial;

use thiserror::Error;

pub use generation::ProviderError;
pub use protocol::ProtocolError;
pub use serial::ConnectionError;

#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),

    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("IO error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::IOError(e.to_string())
    }
}

impl BridgeError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // A bad line only costs that line
            BridgeError::ProtocolError(_) => true,
            BridgeError::ConnectionError(e) => e.is_transient(),
            // Providers recover through the fallback chain or the next selection
            BridgeError::ProviderError(_) => true,
            BridgeError::ConfigError(_) => false,
            BridgeError::ChannelError(_) => false,
            BridgeError::IOError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            BridgeError::ProtocolError(_) => {
                "The selector sent a message that could not be understood.".to_string()
            }
            BridgeError::ConnectionError(ConnectionError::NoDeviceFound) => {
                "No story selector found. Please plug it in and try again.".to_string()
            }
            BridgeError::ConnectionError(ConnectionError::PortBusy(_)) => {
                "The selector port is in use by another program.".to_string()
            }
            BridgeError::ConnectionError(_) => {
                "Lost connection to the story selector.".to_string()
            }
            BridgeError::ProviderError(_) => {
                "Story generation failed. Please turn the dial and try again.".to_string()
            }
            BridgeError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            BridgeError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            BridgeError::IOError(_) => "File system error occurred.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(BridgeError::from(ProtocolError::InvalidUtf8).is_recoverable());
        assert!(BridgeError::from(ProviderError::Timeout(10)).is_recoverable());
        assert!(!BridgeError::ConfigError("bad".into()).is_recoverable());
        assert!(!BridgeError::from(ConnectionError::PortBusy("/dev/ttyUSB0".into())).is_recoverable());
    }

    #[test]
    fn test_user_message_for_missing_device() {
        let err = BridgeError::from(ConnectionError::NoDeviceFound);
        assert!(err.user_message().contains("plug it in"));
    }
}
