//! Integration layer
//!
//! Wires the serial link to the generation pipeline.

pub mod bridge;
pub mod config;

pub use bridge::SelectorBridge;
pub use config::BridgeConfig;
