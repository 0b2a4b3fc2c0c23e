//! Serial port enumeration and opening

use serde::{Deserialize, Serialize};
use std::io::{self, Cursor, Read};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// USB-serial bridge chips selectors are usually built around
pub const KNOWN_BRIDGE_CHIPS: &[&str] = &["CP210", "CH340", "SLAB", "FTDI"];

/// A serial-capable port found on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// OS identifier (`/dev/ttyUSB0`, `COM3`, ...)
    pub name: String,
    /// Human readable description, usually the USB product/manufacturer
    pub description: String,
}

impl PortInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Whether the description names a known USB-serial bridge chip
    pub fn is_known_bridge(&self) -> bool {
        let description = self.description.to_ascii_uppercase();
        KNOWN_BRIDGE_CHIPS
            .iter()
            .any(|chip| description.contains(chip))
    }
}

/// Serial parameters; always 8N1 without flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub baud_rate: u32,
    /// Upper bound for a single read; also bounds how late a stop request
    /// is noticed
    pub read_timeout_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout_ms: 100,
        }
    }
}

impl LinkSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// An open, readable link to a selector.
///
/// Reads return `TimedOut`/`WouldBlock` when nothing arrived within the
/// read timeout. `Ok(0)` is end of stream and, like any other error, means
/// the link is gone. Dropping the link closes the port.
pub trait SerialLink: Read + Send {
    fn name(&self) -> &str;
}

/// Link that yields bytes already taken off `inner` before reading it again
pub struct ReplayLink {
    replay: Cursor<Vec<u8>>,
    inner: Box<dyn SerialLink>,
}

impl ReplayLink {
    /// Put `taken` back in front of `inner`
    pub fn wrap(inner: Box<dyn SerialLink>, taken: Vec<u8>) -> Box<dyn SerialLink> {
        if taken.is_empty() {
            return inner;
        }
        Box::new(Self {
            replay: Cursor::new(taken),
            inner,
        })
    }

    fn replay_remaining(&self) -> bool {
        self.replay.position() < self.replay.get_ref().len() as u64
    }
}

impl Read for ReplayLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.replay_remaining() {
            return self.replay.read(buf);
        }
        self.inner.read(buf)
    }
}

impl SerialLink for ReplayLink {
    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("port is held by another process")]
    Busy,

    #[error("port does not exist")]
    NotFound,

    #[error("{0}")]
    Other(String),
}

/// Source of serial ports
pub trait PortBackend: Send + Sync {
    fn available_ports(&self) -> Vec<PortInfo>;

    fn open(&self, port: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, OpenError>;
}

/// Real serial ports through the `serialport` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortBackend for SystemPorts {
    fn available_ports(&self) -> Vec<PortInfo> {
        match serialport::available_ports() {
            Ok(ports) => ports
                .into_iter()
                .map(|port| PortInfo::new(port.port_name, describe(&port.port_type)))
                .collect(),
            Err(e) => {
                debug!("Port enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    fn open(&self, port: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, OpenError> {
        let inner = serialport::new(port, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout())
            .open()
            .map_err(classify_open_error)?;

        Ok(Box::new(SystemLink {
            name: port.to_string(),
            inner,
        }))
    }
}

fn describe(port_type: &serialport::SerialPortType) -> String {
    match port_type {
        serialport::SerialPortType::UsbPort(usb) => {
            let parts: Vec<&str> = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            if parts.is_empty() {
                format!("USB {:04x}:{:04x}", usb.vid, usb.pid)
            } else {
                parts.join(" ")
            }
        }
        serialport::SerialPortType::PciPort => "PCI serial".to_string(),
        serialport::SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        serialport::SerialPortType::Unknown => "Unknown".to_string(),
    }
}

fn classify_open_error(e: serialport::Error) -> OpenError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => {
            // Linux reports a locked tty as NoDevice with a "busy" description
            if e.description.to_ascii_lowercase().contains("busy") {
                OpenError::Busy
            } else {
                OpenError::NotFound
            }
        }
        serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => OpenError::NotFound,
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => OpenError::Busy,
        _ if e.description.to_ascii_lowercase().contains("busy") => OpenError::Busy,
        _ => OpenError::Other(e.description),
    }
}

struct SystemLink {
    name: String,
    inner: Box<dyn serialport::SerialPort>,
}

impl Read for SystemLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl SerialLink for SystemLink {
    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_bridge_detection() {
        assert!(PortInfo::new("/dev/ttyUSB0", "Silicon Labs CP2102 USB to UART").is_known_bridge());
        assert!(PortInfo::new("COM4", "USB-SERIAL CH340").is_known_bridge());
        assert!(PortInfo::new("/dev/ttyUSB1", "ftdi FT232R").is_known_bridge());
        assert!(!PortInfo::new("/dev/ttyS0", "PCI serial").is_known_bridge());
    }

    #[test]
    fn test_classify_busy() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "Device or resource busy");
        assert_eq!(classify_open_error(err), OpenError::Busy);
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "No such file or directory");
        assert_eq!(classify_open_error(err), OpenError::NotFound);
        let err = serialport::Error::new(serialport::ErrorKind::Unknown, "weird");
        assert_eq!(classify_open_error(err), OpenError::Other("weird".to_string()));
    }

    struct Scripted {
        chunks: Vec<&'static [u8]>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "idle"));
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(chunk);
            Ok(chunk.len())
        }
    }

    impl SerialLink for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_replay_link_yields_taken_bytes_first() {
        let inner = Box::new(Scripted { chunks: vec![b"live"] });
        let mut link = ReplayLink::wrap(inner, b"taken".to_vec());
        assert_eq!(link.name(), "scripted");

        let mut buf = [0u8; 3];
        assert_eq!(link.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"tak");
        assert_eq!(link.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"en");
        let mut buf = [0u8; 8];
        assert_eq!(link.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"live");
        assert_eq!(link.read(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_default_link_settings() {
        let settings = LinkSettings::default();
        assert_eq!(settings.baud_rate, 115_200);
        assert_eq!(settings.read_timeout(), Duration::from_millis(100));
    }
}
