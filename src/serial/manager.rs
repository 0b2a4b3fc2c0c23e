//! Connection manager
//!
//! Owns the serial link between `connect()` and `start_monitoring()`, then
//! hands it to the monitor thread. State moves
//! `Disconnected -> Connecting -> Connected -> Monitoring`; link failures while
//! monitoring go through `Error` and a bounded reconnect.

use super::backoff::ReconnectPolicy;
use super::monitor::{MonitorEvent, MonitorHandle, MonitorStats, SelectorMonitor};
use super::port::{LinkSettings, OpenError, PortBackend, PortInfo, ReplayLink, SerialLink};
use super::state::{ConnectionSnapshot, ConnectionState, SharedConnectionState};
use super::ConnectionError;
use crate::protocol::{CharacterRoster, FramedLine, LineFramer, SelectionDecoder, DEFAULT_MAX_LINE_LEN};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub link: LinkSettings,
    /// How long auto-detection listens to each candidate
    pub probe_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub max_line_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            link: LinkSettings::default(),
            probe_timeout_ms: 1_500,
            reconnect: ReconnectPolicy::default(),
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

impl ConnectionConfig {
    pub fn with_link(mut self, link: LinkSettings) -> Self {
        self.link = link;
        self
    }

    pub fn with_probe_timeout_ms(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_max_line_len(mut self, len: usize) -> Self {
        self.max_line_len = len;
        self
    }
}

/// What a port produced while being probed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// At least one complete line of printable text
    Framed,
    /// Readable but quiet
    Silent,
    /// Bytes arrived but never formed a printable line
    Garbage,
    /// Reading failed outright
    Unreadable(String),
}

/// Listen to an open link for up to `timeout` and classify it.
///
/// Also returns every byte read, so a selector's first lines can still be
/// decoded once the link is monitored.
pub fn probe_link(
    link: &mut dyn SerialLink,
    timeout: Duration,
    max_line_len: usize,
) -> (ProbeVerdict, Vec<u8>) {
    let deadline = Instant::now() + timeout;
    let mut framer = LineFramer::with_max_len(max_line_len);
    let mut buf = [0u8; 256];
    let mut received = Vec::new();

    while Instant::now() < deadline {
        match link.read(&mut buf) {
            Ok(0) => return (ProbeVerdict::Unreadable("end of stream".to_string()), received),
            Ok(n) => {
                received.extend_from_slice(&buf[..n]);
                let framed = framer.push(&buf[..n]);
                if framed.iter().any(is_printable_line) {
                    return (ProbeVerdict::Framed, received);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return (ProbeVerdict::Unreadable(e.to_string()), received),
        }
    }

    let verdict = if received.is_empty() {
        ProbeVerdict::Silent
    } else {
        ProbeVerdict::Garbage
    };
    (verdict, received)
}

fn is_printable_line(framed: &FramedLine) -> bool {
    match framed {
        FramedLine::Line(line) => {
            let line = line.trim();
            !line.is_empty() && !line.chars().any(char::is_control)
        }
        FramedLine::Rejected(_) => false,
    }
}

/// Order candidates for auto-detection: known bridge chips first, otherwise
/// enumeration order
pub fn detection_order(mut ports: Vec<PortInfo>) -> Vec<PortInfo> {
    ports.sort_by_key(|port| !port.is_known_bridge());
    ports
}

/// Discovers, opens and monitors the selector's serial port
pub struct ConnectionManager {
    backend: Arc<dyn PortBackend>,
    config: ConnectionConfig,
    state: SharedConnectionState,
    link: Option<Box<dyn SerialLink>>,
    monitor: Option<MonitorHandle>,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn PortBackend>, config: ConnectionConfig) -> Self {
        Self {
            backend,
            config,
            state: SharedConnectionState::new(),
            link: None,
            monitor: None,
        }
    }

    /// Serial-capable ports on this host, in enumeration order
    pub fn list_candidate_ports(&self) -> Vec<PortInfo> {
        self.backend.available_ports()
    }

    /// Open `port`, or auto-detect the selector when `None`
    pub fn connect(&mut self, port: Option<&str>) -> Result<PortInfo, ConnectionError> {
        let current = self.state.snapshot();
        if !current.state.is_disconnected() {
            return Err(ConnectionError::AlreadyConnected(
                current.port.unwrap_or_default(),
            ));
        }
        // A monitor that gave up may still be parked here
        self.monitor = None;

        self.state.transition(ConnectionState::Connecting);
        let result = match port {
            Some(name) => self.open_explicit(name),
            None => self.auto_detect(),
        };

        match result {
            Ok((info, link)) => {
                info!("Connected to selector on {} ({})", info.name, info.description);
                self.link = Some(link);
                self.state.set_port(Some(info.name.clone()));
                self.state.transition(ConnectionState::Connected);
                Ok(info)
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.state.set_last_error(e.to_string());
                self.state.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn open_explicit(&self, name: &str) -> Result<(PortInfo, Box<dyn SerialLink>), ConnectionError> {
        let info = self
            .backend
            .available_ports()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap_or_else(|| PortInfo::new(name, ""));

        match self.backend.open(name, &self.config.link) {
            Ok(link) => Ok((info, link)),
            Err(OpenError::Busy) => Err(ConnectionError::PortBusy(name.to_string())),
            Err(e) => Err(ConnectionError::OpenFailed {
                port: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn auto_detect(&self) -> Result<(PortInfo, Box<dyn SerialLink>), ConnectionError> {
        let candidates = detection_order(self.backend.available_ports());
        if candidates.is_empty() {
            return Err(ConnectionError::NoDeviceFound);
        }

        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let mut busy = Vec::new();
        let mut quiet_bridge: Option<(PortInfo, Box<dyn SerialLink>)> = None;

        for info in &candidates {
            let mut link = match self.backend.open(&info.name, &self.config.link) {
                Ok(link) => link,
                Err(OpenError::Busy) => {
                    debug!("{} is busy", info.name);
                    busy.push(info.name.clone());
                    continue;
                }
                Err(e) => {
                    debug!("Skipping {}: {}", info.name, e);
                    continue;
                }
            };

            let (verdict, received) = probe_link(link.as_mut(), timeout, self.config.max_line_len);
            debug!("Probed {}: {:?} after {} bytes", info.name, verdict, received.len());
            match verdict {
                ProbeVerdict::Framed => return Ok((info.clone(), ReplayLink::wrap(link, received))),
                ProbeVerdict::Silent if info.is_known_bridge() && quiet_bridge.is_none() => {
                    quiet_bridge = Some((info.clone(), link));
                }
                _ => {}
            }
        }

        if let Some(found) = quiet_bridge {
            info!("No port spoke; using quiet bridge {}", found.0.name);
            return Ok(found);
        }

        if !busy.is_empty() && busy.len() == candidates.len() {
            return Err(ConnectionError::PortBusy(busy.remove(0)));
        }
        Err(ConnectionError::NoDeviceFound)
    }

    /// Hand the open link to a monitor thread delivering to `events`
    pub fn start_monitoring(
        &mut self,
        roster: CharacterRoster,
        events: Sender<MonitorEvent>,
    ) -> Result<(), ConnectionError> {
        let link = self.link.take().ok_or(ConnectionError::NotConnected)?;
        let decoder = SelectionDecoder::new(link.name(), roster, self.config.max_line_len);

        self.state.transition(ConnectionState::Monitoring);
        let spawned = SelectorMonitor::new(
            Arc::clone(&self.backend),
            self.config.link,
            self.config.reconnect,
            self.state.clone(),
        )
        .spawn(link, decoder, events);

        match spawned {
            Ok(handle) => {
                self.monitor = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.set_last_error(e.to_string());
                self.state.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Release the link and stop monitoring. Always succeeds.
    pub fn disconnect(&mut self) {
        if let Some(mut handle) = self.monitor.take() {
            handle.stop();
        }
        self.link = None;

        if !self.state.state().is_disconnected() {
            info!("Disconnected from selector");
            self.state.transition(ConnectionState::Disconnected);
        }
    }

    pub fn state(&self) -> ConnectionSnapshot {
        self.state.snapshot()
    }

    /// Shared state handle for observers on other threads
    pub fn shared_state(&self) -> SharedConnectionState {
        self.state.clone()
    }

    pub fn monitor_stats(&self) -> Option<MonitorStats> {
        self.monitor.as_ref().map(MonitorHandle::stats)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
