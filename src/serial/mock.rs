//! In-memory serial ports
//!
//! [`MockBackend`] stands in for the host's serial ports. Each port is driven
//! through a [`MockPortHandle`]: bytes sent while the port is open arrive on
//! the link, bytes sent while it is closed are lost, like a real selector
//! talking to nobody.

use super::port::{LinkSettings, OpenError, PortBackend, PortInfo, SerialLink};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::sync::Arc;

enum Signal {
    Data(Vec<u8>),
    Fail(String),
    End,
}

#[derive(Default)]
struct PortState {
    present: bool,
    busy: bool,
    greeting: Option<Vec<u8>>,
    open_count: usize,
    link: Option<Sender<Signal>>,
}

struct MockPort {
    info: PortInfo,
    state: Arc<Mutex<PortState>>,
}

/// A set of scripted serial ports
#[derive(Clone, Default)]
pub struct MockBackend {
    ports: Arc<Mutex<Vec<MockPort>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug in a new port; enumeration order follows insertion order
    pub fn add_port(&self, name: &str, description: &str) -> MockPortHandle {
        let state = Arc::new(Mutex::new(PortState {
            present: true,
            ..Default::default()
        }));
        self.ports.lock().push(MockPort {
            info: PortInfo::new(name, description),
            state: Arc::clone(&state),
        });
        MockPortHandle {
            name: name.to_string(),
            state,
        }
    }
}

impl PortBackend for MockBackend {
    fn available_ports(&self) -> Vec<PortInfo> {
        self.ports
            .lock()
            .iter()
            .filter(|port| port.state.lock().present)
            .map(|port| port.info.clone())
            .collect()
    }

    fn open(&self, port: &str, settings: &LinkSettings) -> Result<Box<dyn SerialLink>, OpenError> {
        let ports = self.ports.lock();
        let entry = ports
            .iter()
            .find(|p| p.info.name == port)
            .ok_or(OpenError::NotFound)?;

        let mut state = entry.state.lock();
        if !state.present {
            return Err(OpenError::NotFound);
        }
        if state.busy {
            return Err(OpenError::Busy);
        }

        let (tx, rx) = unbounded();
        if let Some(greeting) = &state.greeting {
            let _ = tx.send(Signal::Data(greeting.clone()));
        }
        // A newer open replaces the previous link
        state.link = Some(tx);
        state.open_count += 1;

        Ok(Box::new(MockLink {
            name: port.to_string(),
            rx,
            pending: Vec::new(),
            ended: false,
            read_timeout: settings.read_timeout(),
            open_id: state.open_count,
            port: Arc::clone(&entry.state),
        }))
    }
}

/// Test-side control of one mock port
#[derive(Clone)]
pub struct MockPortHandle {
    name: String,
    state: Arc<Mutex<PortState>>,
}

impl MockPortHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send raw bytes; returns false when no link is open and they were lost
    pub fn send_bytes(&self, bytes: &[u8]) -> bool {
        let state = self.state.lock();
        match &state.link {
            Some(_) if bytes.is_empty() => true,
            Some(tx) => tx.send(Signal::Data(bytes.to_vec())).is_ok(),
            None => false,
        }
    }

    /// Send one line, appending the newline
    pub fn send_line(&self, line: &str) -> bool {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.send_bytes(&bytes)
    }

    /// Bytes written to every new link as soon as it opens
    pub fn set_greeting(&self, greeting: Option<&str>) {
        self.state.lock().greeting = greeting.map(|g| g.as_bytes().to_vec());
    }

    /// Break the currently open link with an I/O error
    pub fn fail_link(&self, reason: &str) {
        let mut state = self.state.lock();
        if let Some(tx) = state.link.take() {
            let _ = tx.send(Signal::Fail(reason.to_string()));
        }
    }

    /// End the open link's stream; its reads return `Ok(0)` from then on
    pub fn end_stream(&self) {
        let mut state = self.state.lock();
        if let Some(tx) = state.link.take() {
            let _ = tx.send(Signal::End);
        }
    }

    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    /// Plug or unplug the device; unplugging breaks an open link
    pub fn set_present(&self, present: bool) {
        let mut state = self.state.lock();
        state.present = present;
        if !present {
            if let Some(tx) = state.link.take() {
                let _ = tx.send(Signal::Fail("device unplugged".to_string()));
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Whether a link is currently open on this port
    pub fn is_open(&self) -> bool {
        self.state.lock().link.is_some()
    }
}

struct MockLink {
    name: String,
    rx: Receiver<Signal>,
    pending: Vec<u8>,
    ended: bool,
    read_timeout: std::time::Duration,
    open_id: usize,
    port: Arc<Mutex<PortState>>,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            if self.ended {
                return Ok(0);
            }
            match self.rx.recv_timeout(self.read_timeout) {
                Ok(Signal::Data(bytes)) => self.pending = bytes,
                Ok(Signal::End) => {
                    self.ended = true;
                    return Ok(0);
                }
                Ok(Signal::Fail(reason)) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, reason))
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port reopened"))
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl SerialLink for MockLink {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        let mut state = self.port.lock();
        if state.open_count == self.open_id {
            state.link = None;
        }
    }
}
