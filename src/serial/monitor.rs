//! Background selector monitor
//!
//! Reads the link on its own thread, decodes commit lines and forwards them
//! to a single consumer. The consumer is never waited on beyond an unbounded
//! channel send, so slow generation cannot stall the reader.

use super::backoff::ReconnectPolicy;
use super::port::{LinkSettings, PortBackend, SerialLink};
use super::state::{ConnectionState, SharedConnectionState};
use super::ConnectionError;
use crate::protocol::{DecodeStats, SelectionDecoder, SelectionEvent};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const READ_CHUNK: usize = 256;
const STOP_POLL: Duration = Duration::from_millis(20);

/// Events delivered by the monitor
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A validated commit
    Selection(SelectionEvent),
    /// The link dropped and was reopened
    Reconnected { port: String },
    /// The link dropped and every reconnect attempt failed
    LinkLost(ConnectionError),
    /// The monitor thread exited
    Stopped,
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub decode: DecodeStats,
    pub reconnects: u32,
}

/// Handle to a running monitor thread
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<MonitorStats>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Ask the monitor to exit after the current read and wait for it.
    ///
    /// A partially received line is discarded. The link is closed when the
    /// thread exits.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Monitor thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn stats(&self) -> MonitorStats {
        *self.stats.lock()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads one selector link until stopped or the link is gone for good
pub struct SelectorMonitor {
    backend: Arc<dyn PortBackend>,
    settings: LinkSettings,
    policy: ReconnectPolicy,
    state: SharedConnectionState,
    stop: Arc<AtomicBool>,
    stats: Arc<Mutex<MonitorStats>>,
}

impl SelectorMonitor {
    pub fn new(
        backend: Arc<dyn PortBackend>,
        settings: LinkSettings,
        policy: ReconnectPolicy,
        state: SharedConnectionState,
    ) -> Self {
        Self {
            backend,
            settings,
            policy,
            state,
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(Mutex::new(MonitorStats::default())),
        }
    }

    /// Start reading `link` on a dedicated thread
    pub fn spawn(
        self,
        link: Box<dyn SerialLink>,
        decoder: SelectionDecoder,
        events: Sender<MonitorEvent>,
    ) -> Result<MonitorHandle, ConnectionError> {
        let stop = Arc::clone(&self.stop);
        let stats = Arc::clone(&self.stats);
        let thread = thread::Builder::new()
            .name(format!("monitor {}", link.name()))
            .spawn(move || self.run(link, decoder, events))?;

        Ok(MonitorHandle {
            stop,
            stats,
            thread: Some(thread),
        })
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(self, link: Box<dyn SerialLink>, mut decoder: SelectionDecoder, events: Sender<MonitorEvent>) {
        let port = link.name().to_string();
        info!("Monitoring selector on {}", port);

        let mut link = Some(link);
        let mut buf = [0u8; READ_CHUNK];

        while !self.stopped() {
            let Some(active) = link.as_mut() else {
                break;
            };

            let read = match active.read(&mut buf) {
                // End of stream: the device side closed, so no byte will follow
                Ok(0) => Err(io::Error::new(ErrorKind::UnexpectedEof, "link reached end of stream")),
                other => other,
            };

            match read {
                Ok(n) => {
                    let selections = decoder.push(&buf[..n]);
                    self.stats.lock().decode = decoder.stats();
                    for event in selections {
                        info!("Selector committed {} ({})", event.character_name, event.index);
                        if events.send(MonitorEvent::Selection(event)).is_err() {
                            warn!("Selection consumer went away; stopping monitor");
                            self.stop.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    let reason = e.to_string();
                    warn!("Link to {} failed: {}", port, reason);
                    // Close before reopening; a partial line died with the link
                    link = None;
                    decoder.reset();
                    self.state.transition(ConnectionState::Error(reason.clone()));

                    match self.reconnect(&port) {
                        Some(reopened) => {
                            link = Some(reopened);
                            self.state.transition(ConnectionState::Monitoring);
                            self.stats.lock().reconnects += 1;
                            info!("Reconnected to {}", port);
                            let _ = events.send(MonitorEvent::Reconnected { port: port.clone() });
                        }
                        None if self.stopped() => break,
                        None => {
                            error!("Giving up on {} after link loss", port);
                            self.state.transition(ConnectionState::Disconnected);
                            let _ = events.send(MonitorEvent::LinkLost(ConnectionError::LinkLost {
                                port: port.clone(),
                                reason,
                            }));
                            break;
                        }
                    }
                }
            }
        }

        if decoder.has_partial() {
            debug!("Discarding partial line from {}", port);
            decoder.reset();
        }
        let _ = events.send(MonitorEvent::Stopped);
        info!("Monitor for {} stopped", port);
    }

    /// Reopen `port` following the backoff policy
    fn reconnect(&self, port: &str) -> Option<Box<dyn SerialLink>> {
        for attempt in 1..=self.policy.max_attempts {
            let delay = self.policy.delay_for(attempt)?;
            debug!("Reconnect attempt {} to {} in {:?}", attempt, port, delay);
            if !self.sleep_unless_stopped(delay) {
                return None;
            }

            match self.backend.open(port, &self.settings) {
                Ok(link) => return Some(link),
                Err(e) => {
                    self.state.transition(ConnectionState::Error(format!(
                        "reconnect attempt {} failed: {}",
                        attempt, e
                    )));
                }
            }
        }
        None
    }

    /// Returns false if a stop was requested while sleeping
    fn sleep_unless_stopped(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}
