//! End-to-end bridge: selector port in, generation reports out
//!
//! Connects the pieces: Port -> Monitor -> Dispatcher -> Orchestrator -> Reports

use crate::generation::{
    ContentRequest, GenerationDispatcher, GenerationOrchestrator, GenerationOutcome, GenerationReport,
    ProviderRegistry,
};
use crate::integration::config::BridgeConfig;
use crate::protocol::CharacterRoster;
use crate::serial::{
    ConnectionError, ConnectionManager, ConnectionSnapshot, MonitorEvent, MonitorStats, PortBackend, PortInfo,
};
use crate::{BridgeError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Owns the connection, the generation pipeline and the thread between them
pub struct SelectorBridge {
    config: BridgeConfig,
    manager: ConnectionManager,
    orchestrator: Arc<GenerationOrchestrator>,
    dispatcher: Arc<GenerationDispatcher>,
    reports: Receiver<GenerationReport>,
    link_errors_tx: Sender<ConnectionError>,
    link_errors_rx: Receiver<ConnectionError>,
    router: Option<JoinHandle<()>>,
}

impl SelectorBridge {
    /// Validate `config`, resolve its providers and build the pipeline.
    /// Nothing is opened until [`connect`](Self::connect).
    pub fn new(config: BridgeConfig, backend: Arc<dyn PortBackend>, registry: &ProviderRegistry) -> Result<Self> {
        config.validate()?;

        let orchestrator = Arc::new(GenerationOrchestrator::new(
            config.generation.clone(),
            config.preferences.clone(),
            registry,
        )?);
        let (dispatcher, reports) = GenerationDispatcher::new(Arc::clone(&orchestrator));
        let manager = ConnectionManager::new(backend, config.connection.clone());
        let (link_errors_tx, link_errors_rx) = unbounded();

        Ok(Self {
            config,
            manager,
            orchestrator,
            dispatcher: Arc::new(dispatcher),
            reports,
            link_errors_tx,
            link_errors_rx,
            router: None,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn list_ports(&self) -> Vec<PortInfo> {
        self.manager.list_candidate_ports()
    }

    /// Open `port`, falling back to the configured port, then to auto-detection
    pub fn connect(&mut self, port: Option<&str>) -> Result<PortInfo> {
        let port = port.or(self.config.port.as_deref()).map(str::to_string);
        Ok(self.manager.connect(port.as_deref())?)
    }

    /// Start turning commits from the connected selector into generations
    pub fn start_monitoring(&mut self) -> Result<()> {
        self.join_router();

        let device = self.manager.state().port.ok_or(ConnectionError::NotConnected)?;
        let (events_tx, events_rx) = unbounded();
        self.manager.start_monitoring(self.config.characters.clone(), events_tx)?;

        let router = EventRouter {
            device: device.clone(),
            events: events_rx,
            dispatcher: Arc::clone(&self.dispatcher),
            link_errors: self.link_errors_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("router {}", device))
            .spawn(move || router.run())
            .map_err(|e| BridgeError::IOError(format!("Failed to spawn event router: {}", e)))?;
        self.router = Some(handle);

        info!("Monitoring selector on {}", device);
        Ok(())
    }

    /// Stop monitoring and release the port. Always succeeds.
    pub fn disconnect(&mut self) {
        let device = self.manager.state().port;
        self.manager.disconnect();
        self.join_router();
        if let Some(device) = device {
            self.dispatcher.end_session(&device);
        }
    }

    pub fn connection_state(&self) -> ConnectionSnapshot {
        self.manager.state()
    }

    pub fn monitor_stats(&self) -> Option<MonitorStats> {
        self.manager.monitor_stats()
    }

    /// Finished generations, in completion order
    pub fn reports(&self) -> Receiver<GenerationReport> {
        self.reports.clone()
    }

    /// Links that were lost after every reconnect attempt failed
    pub fn link_errors(&self) -> Receiver<ConnectionError> {
        self.link_errors_rx.clone()
    }

    pub fn orchestrator(&self) -> &Arc<GenerationOrchestrator> {
        &self.orchestrator
    }

    pub fn roster(&self) -> &CharacterRoster {
        &self.config.characters
    }

    /// Generate a story for `character` directly, without a selector
    pub fn generate_for(&self, character: &str) -> Result<GenerationOutcome> {
        let roster = &self.config.characters;
        let index = roster
            .index_of(character)
            .ok_or_else(|| BridgeError::ConfigError(format!("Unknown character '{}'", character)))?;
        let name = roster.name(index).unwrap_or(character);
        let request = ContentRequest::for_character(name, &self.orchestrator.preferences());
        Ok(self.orchestrator.handle_request(&request))
    }

    /// Disconnect and stop all generation workers
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.dispatcher.shutdown();
    }

    fn join_router(&mut self) {
        if let Some(router) = self.router.take() {
            if router.join().is_err() {
                warn!("Event router panicked");
            }
        }
    }
}

impl Drop for SelectorBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Moves monitor events into the dispatcher
struct EventRouter {
    device: String,
    events: Receiver<MonitorEvent>,
    dispatcher: Arc<GenerationDispatcher>,
    link_errors: Sender<ConnectionError>,
}

impl EventRouter {
    fn run(self) {
        debug!("Event router for {} started", self.device);

        for event in self.events.iter() {
            match event {
                MonitorEvent::Selection(selection) => {
                    if let Err(e) = self.dispatcher.submit(selection) {
                        warn!("Failed to dispatch selection: {}", e);
                    }
                }
                MonitorEvent::Reconnected { port } => {
                    info!("Selector back on {}", port);
                }
                MonitorEvent::LinkLost(e) => {
                    warn!("Selector on {} lost: {}", self.device, e);
                    self.dispatcher.end_session(&self.device);
                    let _ = self.link_errors.send(e);
                }
                MonitorEvent::Stopped => {
                    self.dispatcher.end_session(&self.device);
                    break;
                }
            }
        }

        debug!("Event router for {} stopped", self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::{ConnectionState, MockBackend};

    fn bridge(backend: &MockBackend) -> SelectorBridge {
        SelectorBridge::new(
            BridgeConfig::default(),
            Arc::new(backend.clone()),
            &ProviderRegistry::with_builtins(),
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_unknown_provider() {
        let mut config = BridgeConfig::default();
        config.generation.providers.primary_content = "openai".to_string();
        let result = SelectorBridge::new(config, Arc::new(MockBackend::new()), &ProviderRegistry::with_builtins());
        assert!(matches!(result, Err(BridgeError::ConfigError(_))));
    }

    #[test]
    fn test_start_monitoring_requires_connection() {
        let mut bridge = bridge(&MockBackend::new());
        let err = bridge.start_monitoring().unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionError(ConnectionError::NotConnected)));
    }

    #[test]
    fn test_generate_for_known_character() {
        let bridge = bridge(&MockBackend::new());
        let outcome = bridge.generate_for("skye").unwrap();
        assert_eq!(outcome.result().unwrap().character_name, "Skye");
        assert!(bridge.generate_for("Chase").is_err());
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let backend = MockBackend::new();
        backend.add_port("/dev/ttyUSB0", "CP2102");
        let mut bridge = bridge(&backend);
        bridge.connect(Some("/dev/ttyUSB0")).unwrap();
        bridge.disconnect();
        bridge.disconnect();
        assert_eq!(bridge.connection_state().state, ConnectionState::Disconnected);
    }
}
