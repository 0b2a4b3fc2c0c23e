//! Coalescing dispatch of selections to the orchestrator
//!
//! Each device gets a lane: one worker thread and a single pending slot.
//! While a generation runs, newer selections from the same device replace
//! whatever is pending, so a burst of commits costs at most one extra run
//! and that run uses the latest selection.

use super::orchestrator::{GenerationOrchestrator, GenerationOutcome};
use crate::protocol::SelectionEvent;
use crate::{BridgeError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened to a submitted selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The lane was idle; generation starts now
    Started,
    /// A run is in progress; this selection runs next
    Queued,
    /// A run is in progress and this selection replaced a pending one
    Superseded,
}

/// A finished generation, delivered on the dispatcher's report channel
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub request_id: Uuid,
    pub event: SelectionEvent,
    pub outcome: GenerationOutcome,
    pub elapsed_ms: u64,
    /// Selections dropped in favour of this one while the lane was busy
    pub superseded: u32,
}

#[derive(Debug, Default)]
struct LaneSlot {
    pending: Option<SelectionEvent>,
    superseded: u32,
    running: bool,
    epoch: u64,
    shutdown: bool,
}

#[derive(Debug, Default)]
struct Lane {
    slot: Mutex<LaneSlot>,
    wake: Condvar,
}

impl Lane {
    fn close(&self) {
        let mut slot = self.slot.lock();
        slot.shutdown = true;
        slot.pending = None;
        self.wake.notify_all();
    }
}

/// Routes selections to per-device workers.
pub struct GenerationDispatcher {
    orchestrator: Arc<GenerationOrchestrator>,
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    report_tx: Sender<GenerationReport>,
    shutdown: AtomicBool,
}

impl GenerationDispatcher {
    /// Create a dispatcher and the receiver its reports arrive on
    pub fn new(orchestrator: Arc<GenerationOrchestrator>) -> (Self, Receiver<GenerationReport>) {
        let (report_tx, report_rx) = unbounded();
        let dispatcher = Self {
            orchestrator,
            lanes: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            report_tx,
            shutdown: AtomicBool::new(false),
        };
        (dispatcher, report_rx)
    }

    pub fn orchestrator(&self) -> &Arc<GenerationOrchestrator> {
        &self.orchestrator
    }

    /// Hand a selection to its device lane. Never waits for generation.
    pub fn submit(&self, event: SelectionEvent) -> Result<SubmitOutcome> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelError("dispatcher is shut down".to_string()));
        }

        let lane = self.lane_for(&event.device)?;
        let mut slot = lane.slot.lock();
        let outcome = if !slot.running && slot.pending.is_none() {
            // Claim the lane so a second submit before the worker wakes queues
            slot.running = true;
            SubmitOutcome::Started
        } else if slot.pending.is_some() {
            slot.superseded += 1;
            SubmitOutcome::Superseded
        } else {
            SubmitOutcome::Queued
        };

        debug!(
            "Selection {} ({}) from {}: {:?}",
            event.index, event.character_name, event.device, outcome
        );
        slot.pending = Some(event);
        lane.wake.notify_one();
        Ok(outcome)
    }

    /// Forget pending work for `device`; a run already in flight finishes
    /// but its report is discarded
    pub fn end_session(&self, device: &str) {
        let lanes = self.lanes.lock();
        let Some(lane) = lanes.get(device) else {
            return;
        };
        let mut slot = lane.slot.lock();
        slot.epoch += 1;
        slot.superseded = 0;
        if slot.pending.take().is_some() {
            info!("Dropped pending selection for {}: session ended", device);
        }
    }

    /// Whether `device` has a run in progress or waiting
    pub fn is_busy(&self, device: &str) -> bool {
        self.lanes
            .lock()
            .get(device)
            .map(|lane| {
                let slot = lane.slot.lock();
                slot.running || slot.pending.is_some()
            })
            .unwrap_or(false)
    }

    /// Stop every worker after its current run and wait for them
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        for lane in self.lanes.lock().values() {
            lane.close();
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!("Generation worker panicked");
            }
        }
        info!("Generation dispatcher stopped");
    }

    fn lane_for(&self, device: &str) -> Result<Arc<Lane>> {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get(device) {
            return Ok(Arc::clone(lane));
        }

        let lane = Arc::new(Lane::default());
        let worker = LaneWorker {
            device: device.to_string(),
            lane: Arc::clone(&lane),
            orchestrator: Arc::clone(&self.orchestrator),
            report_tx: self.report_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("generation {}", device))
            .spawn(move || worker.run())
            .map_err(|e| BridgeError::IOError(format!("Failed to spawn generation worker: {}", e)))?;

        debug!("Opened generation lane for {}", device);
        self.workers.lock().push(handle);
        lanes.insert(device.to_string(), Arc::clone(&lane));
        Ok(lane)
    }
}

impl Drop for GenerationDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct LaneWorker {
    device: String,
    lane: Arc<Lane>,
    orchestrator: Arc<GenerationOrchestrator>,
    report_tx: Sender<GenerationReport>,
}

impl LaneWorker {
    fn run(self) {
        debug!("Generation worker for {} started", self.device);

        loop {
            let (event, superseded, epoch) = {
                let mut slot = self.lane.slot.lock();
                loop {
                    if slot.shutdown {
                        debug!("Generation worker for {} stopped", self.device);
                        return;
                    }
                    if let Some(event) = slot.pending.take() {
                        slot.running = true;
                        let superseded = std::mem::take(&mut slot.superseded);
                        break (event, superseded, slot.epoch);
                    }
                    slot.running = false;
                    self.lane.wake.wait(&mut slot);
                }
            };

            let started = Instant::now();
            let request = self.orchestrator.build_request(&event);
            let request_id = request.request_id;
            let outcome = self.orchestrator.handle_request(&request);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let current_epoch = {
                let mut slot = self.lane.slot.lock();
                if slot.pending.is_none() {
                    slot.running = false;
                }
                slot.epoch
            };

            if current_epoch != epoch {
                info!(
                    "Discarding generation {} for {}: session ended during the run",
                    request_id, self.device
                );
                continue;
            }

            match &outcome {
                GenerationOutcome::Complete(result) => info!(
                    "Generation {} complete in {} ms via {}",
                    request_id, elapsed_ms, result.provider_used
                ),
                GenerationOutcome::Failed(failure) => {
                    warn!("Generation {} failed after {} ms: {}", request_id, elapsed_ms, failure)
                }
            }

            let report = GenerationReport {
                request_id,
                event,
                outcome,
                elapsed_ms,
                superseded,
            };
            if self.report_tx.send(report).is_err() {
                debug!("Report receiver dropped; discarding {}", request_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::provider::{ContentProvider, ProviderResult};
    use crate::generation::request::{ContentRequest, StoryPreferences};
    use crate::generation::{OrchestratorConfig, ProviderConfig, ProviderRegistry};
    use crossbeam_channel::bounded;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::time::Duration;

    /// Signals each call, then waits for a release before answering
    struct GatedContent {
        started: Sender<String>,
        release: Receiver<()>,
    }

    impl ContentProvider for GatedContent {
        fn name(&self) -> &str {
            "gated"
        }

        fn generate<'a>(&'a self, request: &'a ContentRequest) -> BoxFuture<'a, ProviderResult<String>> {
            async move {
                let _ = self.started.send(request.character_name.clone());
                let release = self.release.clone();
                let _ = tokio::task::spawn_blocking(move || release.recv_timeout(Duration::from_secs(5))).await;
                Ok(format!("story about {}", request.character_name))
            }
            .boxed()
        }
    }

    fn gated_dispatcher() -> (GenerationDispatcher, Receiver<GenerationReport>, Receiver<String>, Sender<()>) {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = bounded(16);
        let mut registry = ProviderRegistry::with_builtins();
        registry.register_content(Arc::new(GatedContent {
            started: started_tx,
            release: release_rx,
        }));
        let config = OrchestratorConfig::default()
            .with_content_timeout_ms(10_000)
            .with_providers(ProviderConfig::default().with_primary_content("gated"));
        let orchestrator = GenerationOrchestrator::new(config, StoryPreferences::default(), &registry).unwrap();
        let (dispatcher, reports) = GenerationDispatcher::new(Arc::new(orchestrator));
        (dispatcher, reports, started_rx, release_tx)
    }

    fn wait() -> Duration {
        Duration::from_secs(5)
    }

    #[test]
    fn test_burst_coalesces_to_latest() {
        let (dispatcher, reports, started, release) = gated_dispatcher();
        let device = "/dev/ttyUSB0";

        let first = dispatcher.submit(SelectionEvent::new(device, 0, "Rubble")).unwrap();
        assert_eq!(first, SubmitOutcome::Started);
        assert_eq!(started.recv_timeout(wait()).unwrap(), "Rubble");

        let second = dispatcher.submit(SelectionEvent::new(device, 1, "Skye")).unwrap();
        let third = dispatcher.submit(SelectionEvent::new(device, 2, "Marshall")).unwrap();
        assert_eq!(second, SubmitOutcome::Queued);
        assert_eq!(third, SubmitOutcome::Superseded);
        assert!(dispatcher.is_busy(device));

        release.send(()).unwrap();
        let report = reports.recv_timeout(wait()).unwrap();
        assert_eq!(report.event.character_name, "Rubble");
        assert_eq!(report.superseded, 0);

        assert_eq!(started.recv_timeout(wait()).unwrap(), "Marshall");
        release.send(()).unwrap();
        let report = reports.recv_timeout(wait()).unwrap();
        assert_eq!(report.event.character_name, "Marshall");
        assert_eq!(report.superseded, 1);
        assert_eq!(report.outcome.result().unwrap().text, "story about Marshall");

        // Exactly two runs
        assert!(started.recv_timeout(Duration::from_millis(200)).is_err());
        dispatcher.shutdown();
    }

    #[test]
    fn test_devices_do_not_coalesce_together() {
        let (dispatcher, reports, started, release) = gated_dispatcher();

        assert_eq!(
            dispatcher.submit(SelectionEvent::new("/dev/ttyUSB0", 0, "Rubble")).unwrap(),
            SubmitOutcome::Started
        );
        assert_eq!(
            dispatcher.submit(SelectionEvent::new("/dev/ttyACM0", 1, "Skye")).unwrap(),
            SubmitOutcome::Started
        );

        let mut names = vec![
            started.recv_timeout(wait()).unwrap(),
            started.recv_timeout(wait()).unwrap(),
        ];
        names.sort();
        assert_eq!(names, vec!["Rubble", "Skye"]);

        release.send(()).unwrap();
        release.send(()).unwrap();
        reports.recv_timeout(wait()).unwrap();
        reports.recv_timeout(wait()).unwrap();
        dispatcher.shutdown();
    }

    #[test]
    fn test_end_session_discards_results() {
        let (dispatcher, reports, started, release) = gated_dispatcher();
        let device = "/dev/ttyUSB0";

        dispatcher.submit(SelectionEvent::new(device, 0, "Rubble")).unwrap();
        started.recv_timeout(wait()).unwrap();
        dispatcher.submit(SelectionEvent::new(device, 1, "Skye")).unwrap();

        dispatcher.end_session(device);
        release.send(()).unwrap();

        assert!(reports.recv_timeout(Duration::from_millis(300)).is_err());
        assert!(started.try_recv().is_err());
        assert!(!dispatcher.is_busy(device));

        // The lane keeps working for the next session
        assert_eq!(
            dispatcher.submit(SelectionEvent::new(device, 2, "Marshall")).unwrap(),
            SubmitOutcome::Started
        );
        assert_eq!(started.recv_timeout(wait()).unwrap(), "Marshall");
        release.send(()).unwrap();
        assert_eq!(reports.recv_timeout(wait()).unwrap().event.character_name, "Marshall");
        dispatcher.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let orchestrator = GenerationOrchestrator::new(
            OrchestratorConfig::default(),
            StoryPreferences::default(),
            &ProviderRegistry::with_builtins(),
        )
        .unwrap();
        let (dispatcher, _reports) = GenerationDispatcher::new(Arc::new(orchestrator));
        dispatcher.shutdown();
        let err = dispatcher.submit(SelectionEvent::new("/dev/ttyUSB0", 0, "Rubble")).unwrap_err();
        assert!(matches!(err, BridgeError::ChannelError(_)));
    }
}
