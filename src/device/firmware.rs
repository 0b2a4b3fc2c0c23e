//! Cooperative selector main loop

use super::encoder::EncoderCounter;
use super::input::{InputConfig, InputStateMachine, SelectorDisplay, StepOutcome};
use crate::protocol::{CharacterRoster, SelectorMessage};
use std::io::Write;
use tracing::{info, warn};

/// Ties the input state machine to a display and the serial line.
///
/// The encoder counter is borrowed because the interrupt handler owns the
/// other reference to it. Serial writes are fire-and-forget: a failed write
/// is logged and the commit is lost.
pub struct SelectorFirmware<'c, D, W> {
    counter: &'c EncoderCounter,
    machine: InputStateMachine,
    roster: CharacterRoster,
    display: D,
    serial: W,
}

impl<'c, D, W> SelectorFirmware<'c, D, W>
where
    D: SelectorDisplay,
    W: Write,
{
    pub fn new(
        counter: &'c EncoderCounter,
        roster: CharacterRoster,
        config: InputConfig,
        display: D,
        serial: W,
    ) -> Self {
        let config = config.with_character_count(roster.len());
        Self {
            counter,
            machine: InputStateMachine::new(config),
            roster,
            display,
            serial,
        }
    }

    /// Announce the device on the serial line
    pub fn boot(&mut self) {
        info!("Selector starting with {} characters", self.roster.len());
        let banner = format!("storydial ready characters={}\n", self.roster.len());
        self.write_line(&banner);
    }

    /// One iteration of the main loop
    pub fn run_once(&mut self, button_level: bool, now_ms: u64) -> StepOutcome {
        let raw = i64::from(self.counter.load());
        let outcome = self
            .machine
            .step(raw, button_level, now_ms, &mut self.display);

        if let Some(index) = outcome.changed {
            if let Some(name) = self.roster.name(index) {
                let line = format!("showing index={} name={}\n", index, name);
                self.write_line(&line);
            }
        }

        if let Some(index) = outcome.committed {
            match self.roster.name(index) {
                Some(name) => {
                    let line = SelectorMessage::new(index, name).to_line();
                    self.write_line(&line);
                }
                None => warn!("Committed index {} has no character", index),
            }
        }

        outcome
    }

    fn write_line(&mut self, line: &str) {
        let result = self
            .serial
            .write_all(line.as_bytes())
            .and_then(|_| self.serial.flush());
        if let Err(e) = result {
            warn!("Serial write failed: {}", e);
        }
    }

    pub fn machine(&self) -> &InputStateMachine {
        &self.machine
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn serial(&self) -> &W {
        &self.serial
    }

    pub fn into_parts(self) -> (D, W) {
        (self.display, self.serial)
    }
}
