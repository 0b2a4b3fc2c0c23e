//! Host-side replay of selector input traces
//!
//! A script is one action per line, timestamped in milliseconds:
//!
//! ```text
//! # spin two steps back, then press
//! 0    rotate -2
//! 400  press
//! 480  release
//! ```
//!
//! Rotations are driven through the quadrature decoder one Gray-code
//! transition per step, the same path the encoder interrupt takes.

use super::encoder::{EncoderCounter, QuadratureDecoder};
use super::firmware::SelectorFirmware;
use super::input::{InputConfig, SelectorDisplay};
use crate::protocol::CharacterRoster;
use crate::{BridgeError, Result};
use serde::Serialize;
use std::convert::Infallible;
use tracing::debug;

/// Main-loop period used while replaying
pub const SIMULATION_TICK_MS: u64 = 10;

// A-leading order of the two encoder lines
const GRAY_SEQUENCE: [(bool, bool); 4] = [(false, false), (true, false), (true, true), (false, true)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    /// Signed number of encoder steps
    Rotate(i32),
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptStep {
    pub at_ms: u64,
    pub action: ScriptAction,
}

/// What the simulated selector did
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    /// Indices drawn on the display, in order
    pub frames: Vec<usize>,
    /// Committed indices, in order
    pub commits: Vec<usize>,
    /// Everything written to the serial line
    pub lines: Vec<String>,
    pub final_raw_position: i32,
}

pub fn parse_script(text: &str) -> Result<Vec<ScriptStep>> {
    let mut steps = Vec::new();

    for (number, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let invalid = |reason: &str| {
            BridgeError::ConfigError(format!("script line {}: {}", number + 1, reason))
        };

        let mut tokens = line.split_whitespace();
        let at_ms = tokens
            .next()
            .and_then(|t| t.parse::<u64>().ok())
            .ok_or_else(|| invalid("expected a timestamp in milliseconds"))?;

        let action = match tokens.next().map(str::to_ascii_lowercase).as_deref() {
            Some("rotate") => {
                let steps = tokens
                    .next()
                    .and_then(|t| t.parse::<i32>().ok())
                    .ok_or_else(|| invalid("rotate needs a signed step count"))?;
                ScriptAction::Rotate(steps)
            }
            Some("press") => ScriptAction::Press,
            Some("release") => ScriptAction::Release,
            Some(other) => return Err(invalid(&format!("unknown action '{}'", other))),
            None => return Err(invalid("missing action")),
        };

        if tokens.next().is_some() {
            return Err(invalid("trailing tokens"));
        }
        steps.push(ScriptStep { at_ms, action });
    }

    steps.sort_by_key(|step| step.at_ms);
    Ok(steps)
}

#[derive(Default)]
struct RecordingDisplay {
    frames: Vec<usize>,
}

impl SelectorDisplay for RecordingDisplay {
    type Error = Infallible;

    fn show(&mut self, index: usize) -> std::result::Result<(), Infallible> {
        self.frames.push(index);
        Ok(())
    }
}

/// Simulated encoder pins feeding the shared counter
struct EncoderPins {
    phase: usize,
    decoder: QuadratureDecoder,
}

impl EncoderPins {
    fn new() -> Self {
        let (a, b) = GRAY_SEQUENCE[0];
        Self {
            phase: 0,
            decoder: QuadratureDecoder::new(a, b),
        }
    }

    fn rotate(&mut self, steps: i32, counter: &EncoderCounter) {
        for _ in 0..steps.unsigned_abs() {
            self.phase = if steps > 0 {
                (self.phase + 1) % GRAY_SEQUENCE.len()
            } else {
                (self.phase + GRAY_SEQUENCE.len() - 1) % GRAY_SEQUENCE.len()
            };
            let (a, b) = GRAY_SEQUENCE[self.phase];
            self.decoder.apply(a, b, counter);
        }
    }
}

/// Replay a script through the selector main loop.
///
/// The loop keeps running after the last action long enough for pending
/// redraws and debounces to settle.
pub fn run_script(steps: &[ScriptStep], roster: CharacterRoster, config: InputConfig) -> SimulationReport {
    let settle_ms = config.display_interval_ms + config.debounce_ms + SIMULATION_TICK_MS * 2;
    let end_ms = steps.last().map(|s| s.at_ms).unwrap_or(0) + settle_ms;

    let counter = EncoderCounter::new();
    let mut pins = EncoderPins::new();
    let mut firmware = SelectorFirmware::new(
        &counter,
        roster,
        config,
        RecordingDisplay::default(),
        Vec::new(),
    );
    firmware.boot();

    let mut button_level = true;
    let mut pending = steps.iter().peekable();
    let mut commits = Vec::new();
    let mut now_ms = 0;

    while now_ms <= end_ms {
        while let Some(step) = pending.next_if(|s| s.at_ms <= now_ms) {
            debug!("t={}ms {:?}", now_ms, step.action);
            match step.action {
                ScriptAction::Rotate(n) => pins.rotate(n, &counter),
                ScriptAction::Press => button_level = false,
                ScriptAction::Release => button_level = true,
            }
        }

        if let Some(index) = firmware.run_once(button_level, now_ms).committed {
            commits.push(index);
        }
        now_ms += SIMULATION_TICK_MS;
    }

    let final_raw_position = counter.load();
    let (display, serial) = firmware.into_parts();
    SimulationReport {
        frames: display.frames,
        commits,
        lines: String::from_utf8_lossy(&serial)
            .lines()
            .map(str::to_string)
            .collect(),
        final_raw_position,
    }
}
