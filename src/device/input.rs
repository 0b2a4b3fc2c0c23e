//! Selector input state machine
//!
//! Runs once per main-loop iteration. Reads the raw encoder position, redraws
//! the display at most once per interval (last value wins) and turns a
//! debounced button press into a commit of whatever is on screen.

use super::debounce::{ButtonDebouncer, ButtonEdge, DEFAULT_DEBOUNCE_MS};
use super::encoder::selection_index;
use std::fmt;
use tracing::{debug, warn};

/// Minimum time between two display redraws
pub const DEFAULT_DISPLAY_INTERVAL_MS: u64 = 250;

/// Anything that can show the character at a selection index
pub trait SelectorDisplay {
    type Error: fmt::Display;

    fn show(&mut self, index: usize) -> Result<(), Self::Error>;
}

/// Configuration for the input state machine
#[derive(Debug, Clone)]
pub struct InputConfig {
    /// Number of selectable characters (N)
    pub character_count: usize,
    pub display_interval_ms: u64,
    pub debounce_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            character_count: 3,
            display_interval_ms: DEFAULT_DISPLAY_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl InputConfig {
    pub fn with_character_count(mut self, count: usize) -> Self {
        self.character_count = count;
        self
    }

    pub fn with_display_interval_ms(mut self, ms: u64) -> Self {
        self.display_interval_ms = ms;
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }
}

/// Discrete events produced by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// The display now shows this index
    SelectionChanged(usize),
    /// The button was pressed while this index was displayed
    SelectionCommitted(usize),
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub changed: Option<usize>,
    pub committed: Option<usize>,
}

impl StepOutcome {
    pub fn events(&self) -> Vec<InputEvent> {
        self.changed
            .map(InputEvent::SelectionChanged)
            .into_iter()
            .chain(self.committed.map(InputEvent::SelectionCommitted))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_none() && self.committed.is_none()
    }
}

/// Snapshot of the state machine's fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputState {
    pub raw_position: i64,
    pub displayed_index: Option<usize>,
    pub last_display_update_ms: Option<u64>,
    pub button_raw: bool,
    pub button_debounced: bool,
    pub last_button_transition_ms: u64,
}

/// Device-side input state machine. Owned by the main loop only.
#[derive(Debug)]
pub struct InputStateMachine {
    config: InputConfig,
    debouncer: ButtonDebouncer,
    raw_position: i64,
    displayed_index: Option<usize>,
    last_display_update_ms: Option<u64>,
    warned_empty: bool,
}

impl InputStateMachine {
    pub fn new(config: InputConfig) -> Self {
        // Button idles high (pull-up, active-low)
        let debouncer = ButtonDebouncer::new(config.debounce_ms, true);
        Self {
            config,
            debouncer,
            raw_position: 0,
            displayed_index: None,
            last_display_update_ms: None,
            warned_empty: false,
        }
    }

    /// Run one iteration with the current raw count, button level and clock.
    ///
    /// The display is handled before the button so a commit in the same
    /// iteration reflects the index that was just drawn.
    pub fn step<D: SelectorDisplay>(
        &mut self,
        raw_position: i64,
        button_level: bool,
        now_ms: u64,
        display: &mut D,
    ) -> StepOutcome {
        self.raw_position = raw_position;

        let mut outcome = StepOutcome {
            changed: self.refresh_display(now_ms, display),
            committed: None,
        };

        if let Some(ButtonEdge::Pressed) = self.debouncer.update(button_level, now_ms) {
            match self.displayed_index {
                Some(index) => {
                    debug!("Committed selection {}", index);
                    outcome.committed = Some(index);
                }
                None => warn!("Button pressed before anything was displayed"),
            }
        }

        outcome
    }

    fn refresh_display<D: SelectorDisplay>(&mut self, now_ms: u64, display: &mut D) -> Option<usize> {
        let target = match selection_index(self.raw_position, self.config.character_count) {
            Some(index) if index < self.config.character_count => index,
            _ => {
                if !self.warned_empty {
                    warn!(
                        "No valid selection for raw position {} with {} characters; skipping draw",
                        self.raw_position, self.config.character_count
                    );
                    self.warned_empty = true;
                }
                return None;
            }
        };

        if self.displayed_index == Some(target) {
            return None;
        }

        let due = match self.last_display_update_ms {
            Some(last) => now_ms.saturating_sub(last) > self.config.display_interval_ms,
            None => true,
        };
        if !due {
            return None;
        }

        match display.show(target) {
            Ok(()) => {
                self.displayed_index = Some(target);
                self.last_display_update_ms = Some(now_ms);
                Some(target)
            }
            Err(e) => {
                warn!("Display update to {} failed: {}", target, e);
                None
            }
        }
    }

    pub fn displayed_index(&self) -> Option<usize> {
        self.displayed_index
    }

    pub fn state(&self) -> InputState {
        InputState {
            raw_position: self.raw_position,
            displayed_index: self.displayed_index,
            last_display_update_ms: self.last_display_update_ms,
            button_raw: self.debouncer.raw_level(),
            button_debounced: self.debouncer.is_pressed(),
            last_button_transition_ms: self.debouncer.last_change_ms(),
        }
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }
}
