//! Selector device input handling
//!
//! Everything the selector runs between the encoder pins and the serial line:
//! - [`EncoderCounter`] / [`QuadratureDecoder`]: the only code meant for
//!   interrupt context; it touches nothing but one atomic counter
//! - [`ButtonDebouncer`]: turns a noisy active-low button into clean edges
//! - [`InputStateMachine`]: throttled display updates and commit detection
//! - [`SelectorFirmware`]: the cooperative main loop that glues them to a
//!   display and the serial link
//! - [`simulator`]: replays scripted encoder/button traces on the host

pub mod debounce;
pub mod encoder;
pub mod firmware;
pub mod input;
pub mod simulator;

pub use debounce::{ButtonDebouncer, ButtonEdge, DEFAULT_DEBOUNCE_MS};
pub use encoder::{selection_index, EncoderCounter, QuadratureDecoder};
pub use firmware::SelectorFirmware;
pub use input::{
    InputConfig, InputEvent, InputState, InputStateMachine, SelectorDisplay, StepOutcome,
    DEFAULT_DISPLAY_INTERVAL_MS,
};
pub use simulator::{parse_script, run_script, ScriptAction, ScriptStep, SimulationReport};
