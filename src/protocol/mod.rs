//! Selector line protocol
//!
//! The selector announces every commit as one newline-terminated text line:
//!
//! ```text
//! SELECTED index=1 name=Skye
//! ```
//!
//! Lines without the `SELECTED` marker are diagnostics and are ignored. Nothing is
//! acknowledged, so delivery is at-most-once and a commit sent while the host
//! is away is lost.

pub mod event;
pub mod framing;
pub mod message;
pub mod roster;

use thiserror::Error;

pub use event::{DecodeStats, SelectionDecoder, SelectionEvent};
pub use framing::{FramedLine, LineFramer, DEFAULT_MAX_LINE_LEN};
pub use message::{parse_line, SelectorMessage, COMMIT_MARKER};
pub use roster::CharacterRoster;

/// Errors for lines received from the selector
///
/// All of these are recovered locally by dropping the offending line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed commit line: {0}")]
    Malformed(String),

    #[error("Line exceeded {max} bytes and was discarded")]
    LineTooLong { max: usize },

    #[error("Unknown character '{name}' at index {index}")]
    UnknownCharacter { index: usize, name: String },

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,
}
