//! Typed selection events decoded from the serial byte stream

use super::{parse_line, CharacterRoster, FramedLine, LineFramer, ProtocolError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A validated commit received from a selector. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEvent {
    /// Port the selector is attached to
    pub device: String,
    pub index: usize,
    pub character_name: String,
    pub received_at: DateTime<Utc>,
}

impl SelectionEvent {
    pub fn new(device: impl Into<String>, index: usize, character_name: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            index,
            character_name: character_name.into(),
            received_at: Utc::now(),
        }
    }
}

/// Per-line counters kept while decoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    pub lines: u64,
    pub commits: u64,
    pub diagnostics: u64,
    pub malformed: u64,
    pub oversized: u64,
}

/// Turns raw bytes from one selector into [`SelectionEvent`]s.
///
/// Diagnostic lines are skipped silently; malformed, oversized and unknown
/// lines are logged and dropped without affecting later lines.
#[derive(Debug)]
pub struct SelectionDecoder {
    device: String,
    roster: CharacterRoster,
    framer: LineFramer,
    stats: DecodeStats,
}

impl SelectionDecoder {
    pub fn new(device: impl Into<String>, roster: CharacterRoster, max_line_len: usize) -> Self {
        Self {
            device: device.into(),
            roster,
            framer: LineFramer::with_max_len(max_line_len),
            stats: DecodeStats::default(),
        }
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SelectionEvent> {
        let mut events = Vec::new();

        for framed in self.framer.push(bytes) {
            self.stats.lines += 1;
            match framed {
                FramedLine::Line(line) => match self.decode_line(&line) {
                    Ok(Some(event)) => {
                        self.stats.commits += 1;
                        events.push(event);
                    }
                    Ok(None) => {
                        self.stats.diagnostics += 1;
                        debug!(device = %self.device, "selector: {}", line);
                    }
                    Err(e) => {
                        self.stats.malformed += 1;
                        warn!(device = %self.device, "Dropping line: {}", e);
                    }
                },
                FramedLine::Rejected(e @ ProtocolError::LineTooLong { .. }) => {
                    self.stats.oversized += 1;
                    warn!(device = %self.device, "Dropping line: {}", e);
                }
                FramedLine::Rejected(e) => {
                    self.stats.malformed += 1;
                    warn!(device = %self.device, "Dropping line: {}", e);
                }
            }
        }

        events
    }

    fn decode_line(&self, line: &str) -> Result<Option<SelectionEvent>, ProtocolError> {
        let Some(message) = parse_line(line)? else {
            return Ok(None);
        };
        let message = self.roster.validate(&message)?;
        Ok(Some(SelectionEvent::new(
            self.device.clone(),
            message.index,
            message.character_name,
        )))
    }

    /// Discard a partially received line
    pub fn reset(&mut self) {
        self.framer.reset();
    }

    pub fn has_partial(&self) -> bool {
        self.framer.has_partial()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_MAX_LINE_LEN;

    fn decoder() -> SelectionDecoder {
        SelectionDecoder::new("/dev/ttyUSB0", CharacterRoster::default(), DEFAULT_MAX_LINE_LEN)
    }

    #[test]
    fn test_malformed_then_valid_yields_one_event() {
        let mut decoder = decoder();
        let events = decoder.push(b"SELECTED index=oops name=Skye\nSELECTED index=1 name=Skye\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 1);
        assert_eq!(events[0].character_name, "Skye");
        assert_eq!(events[0].device, "/dev/ttyUSB0");
        assert_eq!(decoder.stats().malformed, 1);
        assert_eq!(decoder.stats().commits, 1);
    }

    #[test]
    fn test_diagnostics_are_counted_not_emitted() {
        let mut decoder = decoder();
        let events = decoder.push(b"storydial ready characters=3\nrotary raw=5\n");
        assert!(events.is_empty());
        assert_eq!(decoder.stats().diagnostics, 2);
    }

    #[test]
    fn test_unknown_character_is_dropped() {
        let mut decoder = decoder();
        let events = decoder.push(b"SELECTED index=1 name=Chase\nSELECTED index=9 name=Skye\n");
        assert!(events.is_empty());
        assert_eq!(decoder.stats().malformed, 2);
    }

    #[test]
    fn test_noise_before_commit_is_recovered() {
        let mut decoder = SelectionDecoder::new("COM3", CharacterRoster::default(), 32);
        let mut bytes = vec![0xAAu8; 100];
        bytes.extend_from_slice(b"\nSELECTED index=2 name=Marshall\n");
        let events = decoder.push(&bytes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].character_name, "Marshall");
        assert_eq!(decoder.stats().oversized, 1);
    }
}
