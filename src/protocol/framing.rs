//! Newline framing of the raw serial byte stream
//!
//! A line longer than the limit is dropped up to the next newline; a line
//! that is not UTF-8 is rejected.

use super::ProtocolError;

/// Longest line accepted from the selector before it is treated as garbage
pub const DEFAULT_MAX_LINE_LEN: usize = 256;

/// Output of the line framer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramedLine {
    /// A complete line without its terminator
    Line(String),
    /// A line that had to be dropped
    Rejected(ProtocolError),
}

/// Buffers serial bytes and emits a line whenever `\n` is seen.
///
/// A trailing `\r` is stripped. Once a partial line grows past the maximum
/// length it is reported once and everything up to the next newline is
/// discarded, so a corrupted link cannot grow the buffer without bound.
#[derive(Debug)]
pub struct LineFramer {
    buffer: Vec<u8>,
    max_len: usize,
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            buffer: Vec::with_capacity(max_len.min(1024)),
            max_len,
            discarding: false,
        }
    }

    /// Feed a chunk of bytes; returns every line completed by it
    pub fn push(&mut self, bytes: &[u8]) -> Vec<FramedLine> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                } else {
                    lines.push(self.take_line());
                }
                self.buffer.clear();
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buffer.len() >= self.max_len {
                lines.push(FramedLine::Rejected(ProtocolError::LineTooLong {
                    max: self.max_len,
                }));
                self.buffer.clear();
                self.discarding = true;
                continue;
            }

            self.buffer.push(byte);
        }

        lines
    }

    fn take_line(&self) -> FramedLine {
        let bytes = match self.buffer.last() {
            Some(b'\r') => &self.buffer[..self.buffer.len() - 1],
            _ => &self.buffer[..],
        };
        match std::str::from_utf8(bytes) {
            Ok(text) => FramedLine::Line(text.to_string()),
            Err(_) => FramedLine::Rejected(ProtocolError::InvalidUtf8),
        }
    }

    /// Whether bytes of an unfinished line are buffered
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || self.discarding
    }

    /// Drop any partial line
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> FramedLine {
        FramedLine::Line(text.to_string())
    }

    #[test]
    fn test_lines_simple() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"Hello\nWorld\r\n");
        assert_eq!(lines, vec![line("Hello"), line("World")]);
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"SELECTED ind").is_empty());
        assert!(framer.has_partial());
        let lines = framer.push(b"ex=1 name=Skye\n");
        assert_eq!(lines, vec![line("SELECTED index=1 name=Skye")]);
    }

    #[test]
    fn test_oversized_line_is_dropped_until_newline() {
        let mut framer = LineFramer::with_max_len(8);
        let lines = framer.push(b"0123456789abcdef\nok\n");
        assert_eq!(
            lines,
            vec![
                FramedLine::Rejected(ProtocolError::LineTooLong { max: 8 }),
                line("ok"),
            ]
        );
    }

    #[test]
    fn test_oversized_garbage_reported_once() {
        let mut framer = LineFramer::with_max_len(4);
        let mut rejected = 0;
        for _ in 0..10 {
            rejected += framer
                .push(b"xxxxxxxx")
                .iter()
                .filter(|l| matches!(l, FramedLine::Rejected(_)))
                .count();
        }
        assert_eq!(rejected, 1);
        assert_eq!(framer.push(b"\nfine\n"), vec![line("fine")]);
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut framer = LineFramer::new();
        let lines = framer.push(&[0xff, 0xfe, b'\n']);
        assert_eq!(lines, vec![FramedLine::Rejected(ProtocolError::InvalidUtf8)]);
    }

    #[test]
    fn test_reset_drops_partial() {
        let mut framer = LineFramer::new();
        framer.push(b"SELECTED index=0");
        framer.reset();
        assert_eq!(framer.push(b" name=Rubble\n"), vec![line(" name=Rubble")]);
    }
}
