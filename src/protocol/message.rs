//! Commit line encoding and parsing

use super::ProtocolError;
use serde::{Deserialize, Serialize};

/// First token of every commit line
pub const COMMIT_MARKER: &str = "SELECTED";

/// A committed selection as it travels over the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorMessage {
    /// Committed selection index
    pub index: usize,
    /// Human-readable character name shown for that index
    pub character_name: String,
}

impl SelectorMessage {
    pub fn new(index: usize, character_name: impl Into<String>) -> Self {
        Self {
            index,
            character_name: character_name.into(),
        }
    }

    /// Encode as a newline-terminated commit line
    pub fn to_line(&self) -> String {
        format!(
            "{} index={} name={}\n",
            COMMIT_MARKER, self.index, self.character_name
        )
    }
}

/// Parse one line received from the selector.
///
/// Returns `Ok(None)` for diagnostic lines (anything not starting with the
/// commit marker) and an error for commit lines missing a field.
pub fn parse_line(line: &str) -> Result<Option<SelectorMessage>, ProtocolError> {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n').trim();

    let (marker, rest) = match line.split_once(char::is_whitespace) {
        Some((marker, rest)) => (marker, rest.trim_start()),
        None => (line, ""),
    };
    if !marker.eq_ignore_ascii_case(COMMIT_MARKER) {
        return Ok(None);
    }

    let rest = rest
        .strip_prefix("index=")
        .ok_or_else(|| ProtocolError::Malformed(format!("missing index field in '{}'", line)))?;
    let (index_text, rest) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| ProtocolError::Malformed(format!("missing name field in '{}'", line)))?;
    let index: usize = index_text
        .parse()
        .map_err(|_| ProtocolError::Malformed(format!("invalid index '{}'", index_text)))?;

    let name = rest
        .trim_start()
        .strip_prefix("name=")
        .ok_or_else(|| ProtocolError::Malformed(format!("missing name field in '{}'", line)))?
        .trim();
    if name.is_empty() {
        return Err(ProtocolError::Malformed("empty character name".to_string()));
    }

    Ok(Some(SelectorMessage::new(index, name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_line_format() {
        let msg = SelectorMessage::new(2, "Marshall");
        assert_eq!(msg.to_line(), "SELECTED index=2 name=Marshall\n");
    }

    #[test]
    fn test_parse_commit_line() {
        let msg = parse_line("SELECTED index=1 name=Skye\r\n").unwrap().unwrap();
        assert_eq!(msg, SelectorMessage::new(1, "Skye"));
    }

    #[test]
    fn test_parse_name_with_spaces() {
        let msg = parse_line("selected index=0 name=Mickey Mouse").unwrap().unwrap();
        assert_eq!(msg.character_name, "Mickey Mouse");
    }

    #[test]
    fn test_diagnostic_lines_are_ignored() {
        assert_eq!(parse_line("storydial ready characters=3").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("SELECTEDX index=1 name=Skye").unwrap(), None);
        assert_eq!(parse_line("encoder raw=-4").unwrap(), None);
    }

    #[test]
    fn test_malformed_commit_lines() {
        assert!(matches!(
            parse_line("SELECTED"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_line("SELECTED index=abc name=Skye"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_line("SELECTED index=-1 name=Skye"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_line("SELECTED index=1"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            parse_line("SELECTED index=1 name=   "),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
