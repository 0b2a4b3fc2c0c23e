//! Selectable characters shared by the selector and the host

use super::{ProtocolError, SelectorMessage};
use serde::{Deserialize, Serialize};

/// Ordered list of characters on the dial; the position is the selection index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterRoster {
    names: Vec<String>,
}

impl Default for CharacterRoster {
    fn default() -> Self {
        Self::new(["Rubble", "Skye", "Marshall"])
    }
}

impl CharacterRoster {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Number of selectable characters (N)
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name at a selection index
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Case-insensitive lookup of a character's index
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name.trim()))
    }

    /// Check a received commit against the roster.
    ///
    /// Returns the message with the roster's spelling of the name.
    pub fn validate(&self, message: &SelectorMessage) -> Result<SelectorMessage, ProtocolError> {
        match self.name(message.index) {
            Some(expected) if expected.eq_ignore_ascii_case(&message.character_name) => {
                Ok(SelectorMessage::new(message.index, expected))
            }
            _ => Err(ProtocolError::UnknownCharacter {
                index: message.index,
                name: message.character_name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roster() {
        let roster = CharacterRoster::default();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.name(0), Some("Rubble"));
        assert_eq!(roster.name(2), Some("Marshall"));
        assert_eq!(roster.name(3), None);
    }

    #[test]
    fn test_index_of_is_case_insensitive() {
        let roster = CharacterRoster::default();
        assert_eq!(roster.index_of("skye"), Some(1));
        assert_eq!(roster.index_of("Chase"), None);
    }

    #[test]
    fn test_validate_uses_roster_spelling() {
        let roster = CharacterRoster::default();
        let checked = roster.validate(&SelectorMessage::new(1, "SKYE")).unwrap();
        assert_eq!(checked.character_name, "Skye");
    }

    #[test]
    fn test_validate_rejects_mismatch() {
        let roster = CharacterRoster::default();
        assert!(roster.validate(&SelectorMessage::new(0, "Skye")).is_err());
        assert!(roster.validate(&SelectorMessage::new(7, "Rubble")).is_err());
    }

    #[test]
    fn test_roster_from_toml_list() {
        #[derive(Deserialize)]
        struct Wrapper {
            characters: CharacterRoster,
        }
        let wrapper: Wrapper = toml::from_str(r#"characters = ["Bluey", "Bingo"]"#).unwrap();
        assert_eq!(wrapper.characters.names(), &["Bluey".to_string(), "Bingo".to_string()]);
    }
}
