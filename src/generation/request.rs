//! Content requests built from selections

use crate::protocol::SelectionEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryLength {
    VeryShort,
    #[default]
    Short,
    Medium,
    Long,
}

impl StoryLength {
    /// Approximate word count to ask for
    pub fn target_words(&self) -> u32 {
        match self {
            StoryLength::VeryShort => 300,
            StoryLength::Short => 600,
            StoryLength::Medium => 900,
            StoryLength::Long => 1200,
        }
    }

    /// Read-aloud time the length is meant for
    pub fn reading_time(&self) -> &'static str {
        match self {
            StoryLength::VeryShort => "2-3 minutes",
            StoryLength::Short => "3-5 minutes",
            StoryLength::Medium => "5-7 minutes",
            StoryLength::Long => "7-10 minutes",
        }
    }
}

impl fmt::Display for StoryLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoryLength::VeryShort => write!(f, "Very Short"),
            StoryLength::Short => write!(f, "Short"),
            StoryLength::Medium => write!(f, "Medium"),
            StoryLength::Long => write!(f, "Long"),
        }
    }
}

impl FromStr for StoryLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match normalized.as_str() {
            "veryshort" => Ok(StoryLength::VeryShort),
            "short" => Ok(StoryLength::Short),
            "medium" => Ok(StoryLength::Medium),
            "long" => Ok(StoryLength::Long),
            _ => Err(format!("unknown story length '{}'", s)),
        }
    }
}

/// Preferences supplied by whoever owns the child's profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryPreferences {
    pub child_name: String,
    pub universe: String,
    pub story_length: StoryLength,
    /// Whether to narrate the story at all
    pub audio: bool,
    /// Narration voice, in the narration provider's own identifiers
    pub voice_id: Option<String>,
}

impl Default for StoryPreferences {
    fn default() -> Self {
        Self {
            child_name: "Wesley".to_string(),
            universe: "Paw Patrol".to_string(),
            story_length: StoryLength::Short,
            audio: true,
            voice_id: None,
        }
    }
}

impl StoryPreferences {
    pub fn with_child_name(mut self, name: impl Into<String>) -> Self {
        self.child_name = name.into();
        self
    }

    pub fn with_story_length(mut self, length: StoryLength) -> Self {
        self.story_length = length;
        self
    }

    pub fn with_voice_id(mut self, voice: Option<&str>) -> Self {
        self.voice_id = voice.map(str::to_string);
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = false;
        self
    }
}

/// Setting and theme used for a character's stories
pub fn scene_for(character: &str) -> (&'static str, &'static str) {
    match character.trim().to_ascii_lowercase().as_str() {
        "skye" => ("Sky High", "flying rescue"),
        "rubble" => ("Construction Site", "building adventure"),
        "marshall" => ("Fire Station", "fire rescue"),
        _ => ("Adventure Bay", "rescue mission"),
    }
}

/// Everything a content provider needs to write one story
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentRequest {
    pub request_id: Uuid,
    pub character_name: String,
    pub child_name: String,
    pub universe: String,
    pub setting: String,
    pub theme: String,
    pub story_length: StoryLength,
}

impl ContentRequest {
    pub fn for_character(character: &str, preferences: &StoryPreferences) -> Self {
        let (setting, theme) = scene_for(character);
        Self {
            request_id: Uuid::new_v4(),
            character_name: character.to_string(),
            child_name: preferences.child_name.clone(),
            universe: preferences.universe.clone(),
            setting: setting.to_string(),
            theme: theme.to_string(),
            story_length: preferences.story_length,
        }
    }

    pub fn from_selection(event: &SelectionEvent, preferences: &StoryPreferences) -> Self {
        Self::for_character(&event.character_name, preferences)
    }

    /// Characters appearing in the story; the child always joins
    pub fn characters(&self) -> Vec<&str> {
        let mut characters = vec![self.character_name.as_str()];
        if !self.child_name.is_empty() && !self.child_name.eq_ignore_ascii_case(&self.character_name) {
            characters.push(self.child_name.as_str());
        }
        characters
    }

    /// Prompt text for language-model backed providers
    pub fn prompt(&self) -> String {
        format!(
            "Create a bedtime story for a toddler named {child} with the following elements:\n\
             \n\
             Universe: {universe}\n\
             Setting: {setting}\n\
             Theme: {theme}\n\
             Characters: {characters}\n\
             \n\
             The story should be approximately {words} words and take about {time} to read aloud.\n\
             Use simple language, short sentences and a clear beginning, middle and end.\n\
             Keep any conflict mild and end happily and calmly, ready for sleep.\n\
             Include a repeated phrase a toddler can join in with.\n\
             \n\
             Return only a title line followed by the story in short paragraphs.",
            child = self.child_name,
            universe = self.universe,
            setting = self.setting,
            theme = self.theme,
            characters = self.characters().join(", "),
            words = self.story_length.target_words(),
            time = self.story_length.reading_time(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_table() {
        assert_eq!(scene_for("Skye"), ("Sky High", "flying rescue"));
        assert_eq!(scene_for("rubble"), ("Construction Site", "building adventure"));
        assert_eq!(scene_for("Marshall"), ("Fire Station", "fire rescue"));
        assert_eq!(scene_for("Chase"), ("Adventure Bay", "rescue mission"));
    }

    #[test]
    fn test_request_from_selection() {
        let event = SelectionEvent::new("/dev/ttyUSB0", 1, "Skye");
        let prefs = StoryPreferences::default().with_child_name("Ava");
        let request = ContentRequest::from_selection(&event, &prefs);
        assert_eq!(request.character_name, "Skye");
        assert_eq!(request.child_name, "Ava");
        assert_eq!(request.setting, "Sky High");
        assert_eq!(request.characters(), vec!["Skye", "Ava"]);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let prefs = StoryPreferences::default();
        let a = ContentRequest::for_character("Rubble", &prefs);
        let b = ContentRequest::for_character("Rubble", &prefs);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_prompt_mentions_everything() {
        let prefs = StoryPreferences::default().with_story_length(StoryLength::Medium);
        let prompt = ContentRequest::for_character("Marshall", &prefs).prompt();
        for needle in ["Wesley", "Paw Patrol", "Fire Station", "fire rescue", "Marshall, Wesley", "900 words"] {
            assert!(prompt.contains(needle), "missing {}", needle);
        }
    }

    #[test]
    fn test_story_length_parsing() {
        assert_eq!("Very Short".parse::<StoryLength>(), Ok(StoryLength::VeryShort));
        assert_eq!("very_short".parse::<StoryLength>(), Ok(StoryLength::VeryShort));
        assert_eq!("LONG".parse::<StoryLength>(), Ok(StoryLength::Long));
        assert!("epic".parse::<StoryLength>().is_err());
    }

    #[test]
    fn test_preferences_from_toml() {
        let prefs: StoryPreferences = toml::from_str(
            r#"
            child_name = "Mia"
            story_length = "very_short"
            "#,
        )
        .unwrap();
        assert_eq!(prefs.child_name, "Mia");
        assert_eq!(prefs.universe, "Paw Patrol");
        assert_eq!(prefs.story_length, StoryLength::VeryShort);
        assert!(prefs.audio);
        assert_eq!(prefs.voice_id, None);

        let prefs: StoryPreferences = toml::from_str(r#"voice_id = "pNInz6obpgDQGcFmaJgB""#).unwrap();
        assert_eq!(prefs.voice_id.as_deref(), Some("pNInz6obpgDQGcFmaJgB"));
    }
}
