//! Configuration for the selector bridge
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables. Every section has defaults, so an empty file is valid.

use crate::generation::{OrchestratorConfig, StoryPreferences};
use crate::protocol::CharacterRoster;
use crate::serial::ConnectionConfig;
use crate::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Explicit serial port, skipping auto-detection
pub const ENV_PORT: &str = "STORYDIAL_PORT";
pub const ENV_CONTENT_PROVIDER: &str = "LLM_PROVIDER";
pub const ENV_CONTENT_FALLBACK: &str = "LLM_FALLBACK_PROVIDER";
pub const ENV_NARRATION_PROVIDER: &str = "TTS_PROVIDER";
pub const ENV_NARRATION_FALLBACK: &str = "TTS_FALLBACK_PROVIDER";
pub const ENV_CHILD_NAME: &str = "STORYDIAL_CHILD_NAME";
pub const ENV_VOICE_ID: &str = "STORYDIAL_VOICE_ID";

/// Configuration for the complete bridge
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Serial port to use; auto-detect when unset
    pub port: Option<String>,

    pub connection: ConnectionConfig,

    /// Characters on the dial, in selection order
    pub characters: CharacterRoster,

    pub generation: OrchestratorConfig,

    pub preferences: StoryPreferences,
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BridgeError::ConfigError(format!("Invalid configuration: {}", e)))
    }

    /// Read a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::ConfigError(format!("Cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&text)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`; blank values are ignored
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .inspect(|value| debug!("{} = {}", key, value))
        };

        if let Some(port) = var(ENV_PORT) {
            self.port = Some(port);
        }
        let providers = &mut self.generation.providers;
        if let Some(name) = var(ENV_CONTENT_PROVIDER) {
            providers.primary_content = name;
        }
        if let Some(name) = var(ENV_CONTENT_FALLBACK) {
            providers.fallback_content = Some(name);
        }
        if let Some(name) = var(ENV_NARRATION_PROVIDER) {
            providers.primary_narration = name;
        }
        if let Some(name) = var(ENV_NARRATION_FALLBACK) {
            providers.fallback_narration = Some(name);
        }
        if let Some(name) = var(ENV_CHILD_NAME) {
            self.preferences.child_name = name;
        }
        if let Some(voice) = var(ENV_VOICE_ID) {
            self.preferences.voice_id = Some(voice);
        }
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_characters(mut self, characters: CharacterRoster) -> Self {
        self.characters = characters;
        self
    }

    pub fn with_generation(mut self, generation: OrchestratorConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_preferences(mut self, preferences: StoryPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.characters.is_empty() {
            return Err(BridgeError::ConfigError("At least one character is required".to_string()));
        }

        for (i, name) in self.characters.names().iter().enumerate() {
            if name.trim().is_empty() || name.chars().any(char::is_whitespace) {
                return Err(BridgeError::ConfigError(format!(
                    "Character {} ('{}') must be a single non-empty word",
                    i, name
                )));
            }
            if self.characters.index_of(name) != Some(i) {
                return Err(BridgeError::ConfigError(format!("Duplicate character '{}'", name)));
            }
        }

        if self.connection.link.baud_rate == 0 {
            return Err(BridgeError::ConfigError("Baud rate must be positive".to_string()));
        }
        if self.connection.link.read_timeout_ms == 0 {
            return Err(BridgeError::ConfigError("Read timeout must be positive".to_string()));
        }
        if self.connection.max_line_len == 0 {
            return Err(BridgeError::ConfigError("Maximum line length must be positive".to_string()));
        }

        if self.generation.content_timeout_ms == 0 || self.generation.narration_timeout_ms == 0 {
            return Err(BridgeError::ConfigError("Provider timeouts must be positive".to_string()));
        }

        if matches!(&self.port, Some(port) if port.trim().is_empty()) {
            return Err(BridgeError::ConfigError("Port name is empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::StoryLength;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, None);
        assert_eq!(config.characters.len(), 3);
        assert_eq!(config.generation.providers.primary_content, "template");
        assert_eq!(config.connection.link.baud_rate, 115_200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = BridgeConfig::from_toml_str(
            r#"
            port = "/dev/ttyACM0"
            characters = ["Chase", "Zuma"]

            [connection.link]
            read_timeout_ms = 50

            [generation]
            content_timeout_ms = 30000

            [generation.providers]
            primary_content = "openai"
            fallback_content = "template"

            [preferences]
            story_length = "long"
            audio = false
            voice_id = "Joanna"
            "#,
        )
        .unwrap();

        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.characters.name(1), Some("Zuma"));
        assert_eq!(config.connection.link.read_timeout_ms, 50);
        assert_eq!(config.connection.link.baud_rate, 115_200);
        assert_eq!(config.generation.content_timeout_ms, 30_000);
        assert_eq!(config.generation.narration_timeout_ms, 60_000);
        assert_eq!(config.generation.providers.fallback_content.as_deref(), Some("template"));
        assert_eq!(config.preferences.story_length, StoryLength::Long);
        assert!(!config.preferences.audio);
        assert_eq!(config.preferences.voice_id.as_deref(), Some("Joanna"));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = BridgeConfig::from_toml_str("characters = 3").unwrap_err();
        assert!(matches!(err, BridgeError::ConfigError(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_PORT, "/dev/ttyUSB3"),
            (ENV_CONTENT_PROVIDER, "openai"),
            (ENV_NARRATION_FALLBACK, "none"),
            (ENV_CHILD_NAME, "Noa"),
            (ENV_CONTENT_FALLBACK, "   "),
            (ENV_VOICE_ID, " pNInz6obpgDQGcFmaJgB "),
        ]
        .into_iter()
        .collect();

        let config = BridgeConfig::default().apply_env_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(config.generation.providers.primary_content, "openai");
        assert_eq!(config.generation.providers.fallback_content, None);
        assert_eq!(config.generation.providers.fallback_narration.as_deref(), Some("none"));
        assert_eq!(config.preferences.child_name, "Noa");
        assert_eq!(config.preferences.voice_id.as_deref(), Some("pNInz6obpgDQGcFmaJgB"));
    }

    #[test]
    fn test_blank_voice_env_keeps_configured_voice() {
        let config = BridgeConfig::default()
            .with_preferences(StoryPreferences::default().with_voice_id(Some("Joanna")))
            .apply_env_from(|key| (key == ENV_VOICE_ID).then(|| "  ".to_string()));
        assert_eq!(config.preferences.voice_id.as_deref(), Some("Joanna"));
    }

    #[test]
    fn test_validate_rejects_bad_rosters() {
        let empty = BridgeConfig::default().with_characters(CharacterRoster::new(Vec::<String>::new()));
        assert!(empty.validate().is_err());

        let spaced = BridgeConfig::default().with_characters(CharacterRoster::new(["Rocky Dog"]));
        assert!(spaced.validate().is_err());

        let duplicate = BridgeConfig::default().with_characters(CharacterRoster::new(["Skye", "Skye"]));
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = BridgeConfig::default().with_generation(OrchestratorConfig::default().with_content_timeout_ms(0));
        assert!(config.validate().is_err());
    }
}
