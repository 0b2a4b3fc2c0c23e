//! Provider capability contract
//!
//! A content provider turns a [`ContentRequest`] into story text; a narration
//! provider turns text into an audio artifact reference. Both are async and
//! are always called under a caller-imposed timeout, so an implementation
//! only has to make sure a failed call leaves nothing visible behind.

use super::request::ContentRequest;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ProviderError {
    #[error("Provider timed out after {0} ms")]
    Timeout(u64),

    #[error("Provider rejected the request: {0}")]
    Rejected(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Timeouts and outages may clear up; a rejection will not
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Timeout(_) | ProviderError::Unavailable(_))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// URI of a narration artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioRef(String);

impl AudioRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AudioRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates story text
pub trait ContentProvider: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    fn generate<'a>(&'a self, request: &'a ContentRequest) -> BoxFuture<'a, ProviderResult<String>>;
}

/// Synthesizes narration audio
pub trait NarrationProvider: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    fn synthesize<'a>(&'a self, text: &'a str) -> BoxFuture<'a, ProviderResult<AudioRef>>;

    /// Synthesize with a specific voice.
    ///
    /// `voice` is the provider's own voice identifier. Providers without
    /// voice selection keep this default and narrate with their usual voice.
    fn synthesize_with_voice<'a>(
        &'a self,
        text: &'a str,
        voice: Option<&'a str>,
    ) -> BoxFuture<'a, ProviderResult<AudioRef>> {
        let _ = voice;
        self.synthesize(text)
    }
}
