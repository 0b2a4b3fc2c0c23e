//! Name-keyed provider lookup, resolved once at startup

use super::builtin::{NoneNarrationProvider, TemplateContentProvider};
use super::orchestrator::ProviderConfig;
use super::provider::{ContentProvider, NarrationProvider};
use crate::{BridgeError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Providers chosen for one orchestrator
#[derive(Clone)]
pub struct ResolvedProviders {
    pub content: Arc<dyn ContentProvider>,
    pub content_fallback: Option<Arc<dyn ContentProvider>>,
    pub narration: Arc<dyn NarrationProvider>,
    pub narration_fallback: Option<Arc<dyn NarrationProvider>>,
}

impl std::fmt::Debug for ResolvedProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedProviders")
            .field("content", &self.content.name())
            .field("content_fallback", &self.content_fallback.as_ref().map(|p| p.name()))
            .field("narration", &self.narration.name())
            .field("narration_fallback", &self.narration_fallback.as_ref().map(|p| p.name()))
            .finish()
    }
}

/// Registered content and narration providers.
///
/// Names are case-insensitive. Adding a backend means registering it here;
/// the orchestrator never changes.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    content: HashMap<String, Arc<dyn ContentProvider>>,
    narration: HashMap<String, Arc<dyn NarrationProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the offline `template` and `none` providers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_content(Arc::new(TemplateContentProvider));
        registry.register_narration(Arc::new(NoneNarrationProvider));
        registry.alias_content("offline", TemplateContentProvider::NAME);
        registry.alias_narration("placeholder", NoneNarrationProvider::NAME);
        registry
    }

    pub fn register_content(&mut self, provider: Arc<dyn ContentProvider>) {
        let key = provider.name().to_lowercase();
        debug!("Registered content provider '{}'", key);
        self.content.insert(key, provider);
    }

    pub fn register_narration(&mut self, provider: Arc<dyn NarrationProvider>) {
        let key = provider.name().to_lowercase();
        debug!("Registered narration provider '{}'", key);
        self.narration.insert(key, provider);
    }

    /// Make `alias` resolve to the provider registered as `target`
    pub fn alias_content(&mut self, alias: &str, target: &str) -> bool {
        match self.content(target) {
            Some(provider) => {
                self.content.insert(alias.to_lowercase(), provider);
                true
            }
            None => false,
        }
    }

    pub fn alias_narration(&mut self, alias: &str, target: &str) -> bool {
        match self.narration(target) {
            Some(provider) => {
                self.narration.insert(alias.to_lowercase(), provider);
                true
            }
            None => false,
        }
    }

    pub fn content(&self, name: &str) -> Option<Arc<dyn ContentProvider>> {
        self.content.get(&name.trim().to_lowercase()).cloned()
    }

    pub fn narration(&self, name: &str) -> Option<Arc<dyn NarrationProvider>> {
        self.narration.get(&name.trim().to_lowercase()).cloned()
    }

    /// Registered content names, sorted
    pub fn content_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.content.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn narration_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.narration.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up every provider named in `config`.
    ///
    /// An unknown primary is a configuration error. An unknown fallback is
    /// logged and treated as no fallback.
    pub fn resolve(&self, config: &ProviderConfig) -> Result<ResolvedProviders> {
        let content = self.content(&config.primary_content).ok_or_else(|| {
            BridgeError::ConfigError(format!(
                "Unknown content provider '{}' (known: {})",
                config.primary_content,
                self.content_names().join(", ")
            ))
        })?;

        let narration = self.narration(&config.primary_narration).ok_or_else(|| {
            BridgeError::ConfigError(format!(
                "Unknown narration provider '{}' (known: {})",
                config.primary_narration,
                self.narration_names().join(", ")
            ))
        })?;

        let content_fallback = config.fallback_content.as_deref().and_then(|name| {
            let found = self.content(name);
            if found.is_none() {
                warn!("Unknown fallback content provider '{}'; continuing without", name);
            }
            found
        });

        let narration_fallback = config.fallback_narration.as_deref().and_then(|name| {
            let found = self.narration(name);
            if found.is_none() {
                warn!("Unknown fallback narration provider '{}'; continuing without", name);
            }
            found
        });

        Ok(ResolvedProviders {
            content,
            content_fallback,
            narration,
            narration_fallback,
        })
    }
}
