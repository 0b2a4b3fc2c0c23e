//! Provider orchestrator
//!
//! Turns one selection into one story: content first, then narration, each
//! with a timeout, optional retries and an optional fallback provider.
//!
//! Per attempt the phase moves
//! `Idle -> ContentGenerating -> NarrationGenerating -> Complete`, and any
//! phase may end in `Failed(stage)`. The phases a run went through are
//! reported on its outcome. Narration never fails a run: when every
//! narration provider fails the story is still returned, flagged as a
//! partial failure.

use super::provider::{AudioRef, ContentProvider, NarrationProvider, ProviderError, ProviderResult};
use super::registry::{ProviderRegistry, ResolvedProviders};
use super::request::{ContentRequest, StoryPreferences};
use crate::protocol::SelectionEvent;
use crate::{BridgeError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which providers to use, by registry name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub primary_content: String,
    pub fallback_content: Option<String>,
    pub primary_narration: String,
    pub fallback_narration: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            primary_content: "template".to_string(),
            fallback_content: None,
            primary_narration: "none".to_string(),
            fallback_narration: None,
        }
    }
}

impl ProviderConfig {
    pub fn with_primary_content(mut self, name: impl Into<String>) -> Self {
        self.primary_content = name.into();
        self
    }

    pub fn with_fallback_content(mut self, name: Option<&str>) -> Self {
        self.fallback_content = name.map(str::to_string);
        self
    }

    pub fn with_primary_narration(mut self, name: impl Into<String>) -> Self {
        self.primary_narration = name.into();
        self
    }

    pub fn with_fallback_narration(mut self, name: Option<&str>) -> Self {
        self.fallback_narration = name.map(str::to_string);
        self
    }
}

/// Configuration for the generation orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub providers: ProviderConfig,
    /// Timeout for one content call
    pub content_timeout_ms: u64,
    /// Timeout for one narration call
    pub narration_timeout_ms: u64,
    /// Calls per provider before moving on; only timeouts and outages are
    /// retried
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            providers: ProviderConfig::default(),
            content_timeout_ms: 120_000,
            narration_timeout_ms: 60_000,
            max_attempts: 1,
            retry_delay_ms: 500,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_providers(mut self, providers: ProviderConfig) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_content_timeout_ms(mut self, ms: u64) -> Self {
        self.content_timeout_ms = ms;
        self
    }

    pub fn with_narration_timeout_ms(mut self, ms: u64) -> Self {
        self.narration_timeout_ms = ms;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Content,
    Narration,
}

impl std::fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationStage::Content => write!(f, "content"),
            GenerationStage::Narration => write!(f, "narration"),
        }
    }
}

/// Phase of a single generation attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    #[default]
    Idle,
    ContentGenerating,
    NarrationGenerating,
    Complete,
    Failed(GenerationStage),
}

impl GenerationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationPhase::Complete | GenerationPhase::Failed(_))
    }

    pub fn can_advance_to(&self, next: GenerationPhase) -> bool {
        use GenerationPhase::*;
        match (self, next) {
            (Idle, ContentGenerating) => true,
            (ContentGenerating, NarrationGenerating) => true,
            // Narration skipped
            (ContentGenerating, Complete) => true,
            (NarrationGenerating, Complete) => true,
            (current, Failed(_)) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// A finished story
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub request_id: Uuid,
    pub character_name: String,
    pub text: String,
    pub audio_ref: Option<AudioRef>,
    /// Content provider that produced `text`
    pub provider_used: String,
    /// Narration provider that produced `audio_ref`
    pub narration_provider_used: Option<String>,
    /// Voice asked of the narration provider
    pub voice_id: Option<String>,
    /// Narration was wanted but every narration provider failed
    pub partial_failure: bool,
    /// Phases the run passed through, ending in `Complete`
    pub phases: Vec<GenerationPhase>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Generation failed at {stage} stage: {cause}")]
pub struct GenerationFailure {
    pub request_id: Uuid,
    pub stage: GenerationStage,
    pub cause: ProviderError,
    /// Phases the run passed through, ending in `Failed(stage)`
    pub phases: Vec<GenerationPhase>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Complete(GenerationResult),
    Failed(GenerationFailure),
}

impl GenerationOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, GenerationOutcome::Complete(_))
    }

    pub fn result(&self) -> Option<&GenerationResult> {
        match self {
            GenerationOutcome::Complete(result) => Some(result),
            GenerationOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&GenerationFailure> {
        match self {
            GenerationOutcome::Failed(failure) => Some(failure),
            GenerationOutcome::Complete(_) => None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        match self {
            GenerationOutcome::Complete(result) => result.request_id,
            GenerationOutcome::Failed(failure) => failure.request_id,
        }
    }

    pub fn phases(&self) -> &[GenerationPhase] {
        match self {
            GenerationOutcome::Complete(result) => &result.phases,
            GenerationOutcome::Failed(failure) => &failure.phases,
        }
    }

    /// Phase the run ended in
    pub fn phase(&self) -> GenerationPhase {
        self.phases().last().copied().unwrap_or_default()
    }
}

/// Narration settings read from the preferences when a run starts
#[derive(Debug, Clone)]
struct NarrationPlan {
    enabled: bool,
    voice_id: Option<String>,
}

/// Phase history of one run
struct PhaseLog {
    request_id: Uuid,
    phases: Vec<GenerationPhase>,
}

impl PhaseLog {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            phases: vec![GenerationPhase::Idle],
        }
    }

    fn current(&self) -> GenerationPhase {
        self.phases.last().copied().unwrap_or_default()
    }

    fn advance(&mut self, next: GenerationPhase) {
        let current = self.current();
        if current.can_advance_to(next) {
            debug!("Generation {}: {:?} -> {:?}", self.request_id, current, next);
            self.phases.push(next);
        } else {
            warn!("Generation {}: illegal phase change {:?} -> {:?}", self.request_id, current, next);
        }
    }
}

/// Runs generations against the configured providers.
///
/// Safe to share between threads. The blocking calls run provider futures on
/// an internal tokio runtime and may be made from plain threads or from
/// inside another tokio runtime. Async callers can await
/// [`handle_selection_async`](Self::handle_selection_async) instead, which
/// runs on the caller's runtime.
pub struct GenerationOrchestrator {
    config: OrchestratorConfig,
    providers: ResolvedProviders,
    preferences: RwLock<StoryPreferences>,
    /// Only `None` once dropping
    runtime: Option<Runtime>,
}

impl GenerationOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        preferences: StoryPreferences,
        registry: &ProviderRegistry,
    ) -> Result<Self> {
        let providers = registry.resolve(&config.providers)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("generation")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::ConfigError(format!("Failed to create tokio runtime: {}", e)))?;

        info!("Generation providers: {:?}", providers);
        Ok(Self {
            config,
            providers,
            preferences: RwLock::new(preferences),
            runtime: Some(runtime),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn providers(&self) -> &ResolvedProviders {
        &self.providers
    }

    pub fn preferences(&self) -> StoryPreferences {
        self.preferences.read().clone()
    }

    /// Replace the preferences used for future requests
    pub fn set_preferences(&self, preferences: StoryPreferences) {
        *self.preferences.write() = preferences;
    }

    /// Narration voice for future requests; `None` leaves the choice to the
    /// narration provider
    pub fn set_voice_id(&self, voice: Option<&str>) {
        self.preferences.write().voice_id = voice.map(str::to_string);
    }

    pub fn build_request(&self, event: &SelectionEvent) -> ContentRequest {
        ContentRequest::from_selection(event, &self.preferences.read())
    }

    /// Generate a story for a committed selection
    pub fn handle_selection(&self, event: &SelectionEvent) -> GenerationOutcome {
        let request = self.build_request(event);
        log_selection(&request, event);
        self.handle_request(&request)
    }

    /// Generate a story for an already built request
    pub fn handle_request(&self, request: &ContentRequest) -> GenerationOutcome {
        let Some(runtime) = self.runtime.as_ref() else {
            return GenerationOutcome::Failed(GenerationFailure {
                request_id: request.request_id,
                stage: GenerationStage::Content,
                cause: ProviderError::Unavailable("generation runtime stopped".to_string()),
                phases: vec![GenerationPhase::Idle, GenerationPhase::Failed(GenerationStage::Content)],
            });
        };
        block_on(runtime, self.run(request, self.narration_plan()))
    }

    /// Generate a story for a committed selection on the caller's runtime.
    ///
    /// The caller's runtime needs the time driver enabled for timeouts.
    pub async fn handle_selection_async(&self, event: &SelectionEvent) -> GenerationOutcome {
        let request = self.build_request(event);
        log_selection(&request, event);
        self.handle_request_async(&request).await
    }

    pub async fn handle_request_async(&self, request: &ContentRequest) -> GenerationOutcome {
        self.run(request, self.narration_plan()).await
    }

    fn narration_plan(&self) -> NarrationPlan {
        let preferences = self.preferences.read();
        NarrationPlan {
            enabled: preferences.audio,
            voice_id: preferences.voice_id.clone(),
        }
    }

    async fn run(&self, request: &ContentRequest, narration: NarrationPlan) -> GenerationOutcome {
        let mut log = PhaseLog::new(request.request_id);
        log.advance(GenerationPhase::ContentGenerating);

        let (text, provider_used) = match self.generate_content(request).await {
            Ok(generated) => generated,
            Err(cause) => {
                log.advance(GenerationPhase::Failed(GenerationStage::Content));
                return GenerationOutcome::Failed(GenerationFailure {
                    request_id: request.request_id,
                    stage: GenerationStage::Content,
                    cause,
                    phases: log.phases,
                });
            }
        };

        let (audio_ref, narration_provider_used, partial_failure) = if narration.enabled {
            log.advance(GenerationPhase::NarrationGenerating);
            match self.narrate(&text, narration.voice_id.as_deref()).await {
                Ok((audio, name)) => (Some(audio), Some(name), false),
                Err(e) => {
                    warn!("Narration failed for {}: {}; returning text only", request.request_id, e);
                    (None, None, true)
                }
            }
        } else {
            debug!("Narration disabled for {}", request.request_id);
            (None, None, false)
        };

        log.advance(GenerationPhase::Complete);
        GenerationOutcome::Complete(GenerationResult {
            request_id: request.request_id,
            character_name: request.character_name.clone(),
            text,
            audio_ref,
            provider_used,
            narration_provider_used,
            voice_id: narration.voice_id.filter(|_| narration.enabled),
            partial_failure,
            phases: log.phases,
        })
    }

    async fn generate_content(&self, request: &ContentRequest) -> ProviderResult<(String, String)> {
        let primary = &self.providers.content;
        let primary_err = match self.call_content(primary.as_ref(), request).await {
            Ok(text) => return Ok((text, primary.name().to_string())),
            Err(e) => e,
        };

        let Some(fallback) = &self.providers.content_fallback else {
            warn!("Content provider {} failed: {}; no fallback configured", primary.name(), primary_err);
            return Err(primary_err);
        };

        warn!(
            "Content provider {} failed: {}; falling back to {}",
            primary.name(),
            primary_err,
            fallback.name()
        );
        let text = self.call_content(fallback.as_ref(), request).await?;
        Ok((text, fallback.name().to_string()))
    }

    async fn narrate(&self, text: &str, voice: Option<&str>) -> ProviderResult<(AudioRef, String)> {
        let primary = &self.providers.narration;
        let primary_err = match self.call_narration(primary.as_ref(), text, voice).await {
            Ok(audio) => return Ok((audio, primary.name().to_string())),
            Err(e) => e,
        };

        let Some(fallback) = &self.providers.narration_fallback else {
            return Err(primary_err);
        };

        warn!(
            "Narration provider {} failed: {}; falling back to {}",
            primary.name(),
            primary_err,
            fallback.name()
        );
        let audio = self.call_narration(fallback.as_ref(), text, voice).await?;
        Ok((audio, fallback.name().to_string()))
    }

    async fn call_content(&self, provider: &dyn ContentProvider, request: &ContentRequest) -> ProviderResult<String> {
        let timeout_ms = self.config.content_timeout_ms;
        let text = self
            .call_with_retry(provider.name(), || {
                with_timeout(timeout_ms, provider.generate(request))
            })
            .await?;

        if text.trim().is_empty() {
            return Err(ProviderError::Rejected(format!("{} returned an empty story", provider.name())));
        }
        Ok(text)
    }

    async fn call_narration(
        &self,
        provider: &dyn NarrationProvider,
        text: &str,
        voice: Option<&str>,
    ) -> ProviderResult<AudioRef> {
        let timeout_ms = self.config.narration_timeout_ms;
        self.call_with_retry(provider.name(), || {
            with_timeout(timeout_ms, provider.synthesize_with_voice(text, voice))
        })
        .await
    }

    /// Call until success, a non-retryable error or `max_attempts`
    async fn call_with_retry<T, F, Fut>(&self, name: &str, mut call: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!("{} attempt {}/{} failed: {}", name, attempt, attempts, e);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for GenerationOrchestrator {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which tokio forbids inside async contexts
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn log_selection(request: &ContentRequest, event: &SelectionEvent) {
    info!(
        "Generating story {} for {} from {}",
        request.request_id, event.character_name, event.device
    );
}

/// Drive `future` to completion on `runtime` from any calling context.
///
/// A multi-thread caller runtime lends its worker with `block_in_place`; a
/// current-thread one cannot, so the run moves to a scoped thread.
fn block_on<F>(runtime: &Runtime, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current() {
        Err(_) => runtime.block_on(future),
        Ok(caller) if caller.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| runtime.block_on(future))
        }
        Ok(_) => std::thread::scope(|scope| match scope.spawn(|| runtime.block_on(future)).join() {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        }),
    }
}

async fn with_timeout<T>(
    timeout_ms: u64,
    call: impl Future<Output = ProviderResult<T>>,
) -> ProviderResult<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout_ms)),
    }
}
