//! Story generation
//!
//! - [`provider`]: the content and narration capability traits
//! - [`registry`]: providers looked up by configured name
//! - [`orchestrator`]: one selection in, one story out, with timeouts and fallbacks
//! - [`dispatcher`]: per-device coalescing so the monitor never waits on generation

pub mod builtin;
pub mod dispatcher;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod request;

pub use builtin::{NoneNarrationProvider, TemplateContentProvider};
pub use dispatcher::{GenerationDispatcher, GenerationReport, SubmitOutcome};
pub use orchestrator::{
    GenerationFailure, GenerationOrchestrator, GenerationOutcome, GenerationPhase, GenerationResult,
    GenerationStage, OrchestratorConfig, ProviderConfig,
};
pub use provider::{AudioRef, ContentProvider, NarrationProvider, ProviderError, ProviderResult};
pub use registry::{ProviderRegistry, ResolvedProviders};
pub use request::{scene_for, ContentRequest, StoryLength, StoryPreferences};
