//! Language-model plumbing for an OBD-II diagnostics assistant.
//!
//! The crate exposes an [`InferenceSession`] serializing access to a
//! [`GenerativeEngine`], the [`InferenceSessionRegistry`] that builds it once,
//! and a [`SemanticIntentMatcher`] mapping free-text questions onto known
//! diagnostic requests. [`DiagnosticAssistant`] ties them together with the
//! [`obd`] decoder.

mod abort_guard;
mod assistant;
mod catalog;
pub mod config;
mod engine;
mod error;
pub mod logging;
mod matcher;
pub mod obd;
pub mod ollama;
pub mod prompt;
mod registry;
mod session;
mod slot;
#[cfg(test)]
pub mod test_helpers;

pub use assistant::{AssistantError, Commentary, DiagnosticAssistant, Reply, StreamingReply};
pub use catalog::{IntentCatalog, IntentEntry, obd_catalog};
pub use config::{Config, MatcherConfig, OllamaConfig, SessionConfig};
pub use engine::{
    ChunkListener, EmbeddingEngine, EngineLoader, FsWeights, GenerativeEngine, WeightStore,
};
pub use error::{EmbeddingError, GenerationError, MatchError, SessionError};
pub use matcher::{
    CatalogReport, EMPTY_CATALOG, EntryFailure, MatchOutcome, NO_ENTRY_MET_THRESHOLD,
    SemanticIntentMatcher, SimilarityResult, cosine_similarity,
};
pub use registry::InferenceSessionRegistry;
pub use session::{GenerationChunk, GenerationStream, InferenceSession, StreamingHandle};
