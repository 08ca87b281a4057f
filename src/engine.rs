use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SessionConfig;
use crate::error::{EmbeddingError, GenerationError, SessionError};

/// Push-style notification receiving `(text, is_final)` for each chunk.
///
/// Engines may invoke it from any thread, including their own workers.
pub type ChunkListener = Arc<dyn Fn(String, bool) + Send + Sync>;

/// Text generation backend wrapped by [`InferenceSession`](crate::InferenceSession).
///
/// Implementations are not expected to be reentrant; the session guarantees
/// a single request at a time.
#[async_trait]
pub trait GenerativeEngine: Send + Sync {
    /// Produce the complete response for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Produce the response incrementally through `listener`.
    ///
    /// Resolves once the engine has stopped notifying. A successful run
    /// notifies exactly one chunk with `is_final = true`, as the last call.
    async fn generate_async(
        &self,
        prompt: &str,
        listener: ChunkListener,
    ) -> Result<(), GenerationError>;
}

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingEngine: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Storage holding model weights.
#[async_trait]
pub trait WeightStore: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;
}

/// [`WeightStore`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWeights;

#[async_trait]
impl WeightStore for FsWeights {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Builds the generative engine once its weights are known to exist.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, config: &SessionConfig)
    -> Result<Arc<dyn GenerativeEngine>, SessionError>;
}

#[async_trait]
impl<F> EngineLoader for F
where
    F: Fn(&SessionConfig) -> Result<Arc<dyn GenerativeEngine>, SessionError> + Send + Sync,
{
    async fn load(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<dyn GenerativeEngine>, SessionError> {
        self(config)
    }
}
