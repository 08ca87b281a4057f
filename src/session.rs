use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{Instrument, debug, error, info_span, trace, warn};
use uuid::Uuid;

use crate::abort_guard::AbortGuard;
use crate::config::SessionConfig;
use crate::engine::{ChunkListener, GenerativeEngine};
use crate::error::{GenerationError, SessionError};
use crate::slot::ChunkSlot;

/// One increment of streamed model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationChunk {
    pub text: String,
    /// Set on the last chunk of a request.
    pub is_final: bool,
}

/// Serialized access to a single [`GenerativeEngine`].
///
/// Only one request may run at a time. A request arriving while another is
/// in flight fails with [`SessionError::Busy`] rather than queueing.
pub struct InferenceSession {
    engine: Arc<dyn GenerativeEngine>,
    config: SessionConfig,
    permit: Arc<Semaphore>,
}

impl InferenceSession {
    pub fn new(engine: Arc<dyn GenerativeEngine>, config: SessionConfig) -> Self {
        Self {
            engine,
            config,
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a request currently owns the engine.
    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }

    fn acquire(&self) -> Result<OwnedSemaphorePermit, SessionError> {
        self.permit
            .clone()
            .try_acquire_owned()
            .map_err(|_| SessionError::Busy)
    }

    fn format_prompt(&self, prompt: &str) -> String {
        format!("{prompt}{}", self.config.turn_marker)
    }

    /// Generate the complete response to `prompt`.
    ///
    /// Runs on a background task. When a timeout is configured and expires,
    /// the caller gets [`SessionError::Timeout`] while the engine call keeps
    /// the session until it returns.
    pub async fn generate_sync(&self, prompt: &str) -> Result<String, SessionError> {
        let permit = self.acquire()?;
        let request_id = Uuid::new_v4();
        let engine = self.engine.clone();
        let prompt = self.format_prompt(prompt);
        let mut task = tokio::spawn(
            async move {
                trace!(%prompt, "llm prompt");
                let result = engine.generate(&prompt).await;
                drop(permit);
                result
            }
            .instrument(info_span!("generate", %request_id)),
        );

        let joined = match self.config.generation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(%request_id, ?limit, "generation timed out, engine still running");
                    return Err(SessionError::Timeout(limit));
                }
            },
            None => task.await,
        };
        let text = joined.map_err(|e| GenerationError::new(format!("engine task failed: {e}")))??;
        debug!(%request_id, len = text.len(), "llm full response");
        Ok(text)
    }

    /// Start generating `prompt`, delivering chunks through the returned
    /// stream.
    ///
    /// The stream buffers at most one chunk: when the consumer lags,
    /// intermediate chunks are replaced by newer ones. The final chunk is
    /// always delivered. The stream ends once the engine call has returned,
    /// at which point the session is free again. Dropping or cancelling the
    /// stream stops delivery but the session stays busy until the engine
    /// returns.
    pub fn generate_streaming(&self, prompt: &str) -> Result<GenerationStream, SessionError> {
        let permit = self.acquire()?;
        let request_id = Uuid::new_v4();
        let slot = Arc::new(ChunkSlot::new());
        let listener: ChunkListener = {
            let slot = slot.clone();
            Arc::new(move |text: String, is_final: bool| {
                trace!(%text, is_final, "llm chunk");
                slot.offer(GenerationChunk { text, is_final });
            })
        };

        let engine = self.engine.clone();
        let prompt = self.format_prompt(prompt);
        let producer_slot = slot.clone();
        tokio::spawn(
            async move {
                trace!(%prompt, "llm prompt");
                let failure = engine.generate_async(&prompt, listener).await.err();
                if let Some(e) = &failure {
                    error!(error = %e, "streaming generation failed");
                }
                // free the session before the consumer can observe the end
                drop(permit);
                producer_slot.close(failure);
            }
            .instrument(info_span!("generate_stream", %request_id)),
        );

        Ok(GenerationStream::new(request_id, slot))
    }

    /// Callback form of [`generate_streaming`](Self::generate_streaming).
    ///
    /// `on_chunk` runs on a background task for every delivered chunk.
    pub fn generate_streaming_with<F>(
        &self,
        prompt: &str,
        mut on_chunk: F,
    ) -> Result<StreamingHandle, SessionError>
    where
        F: FnMut(GenerationChunk) + Send + 'static,
    {
        let mut stream = self.generate_streaming(prompt)?;
        let slot = stream.slot.clone();
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                on_chunk(item?);
            }
            Ok::<(), SessionError>(())
        });
        Ok(StreamingHandle {
            slot,
            task: AbortGuard::new(task),
        })
    }
}

/// Chunks of one streaming request, in production order.
///
/// Yields at most one error, after which it ends.
pub struct GenerationStream {
    request_id: Uuid,
    inner: BoxStream<'static, Result<GenerationChunk, SessionError>>,
    slot: Arc<ChunkSlot>,
}

impl GenerationStream {
    fn new(request_id: Uuid, slot: Arc<ChunkSlot>) -> Self {
        let inner = stream::unfold(slot.clone(), |slot| async move {
            let item = slot.take().await?;
            Some((item, slot))
        })
        .boxed();
        Self {
            request_id,
            inner,
            slot,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Intermediate chunks dropped because the consumer lagged.
    pub fn dropped_chunks(&self) -> usize {
        self.slot.dropped()
    }

    /// Stop delivering chunks.
    ///
    /// The engine is not interrupted. Keep polling to learn when it has
    /// returned: the stream then yields [`SessionError::Cancelled`] (unless
    /// the final chunk was already taken) and ends.
    pub fn cancel(&self) {
        self.slot.cancel();
    }

    /// Concatenate the remaining chunks.
    ///
    /// Text dropped under backpressure is lost, so this is only the full
    /// response when the stream is consumed without contention.
    pub async fn collect_text(mut self) -> Result<String, SessionError> {
        let mut out = String::new();
        while let Some(chunk) = self.next().await {
            out.push_str(&chunk?.text);
        }
        Ok(out)
    }
}

impl Stream for GenerationStream {
    type Item = Result<GenerationChunk, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.slot.cancel();
        debug!(
            request_id = %self.request_id,
            dropped = self.slot.dropped(),
            "generation stream closed"
        );
    }
}

/// Handle to a callback-driven streaming request.
///
/// Dropping the handle stops the callback.
pub struct StreamingHandle {
    slot: Arc<ChunkSlot>,
    task: AbortGuard<Result<(), SessionError>>,
}

impl StreamingHandle {
    /// Stop invoking the callback. [`join`](Self::join) then waits for the
    /// engine to return and reports [`SessionError::Cancelled`].
    pub fn cancel(&self) {
        self.slot.cancel();
    }

    /// Wait for the request to finish.
    pub async fn join(self) -> Result<(), SessionError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SessionError::Cancelled),
            Err(e) => Err(GenerationError::new(format!("callback task failed: {e}")).into()),
        }
    }
}
