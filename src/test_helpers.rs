#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::engine::{ChunkListener, EmbeddingEngine, GenerativeEngine};
use crate::error::{EmbeddingError, GenerationError};

/// [`GenerativeEngine`] replaying a fixed list of chunks.
#[derive(Clone)]
pub struct ScriptedEngine {
    chunks: Vec<String>,
    delay: Option<Duration>,
    linger: Option<Duration>,
    emit_final: bool,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: None,
            linger: None,
            emit_final: true,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Keep running for a while after the last chunk.
    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = Some(linger);
        self
    }

    /// Never mark a chunk as final.
    pub fn without_final(mut self) -> Self {
        self.emit_final = false;
        self
    }

    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenerativeEngine for ScriptedEngine {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.pause().await;
        Ok(self.chunks.concat())
    }

    async fn generate_async(
        &self,
        prompt: &str,
        listener: ChunkListener,
    ) -> Result<(), GenerationError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.pause().await;
        let last = self.chunks.len().saturating_sub(1);
        for (i, chunk) in self.chunks.iter().enumerate() {
            (*listener)(chunk.clone(), self.emit_final && i == last);
        }
        if let Some(linger) = self.linger {
            tokio::time::sleep(linger).await;
        }
        Ok(())
    }
}

/// Emits one chunk per permit added to [`pace`](Self::pace).
pub struct PacedEngine {
    chunks: Vec<String>,
    pace: Arc<Semaphore>,
}

impl PacedEngine {
    pub fn new<const N: usize>(chunks: [&str; N]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            pace: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn pace(&self) -> Arc<Semaphore> {
        self.pace.clone()
    }
}

#[async_trait]
impl GenerativeEngine for PacedEngine {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Ok(self.chunks.concat())
    }

    async fn generate_async(
        &self,
        _prompt: &str,
        listener: ChunkListener,
    ) -> Result<(), GenerationError> {
        let last = self.chunks.len().saturating_sub(1);
        for (i, chunk) in self.chunks.iter().enumerate() {
            self.pace
                .acquire()
                .await
                .map_err(|e| GenerationError::new(e.to_string()))?
                .forget();
            (*listener)(chunk.clone(), i == last);
        }
        Ok(())
    }
}

/// Emits `first`, waits for [`gate`](Self::gate), then emits `last` as final.
pub struct GatedEngine {
    first: String,
    last: String,
    gate: Arc<Notify>,
}

impl GatedEngine {
    pub fn new(first: &str, last: &str) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
            gate: Arc::new(Notify::new()),
        }
    }

    pub fn gate(&self) -> Arc<Notify> {
        self.gate.clone()
    }
}

#[async_trait]
impl GenerativeEngine for GatedEngine {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        self.gate.notified().await;
        Ok(format!("{}{}", self.first, self.last))
    }

    async fn generate_async(
        &self,
        _prompt: &str,
        listener: ChunkListener,
    ) -> Result<(), GenerationError> {
        (*listener)(self.first.clone(), false);
        self.gate.notified().await;
        (*listener)(self.last.clone(), true);
        Ok(())
    }
}

/// Always fails.
pub struct FailingEngine;

#[async_trait]
impl GenerativeEngine for FailingEngine {
    async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::new("engine exploded"))
    }

    async fn generate_async(
        &self,
        _prompt: &str,
        _listener: ChunkListener,
    ) -> Result<(), GenerationError> {
        Err(GenerationError::new("engine exploded"))
    }
}

/// [`EmbeddingEngine`] with a fixed vector per text.
///
/// Unknown texts fail, which doubles as a way to script failures.
#[derive(Clone, Default)]
pub struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    calls: Arc<AtomicUsize>,
}

impl TableEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl EmbeddingEngine for TableEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::new(format!("no vector for {text:?}")))
    }
}

/// Unit vector at `angle` radians; cosine between two of them is
/// `cos(a - b)`.
pub fn unit(angle: f32) -> Vec<f32> {
    vec![angle.cos(), angle.sin()]
}
