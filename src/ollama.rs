//! Engines backed by a local [Ollama](https://ollama.com) server.
//!
//! # Examples
//!
//! ```no_run
//! use obd_llm::ollama::{OllamaLoader, OllamaWeights, build_ollama};
//! use obd_llm::{InferenceSessionRegistry, SessionConfig};
//!
//! # tokio_test::block_on(async {
//! let client = build_ollama("http://localhost:11434").unwrap();
//! let registry = InferenceSessionRegistry::with_weights(
//!     OllamaLoader::new(client.clone()),
//!     OllamaWeights::new(client),
//! );
//! let session = registry.get_session(&SessionConfig::new("gemma2:2b")).await.unwrap();
//! println!("{}", session.generate_sync("Hello").await.unwrap());
//! # });
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use ollama_rs::Ollama;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::generation::embeddings::request::GenerateEmbeddingsRequest;
use ollama_rs::models::ModelOptions;
use tracing::{debug, trace, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::engine::{ChunkListener, EmbeddingEngine, EngineLoader, GenerativeEngine, WeightStore};
use crate::error::{EmbeddingError, GenerationError, SessionError};

/// Build an [`Ollama`] client for `base_url`, e.g. `http://localhost:11434`.
pub fn build_ollama(base_url: &str) -> anyhow::Result<Ollama> {
    let url = Url::parse(base_url).with_context(|| format!("invalid base url {base_url}"))?;
    let host = format!(
        "{}://{}",
        url.scheme(),
        url.host_str().context("base url has no host")?
    );
    let port = url.port_or_known_default().context("base url has no port")?;
    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .build()
        .context("ollama http client")?;
    Ok(Ollama::new_with_client(host, port, http))
}

/// [`GenerativeEngine`] using `/api/generate`.
#[derive(Clone)]
pub struct OllamaGenerator {
    client: Ollama,
    model: String,
    max_tokens: u32,
}

impl OllamaGenerator {
    pub fn new(client: Ollama, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, prompt: &str) -> GenerationRequest {
        let num_predict = i32::try_from(self.max_tokens).unwrap_or(i32::MAX);
        GenerationRequest::new(self.model.clone(), prompt.to_string())
            .options(ModelOptions::default().num_predict(num_predict))
    }
}

#[async_trait]
impl GenerativeEngine for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let resp = self
            .client
            .generate(self.request(prompt))
            .await
            .map_err(|e| GenerationError::new(e.to_string()))?;
        Ok(resp.response)
    }

    async fn generate_async(
        &self,
        prompt: &str,
        listener: ChunkListener,
    ) -> Result<(), GenerationError> {
        let mut stream = self
            .client
            .generate_stream(self.request(prompt))
            .await
            .map_err(|e| GenerationError::new(e.to_string()))?;

        let mut done = false;
        while !done {
            let Some(batch) = stream.next().await else {
                break;
            };
            let batch = batch.map_err(|e| GenerationError::new(e.to_string()))?;
            for resp in batch {
                trace!(token = %resp.response, done = resp.done, "ollama token");
                (*listener)(resp.response, resp.done);
                if resp.done {
                    done = true;
                    break;
                }
            }
        }
        if !done {
            debug!(model = %self.model, "stream closed without done flag");
            (*listener)(String::new(), true);
        }
        Ok(())
    }
}

/// [`EmbeddingEngine`] using `/api/embed`.
#[derive(Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: Ollama, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingEngine for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let res = self
            .client
            .generate_embeddings(GenerateEmbeddingsRequest::new(
                self.model.clone(),
                text.into(),
            ))
            .await
            .map_err(|e| EmbeddingError::new(e.to_string()))?;
        res.embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::new("server returned no embedding"))
    }
}

/// [`WeightStore`] treating the path as a model tag installed on the server.
///
/// A tag without a version matches its `:latest` variant.
#[derive(Clone)]
pub struct OllamaWeights {
    client: Ollama,
}

impl OllamaWeights {
    pub fn new(client: Ollama) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WeightStore for OllamaWeights {
    async fn exists(&self, path: &Path) -> bool {
        let tag = path.to_string_lossy();
        match self.client.list_local_models().await {
            Ok(models) => models
                .iter()
                .any(|m| m.name == tag || m.name == format!("{tag}:latest")),
            Err(e) => {
                warn!(error = %e, "failed to list ollama models");
                false
            }
        }
    }
}

/// [`EngineLoader`] producing an [`OllamaGenerator`] for the configured tag.
#[derive(Clone)]
pub struct OllamaLoader {
    client: Ollama,
}

impl OllamaLoader {
    pub fn new(client: Ollama) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EngineLoader for OllamaLoader {
    async fn load(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<dyn GenerativeEngine>, SessionError> {
        let model = config.model_path.to_string_lossy();
        Ok(Arc::new(OllamaGenerator::new(
            self.client.clone(),
            model,
            config.max_tokens,
        )))
    }
}
