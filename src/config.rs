use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::catalog::{IntentEntry, obd_catalog};
use crate::prompt::Prompts;

/// Marker Gemma-style models expect before the model turn.
pub const DEFAULT_TURN_MARKER: &str = "<start_of_turn>model\n";

/// Settings captured when the inference session is first built.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Location of the model weights. For server-backed engines this is the
    /// model tag.
    pub model_path: PathBuf,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
    /// Appended to every prompt.
    pub turn_marker: String,
    pub timeout_ms: Option<u64>,
}

impl SessionConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ..Self::default()
        }
    }

    pub fn generation_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("llm/model.bin"),
            max_tokens: 1024,
            turn_marker: DEFAULT_TURN_MARKER.into(),
            timeout_ms: None,
        }
    }
}

/// Settings for [`SemanticIntentMatcher`](crate::SemanticIntentMatcher).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Minimum cosine similarity for a match.
    pub threshold: f32,
    /// Reference embeddings computed in parallel while loading a catalog.
    pub embed_concurrency: usize,
    pub timeout_ms: Option<u64>,
}

impl MatcherConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            embed_concurrency: 4,
            timeout_ms: None,
        }
    }
}

/// Connection details for a local Ollama server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub embedding_model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            embedding_model: "nomic-embed-text".into(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub matcher: MatcherConfig,
    pub ollama: OllamaConfig,
    pub prompts: Prompts,
    #[serde(rename = "intent")]
    pub intents: Vec<IntentEntry>,
}

impl Config {
    /// Configured intents, or the built-in OBD-II catalog when none are set.
    pub fn catalog(&self) -> Vec<IntentEntry> {
        if self.intents.is_empty() {
            obd_catalog()
        } else {
            self.intents.clone()
        }
    }
}

/// Load a [`Config`] from a TOML file.
///
/// # Examples
///
/// ```no_run
/// # tokio_test::block_on(async {
/// let cfg = obd_llm::config::load("obd-llm.toml").await.unwrap();
/// assert!(cfg.matcher.threshold > 0.0);
/// # });
/// ```
pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(toml::from_str(&text)?)
}
