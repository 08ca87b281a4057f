use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::engine::{EngineLoader, FsWeights, WeightStore};
use crate::error::SessionError;
use crate::session::InferenceSession;

/// Lazily builds and then hands out the one [`InferenceSession`].
///
/// The configuration passed to the first successful
/// [`get_session`](Self::get_session) is the one the session keeps; later
/// calls receive the cached instance whatever they pass.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use obd_llm::{GenerativeEngine, InferenceSessionRegistry, SessionConfig, SessionError};
///
/// let registry = InferenceSessionRegistry::new(
///     |_: &SessionConfig| -> Result<Arc<dyn GenerativeEngine>, SessionError> {
///         unreachable!("weights are missing")
///     },
/// );
/// # tokio_test::block_on(async {
/// let err = registry
///     .get_session(&SessionConfig::new("/nonexistent/model.bin"))
///     .await
///     .err()
///     .unwrap();
/// assert!(matches!(err, SessionError::ModelNotFound { .. }));
/// # });
/// ```
pub struct InferenceSessionRegistry {
    loader: Arc<dyn EngineLoader>,
    weights: Arc<dyn WeightStore>,
    session: Mutex<Option<Arc<InferenceSession>>>,
}

impl InferenceSessionRegistry {
    /// Registry checking weights on the local filesystem.
    pub fn new(loader: impl EngineLoader + 'static) -> Self {
        Self::with_weights(loader, FsWeights)
    }

    pub fn with_weights(
        loader: impl EngineLoader + 'static,
        weights: impl WeightStore + 'static,
    ) -> Self {
        Self {
            loader: Arc::new(loader),
            weights: Arc::new(weights),
            session: Mutex::new(None),
        }
    }

    /// Return the session, building it on first use.
    ///
    /// Construction runs under the registry lock, so concurrent first
    /// callers wait for a single load. A failed load leaves the registry
    /// empty and a later call tries again.
    pub async fn get_session(
        &self,
        config: &SessionConfig,
    ) -> Result<Arc<InferenceSession>, SessionError> {
        let mut cached = self.session.lock().await;
        if let Some(session) = cached.as_ref() {
            if session.config() != config {
                warn!(
                    requested = %config.model_path.display(),
                    active = %session.config().model_path.display(),
                    "session already built, ignoring new configuration"
                );
            }
            return Ok(session.clone());
        }

        if !self.weights.exists(&config.model_path).await {
            return Err(SessionError::ModelNotFound {
                path: config.model_path.clone(),
            });
        }
        info!(path = %config.model_path.display(), max_tokens = config.max_tokens, "loading model");
        let engine = self.loader.load(config).await?;
        let session = Arc::new(InferenceSession::new(engine, config.clone()));
        *cached = Some(session.clone());
        Ok(session)
    }

    /// Whether a session has been built.
    pub async fn is_initialized(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::GenerativeEngine;
    use crate::test_helpers::ScriptedEngine;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct AlwaysThere;

    #[async_trait::async_trait]
    impl WeightStore for AlwaysThere {
        async fn exists(&self, _path: &Path) -> bool {
            true
        }
    }

    fn counting_loader(
        count: Arc<AtomicUsize>,
    ) -> impl Fn(&SessionConfig) -> Result<Arc<dyn GenerativeEngine>, SessionError> {
        move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            // widen the race window
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Arc::new(ScriptedEngine::new(["ok"])) as Arc<dyn GenerativeEngine>)
        }
    }

    #[tokio::test]
    async fn missing_weights_fail_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("llm/model.bin");
        let count = Arc::new(AtomicUsize::new(0));
        let registry = InferenceSessionRegistry::new(counting_loader(count.clone()));
        let err = registry
            .get_session(&SessionConfig::new(&path))
            .await
            .err()
            .unwrap();
        assert_eq!(err, SessionError::ModelNotFound { path });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!registry.is_initialized().await);
    }

    #[tokio::test]
    async fn later_calls_reuse_first_configuration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.bin");
        tokio::fs::write(&path, b"weights").await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let registry = InferenceSessionRegistry::new(counting_loader(count.clone()));

        let first = registry.get_session(&SessionConfig::new(&path)).await.unwrap();
        let other = SessionConfig {
            max_tokens: 8,
            ..SessionConfig::new("/elsewhere")
        };
        let second = registry.get_session(&other).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.config().model_path, path);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_build_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(InferenceSessionRegistry::with_weights(
            counting_loader(count.clone()),
            AlwaysThere,
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .get_session(&SessionConfig::default())
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let loader = {
            let attempts = attempts.clone();
            move |_: &SessionConfig| -> Result<Arc<dyn GenerativeEngine>, SessionError> {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SessionError::Load("corrupt weights".into()))
                } else {
                    Ok(Arc::new(ScriptedEngine::new(["ok"])))
                }
            }
        };
        let registry = InferenceSessionRegistry::with_weights(loader, AlwaysThere);
        let config = SessionConfig::default();
        assert!(matches!(
            registry.get_session(&config).await,
            Err(SessionError::Load(_))
        ));
        let session = registry.get_session(&config).await.unwrap();
        assert_eq!(session.generate_sync("q").await.unwrap(), "ok");
    }
}
