use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::catalog::{IntentCatalog, IntentEntry};
use crate::config::MatcherConfig;
use crate::engine::EmbeddingEngine;
use crate::error::{EmbeddingError, MatchError};

pub const EMPTY_CATALOG: &str = "empty catalog";
pub const NO_ENTRY_MET_THRESHOLD: &str = "no entry met threshold";

/// Result of one classification.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched { code: String, score: f32 },
    NoMatch { reason: String },
}

impl MatchOutcome {
    fn no_match(reason: &str) -> Self {
        MatchOutcome::NoMatch {
            reason: reason.into(),
        }
    }

    /// The matched code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { code, .. } => Some(code),
            MatchOutcome::NoMatch { .. } => None,
        }
    }
}

/// Score of one catalog entry against a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityResult {
    pub code: String,
    pub reference_text: String,
    pub query_embedding: Vec<f32>,
    pub reference_embedding: Vec<f32>,
    pub score: f32,
}

/// An entry left out of ranking because its reference text failed to embed.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryFailure {
    pub code: String,
    pub error: EmbeddingError,
}

/// Summary of a [`SemanticIntentMatcher::load_catalog`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogReport {
    pub entries: usize,
    pub failures: Vec<EntryFailure>,
}

/// Cosine similarity of two vectors.
///
/// Returns `None` when the dimensions differ or the vectors are empty, and
/// `0.0` when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        Some(0.0)
    } else {
        Some(dot / (norm_a * norm_b))
    }
}

/// Highest-scoring result at or above `threshold`; the earliest wins ties.
fn select_best(scored: &[SimilarityResult], threshold: f32) -> MatchOutcome {
    let mut best: Option<&SimilarityResult> = None;
    for result in scored {
        // NaN never qualifies
        if !(result.score >= threshold) {
            continue;
        }
        match best {
            Some(top) if result.score <= top.score => {}
            _ => best = Some(result),
        }
    }
    match best {
        Some(top) => MatchOutcome::Matched {
            code: top.code.clone(),
            score: top.score,
        },
        None => MatchOutcome::no_match(NO_ENTRY_MET_THRESHOLD),
    }
}

/// Maps free-text queries onto a fixed catalog by embedding similarity.
///
/// Reference embeddings are computed once per [`load_catalog`] and shared by
/// every classification. Loading builds a fresh snapshot and swaps it in, so
/// in-flight classifications finish against the catalog they started with.
/// Loads run one at a time in call order, so the last call wins.
///
/// [`load_catalog`]: SemanticIntentMatcher::load_catalog
pub struct SemanticIntentMatcher {
    embedder: Arc<dyn EmbeddingEngine>,
    config: MatcherConfig,
    catalog: RwLock<Arc<IntentCatalog>>,
    loading: Mutex<()>,
}

impl SemanticIntentMatcher {
    pub fn new(embedder: Arc<dyn EmbeddingEngine>) -> Self {
        Self::with_config(embedder, MatcherConfig::default())
    }

    pub fn with_config(embedder: Arc<dyn EmbeddingEngine>, config: MatcherConfig) -> Self {
        Self {
            embedder,
            config,
            catalog: RwLock::new(Arc::new(IntentCatalog::default())),
            loading: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Current catalog snapshot.
    pub async fn catalog(&self) -> Arc<IntentCatalog> {
        self.catalog.read().await.clone()
    }

    /// Replace the catalog, embedding every reference text.
    ///
    /// An entry whose text fails to embed is skipped and listed in the
    /// report; the rest of the catalog still loads.
    pub async fn load_catalog(&self, entries: Vec<IntentEntry>) -> CatalogReport {
        let _loading = self.loading.lock().await;
        let embedder = &self.embedder;
        let results: Vec<Result<Vec<f32>, EmbeddingError>> = stream::iter(entries.iter())
            .map(|entry| embedder.embed(&entry.text))
            .buffered(self.config.embed_concurrency.max(1))
            .collect()
            .await;

        let mut failures = Vec::new();
        let embeddings = entries
            .iter()
            .zip(results)
            .map(|(entry, result)| match result {
                Ok(vector) => Some(vector),
                Err(error) => {
                    warn!(code = %entry.code, %error, "skipping catalog entry");
                    failures.push(EntryFailure {
                        code: entry.code.clone(),
                        error,
                    });
                    None
                }
            })
            .collect();

        let catalog = IntentCatalog::new(entries, embeddings);
        let report = CatalogReport {
            entries: catalog.len(),
            failures,
        };
        *self.catalog.write().await = Arc::new(catalog);
        info!(
            entries = report.entries,
            skipped = report.failures.len(),
            "intent catalog loaded"
        );
        report
    }

    /// Classify `query` using the configured threshold.
    pub async fn classify(&self, query: &str) -> Result<MatchOutcome, MatchError> {
        self.classify_with_threshold(query, self.config.threshold).await
    }

    /// Classify `query`, accepting entries scoring at least `threshold`.
    pub async fn classify_with_threshold(
        &self,
        query: &str,
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError> {
        let work = async {
            let catalog = self.catalog().await;
            if catalog.is_empty() {
                debug!("classification against empty catalog");
                return Ok(MatchOutcome::no_match(EMPTY_CATALOG));
            }
            let scored = self.score(&catalog, query).await?;
            let outcome = select_best(&scored, threshold);
            debug!(%query, ?outcome, "classified query");
            Ok::<_, MatchError>(outcome)
        };
        match self.config.timeout() {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| MatchError::Timeout(limit))?,
            None => work.await,
        }
    }

    /// Score `query` against every rankable entry, in catalog order.
    pub async fn rank(&self, query: &str) -> Result<Vec<SimilarityResult>, MatchError> {
        let catalog = self.catalog().await;
        if catalog.is_empty() {
            return Ok(Vec::new());
        }
        self.score(&catalog, query).await
    }

    async fn score(
        &self,
        catalog: &IntentCatalog,
        query: &str,
    ) -> Result<Vec<SimilarityResult>, MatchError> {
        let query_embedding = self.embedder.embed(query).await?;
        let mut scored = Vec::with_capacity(catalog.len());
        for (entry, reference) in catalog.embedded() {
            let Some(score) = cosine_similarity(&query_embedding, reference) else {
                warn!(
                    code = %entry.code,
                    query_dim = query_embedding.len(),
                    reference_dim = reference.len(),
                    "embedding dimensions differ, skipping entry"
                );
                continue;
            };
            trace!(code = %entry.code, score, "similarity");
            scored.push(SimilarityResult {
                code: entry.code.clone(),
                reference_text: entry.text.clone(),
                query_embedding: query_embedding.clone(),
                reference_embedding: reference.to_vec(),
                score,
            });
        }
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{TableEmbedder, unit};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn entries() -> Vec<IntentEntry> {
        vec![
            IntentEntry::new("0105", "coolant temperature"),
            IntentEntry::new("010C", "engine rpm"),
        ]
    }

    /// Query at angle 0; "engine rpm" at cos⁻¹(0.97), coolant at cos⁻¹(0.40).
    fn embedder() -> TableEmbedder {
        TableEmbedder::new()
            .with("what's my engine speed", unit(0.0))
            .with("engine rpm", unit(0.97f32.acos()))
            .with("coolant temperature", unit(0.40f32.acos()))
            .with("tell me a joke", unit(1.5))
    }

    async fn matcher(embedder: TableEmbedder) -> SemanticIntentMatcher {
        let m = SemanticIntentMatcher::new(Arc::new(embedder));
        m.load_catalog(entries()).await;
        m
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), Some(0.0));
        let s = cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn matches_engine_speed_to_rpm() {
        let m = matcher(embedder()).await;
        match m.classify("what's my engine speed").await.unwrap() {
            MatchOutcome::Matched { code, score } => {
                assert_eq!(code, "010C");
                assert!((score - 0.97).abs() < 1e-4);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrelated_query_meets_no_threshold() {
        let m = matcher(embedder()).await;
        assert_eq!(
            m.classify("tell me a joke").await.unwrap(),
            MatchOutcome::NoMatch {
                reason: NO_ENTRY_MET_THRESHOLD.into()
            }
        );
    }

    #[tokio::test]
    async fn empty_catalog_never_embeds() {
        let embedder = embedder();
        let calls = embedder.calls();
        let m = SemanticIntentMatcher::new(Arc::new(embedder));
        let outcome = m.classify("what's my engine speed").await.unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::NoMatch {
                reason: EMPTY_CATALOG.into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn references_are_embedded_once_per_load() {
        let embedder = embedder();
        let calls = embedder.calls();
        let m = matcher(embedder).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        m.classify("what's my engine speed").await.unwrap();
        m.classify("what's my engine speed").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn ties_go_to_the_earlier_entry() {
        let embedder = TableEmbedder::new()
            .with("q", unit(0.0))
            .with("first", unit(0.1))
            .with("second", unit(0.1));
        let m = SemanticIntentMatcher::new(Arc::new(embedder));
        m.load_catalog(vec![
            IntentEntry::new("B", "first"),
            IntentEntry::new("A", "second"),
        ])
        .await;
        for _ in 0..5 {
            let outcome = m.classify_with_threshold("q", 0.5).await.unwrap();
            assert_eq!(outcome.code(), Some("B"));
        }
    }

    #[tokio::test]
    async fn lowering_threshold_keeps_qualifying_best() {
        let m = matcher(embedder()).await;
        let mut last_best = None;
        for threshold in [0.99, 0.97, 0.9, 0.5, 0.3, -1.0] {
            let outcome = m
                .classify_with_threshold("what's my engine speed", threshold)
                .await
                .unwrap();
            if let MatchOutcome::Matched { score, .. } = &outcome {
                assert!(*score >= threshold);
            }
            if let Some(best) = &last_best {
                assert_eq!(&outcome, best);
            }
            if outcome.code().is_some() {
                last_best = Some(outcome);
            }
        }
        assert_eq!(last_best.unwrap().code(), Some("010C"));
    }

    #[tokio::test]
    async fn query_embedding_failure_is_an_error() {
        let m = matcher(embedder()).await;
        let err = m.classify("unknown text").await.unwrap_err();
        assert!(matches!(err, MatchError::Embedding(_)));
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_reference_is_skipped_and_reported() {
        let embedder = TableEmbedder::new()
            .with("q", unit(0.0))
            .with("good", unit(0.0));
        let m = SemanticIntentMatcher::new(Arc::new(embedder));
        let report = m
            .load_catalog(vec![
                IntentEntry::new("BAD", "bad"),
                IntentEntry::new("GOOD", "good"),
            ])
            .await;
        assert_eq!(report.entries, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code, "BAD");
        assert!(logs_contain("skipping catalog entry"));

        let ranked = m.rank("q").await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(m.classify("q").await.unwrap().code(), Some("GOOD"));
    }

    #[tokio::test]
    async fn reload_replaces_catalog() {
        let embedder = embedder().with("new", unit(0.0));
        let m = matcher(embedder).await;
        m.load_catalog(vec![IntentEntry::new("NEW", "new")]).await;
        assert_eq!(m.catalog().await.len(), 1);
        assert_eq!(
            m.classify("what's my engine speed").await.unwrap().code(),
            Some("NEW")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_loads_keep_the_later_call() {
        struct Uneven;
        #[async_trait::async_trait]
        impl EmbeddingEngine for Uneven {
            async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
                if text == "slow" {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(unit(0.0))
            }
        }
        let m = SemanticIntentMatcher::new(Arc::new(Uneven));
        let (first, second) = tokio::join!(
            m.load_catalog(vec![IntentEntry::new("OLD", "slow")]),
            m.load_catalog(vec![IntentEntry::new("NEW", "fast")]),
        );
        assert_eq!((first.entries, second.entries), (1, 1));
        assert_eq!(m.classify("anything").await.unwrap().code(), Some("NEW"));
    }

    #[tokio::test]
    async fn rank_keeps_catalog_order() {
        let m = matcher(embedder()).await;
        let ranked = m.rank("what's my engine speed").await.unwrap();
        let codes: Vec<_> = ranked.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["0105", "010C"]);
        assert_eq!(ranked[1].reference_text, "engine rpm");
        assert_eq!(ranked[1].query_embedding, unit(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn classification_can_time_out() {
        struct Stalled;
        #[async_trait::async_trait]
        impl EmbeddingEngine for Stalled {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(vec![1.0])
            }
        }
        let config = MatcherConfig {
            timeout_ms: Some(100),
            ..MatcherConfig::default()
        };
        let m = SemanticIntentMatcher::with_config(Arc::new(Stalled), config);
        m.load_catalog(entries()).await;
        let err = m.classify("q").await.unwrap_err();
        assert_eq!(err, MatchError::Timeout(Duration::from_millis(100)));
    }
}
