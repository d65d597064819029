// The trust analysis pipeline.
//
// fetch → embed → cache lookup → (miss) ensemble → reasoning → write-back.
//
// Only an image download failure ends a request without a verdict. Every
// other stage has a documented fallback:
//   - embedding fails      → treated as a cache miss, no write-back
//   - cache backend fails  → miss
//   - a classifier fails   → Signal::Unknown (0.5)
//   - reasoner fails       → local deterministic bands
// Cache writes run in the background and never delay the verdict.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::cache::{CacheLookup, VectorIndex, VerdictCache, DEFAULT_SIMILARITY_THRESHOLD};
use super::ensemble::{Ensemble, EnsembleThresholds};
use super::error::AnalysisError;
use super::reasoning::{Reasoner, ReasoningInput, ReasoningSynthesizer, DEFAULT_REASONER_TIMEOUT};
use super::request::AnalysisRequest;
use super::traits::{FaceDetector, ImageClassifier, ImageEmbedder, ImageFetcher};
use super::verdict::{probability_to_score, CachePayload, Verdict};

pub const DEFAULT_INFERENCE_WORKERS: usize = 2;

/// Tunables for one pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub similarity_threshold: f64,
    pub thresholds: EnsembleThresholds,
    /// Max concurrent model invocations
    pub inference_workers: usize,
    pub reasoner_timeout: Duration,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            thresholds: EnsembleThresholds::default(),
            inference_workers: DEFAULT_INFERENCE_WORKERS,
            reasoner_timeout: DEFAULT_REASONER_TIMEOUT,
        }
    }
}

/// Everything the pipeline talks to, injected at construction.
pub struct PipelineServices {
    pub fetcher: Arc<dyn ImageFetcher>,
    pub embedder: Arc<dyn ImageEmbedder>,
    pub diffusion: Arc<dyn ImageClassifier>,
    pub gan_face: Arc<dyn ImageClassifier>,
    pub faces: Arc<dyn FaceDetector>,
    pub index: Arc<dyn VectorIndex>,
    pub reasoner: Arc<dyn Reasoner>,
}

pub struct TrustPipeline {
    fetcher: Arc<dyn ImageFetcher>,
    embedder: Arc<dyn ImageEmbedder>,
    cache: VerdictCache,
    ensemble: Ensemble,
    synthesizer: ReasoningSynthesizer,
    pending_writes: Mutex<JoinSet<()>>,
}

impl TrustPipeline {
    pub fn new(services: PipelineServices, settings: AnalysisSettings) -> Self {
        Self {
            fetcher: services.fetcher,
            embedder: services.embedder,
            cache: VerdictCache::new(services.index, settings.similarity_threshold),
            ensemble: Ensemble::new(
                services.diffusion,
                services.gan_face,
                services.faces,
                settings.inference_workers,
                settings.thresholds,
            ),
            synthesizer: ReasoningSynthesizer::new(services.reasoner, settings.reasoner_timeout),
            pending_writes: Mutex::new(JoinSet::new()),
        }
    }

    /// Make sure the cache collection exists. Returns false if the cache
    /// backend is unreachable; analysis still works without it.
    pub async fn prepare(&self) -> bool {
        self.cache.prepare(self.embedder.dimension()).await
    }

    pub fn cache(&self) -> &VerdictCache {
        &self.cache
    }

    /// Analyze one request and return its verdict.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<Verdict, AnalysisError> {
        let Some(url) = request.primary_url() else {
            debug!("No media in request");
            return Ok(Verdict::no_media());
        };

        let bytes = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|e| AnalysisError::Fetch {
                url: url.to_string(),
                message: format!("{e:#}"),
            })?;
        let image: Arc<[u8]> = Arc::from(bytes);
        let digest = hex::encode(Sha256::digest(&*image));

        let embedding = match self.embedder.embed(Arc::clone(&image)).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(error = %e, "Embedding failed, skipping cache");
                None
            }
        };

        if let Some(embedding) = &embedding {
            if let CacheLookup::Hit {
                verdict,
                similarity,
            } = self.cache.lookup(embedding).await
            {
                info!(
                    similarity,
                    risk = %verdict.risk_level,
                    trust = verdict.trust_score,
                    "Cache hit"
                );
                return Ok(verdict);
            }
        }

        let outcome = self.ensemble.run(image).await;
        let input = ReasoningInput {
            sub_scores: outcome.sub_scores.clone(),
            is_fake: outcome.is_fake,
            metadata: outcome.metadata,
            context: request.context_text(),
            question: request.question().map(str::to_string),
        };
        let assessment = self.synthesizer.synthesize(&input).await;

        let mut verdict = Verdict::new(
            assessment.risk_level,
            assessment.trust_score as f64,
            assessment.summary,
            assessment.confidence,
            assessment.provenance,
        );
        verdict.is_fake = outcome.is_fake;
        verdict.ai_generated_score = outcome.sub_scores.measured_max().map(probability_to_score);
        verdict.sub_scores = Some(outcome.sub_scores);

        info!(
            risk = %verdict.risk_level,
            trust = verdict.trust_score,
            is_fake = verdict.is_fake,
            provenance = ?verdict.provenance,
            "Analysis complete"
        );

        if let Some(embedding) = embedding {
            self.spawn_write_back(embedding, verdict.to_payload(&digest))
                .await;
        }

        Ok(verdict)
    }

    async fn spawn_write_back(&self, embedding: Vec<f32>, payload: CachePayload) {
        let cache = self.cache.clone();
        let mut pending = self.pending_writes.lock().await;

        // Reap finished writes so the set doesn't grow without bound.
        while pending.try_join_next().is_some() {}

        pending.spawn(async move {
            if let Err(e) = cache.store(embedding, payload).await {
                warn!(error = %e, "Cache write-back failed");
            }
        });
    }

    /// Wait for every queued cache write. Returns how many were awaited.
    pub async fn drain_writes(&self) -> usize {
        let mut pending = self.pending_writes.lock().await;
        let mut drained = 0;
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Cache write task panicked");
            }
            drained += 1;
        }
        drained
    }
}
