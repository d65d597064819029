// Verdict cache: previously analyzed images keyed by visual embedding.
//
// The backing store is any VectorIndex (Qdrant in production, an in-memory
// index in tests or when no Qdrant URL is configured). Records are append
// only: each write gets a fresh random point id and nothing is updated in
// place. A backend failure is never fatal to an analysis; lookups degrade to
// a miss and writes are dropped with a warning.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::embedding::cosine_similarity;
use super::verdict::{CachePayload, Verdict};

/// Default cosine similarity at or above which a cached verdict is reused.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.90;

pub const DEFAULT_COLLECTION: &str = "sentinel_verdicts";

/// Errors returned by similarity index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to connect to vector index at '{url}': {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("failed to create collection '{collection}': {message}")]
    CreateCollectionFailed { collection: String, message: String },

    #[error("collection not found: {collection}")]
    CollectionNotFound { collection: String },

    #[error("failed to upsert into '{collection}': {message}")]
    UpsertFailed { collection: String, message: String },

    #[error("failed to search '{collection}': {message}")]
    SearchFailed { collection: String, message: String },

    #[error("failed to count points in '{collection}': {message}")]
    CountFailed { collection: String, message: String },

    #[error("invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// One nearest-neighbour match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    /// Cosine similarity, higher is closer
    pub score: f32,
    pub payload: CachePayload,
}

/// A cosine-distance vector collection holding cached verdicts.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Backend description for logs and `status`.
    fn describe(&self) -> String;

    /// Create the collection if it doesn't exist. Idempotent.
    async fn ensure_collection(&self, dimension: usize) -> Result<(), IndexError>;

    async fn upsert(&self, id: u64, vector: Vec<f32>, payload: CachePayload) -> Result<(), IndexError>;

    /// Nearest neighbours ranked by descending similarity.
    async fn search(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<SearchHit>, IndexError>;

    async fn point_count(&self) -> Result<u64, IndexError>;
}

// ============================================================
// In-memory index
// ============================================================

#[derive(Default)]
struct MemoryCollection {
    dimension: usize,
    points: HashMap<u64, (Vec<f32>, CachePayload)>,
}

/// Brute-force index held in process memory. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryIndex {
    collection: RwLock<Option<MemoryCollection>>,
}

const MEMORY_COLLECTION: &str = "in-memory";

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn describe(&self) -> String {
        "in-memory index".to_string()
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<(), IndexError> {
        let mut guard = self
            .collection
            .write()
            .map_err(|_| IndexError::CreateCollectionFailed {
                collection: MEMORY_COLLECTION.to_string(),
                message: "lock poisoned".to_string(),
            })?;

        if guard.is_none() {
            *guard = Some(MemoryCollection {
                dimension,
                points: HashMap::new(),
            });
        }
        Ok(())
    }

    async fn upsert(&self, id: u64, vector: Vec<f32>, payload: CachePayload) -> Result<(), IndexError> {
        let mut guard = self
            .collection
            .write()
            .map_err(|_| IndexError::UpsertFailed {
                collection: MEMORY_COLLECTION.to_string(),
                message: "lock poisoned".to_string(),
            })?;

        let coll = guard.as_mut().ok_or_else(|| IndexError::CollectionNotFound {
            collection: MEMORY_COLLECTION.to_string(),
        })?;

        if vector.len() != coll.dimension {
            return Err(IndexError::InvalidDimension {
                expected: coll.dimension,
                actual: vector.len(),
            });
        }

        coll.points.insert(id, (vector, payload));
        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<SearchHit>, IndexError> {
        let guard = self
            .collection
            .read()
            .map_err(|_| IndexError::SearchFailed {
                collection: MEMORY_COLLECTION.to_string(),
                message: "lock poisoned".to_string(),
            })?;

        let coll = guard.as_ref().ok_or_else(|| IndexError::CollectionNotFound {
            collection: MEMORY_COLLECTION.to_string(),
        })?;

        if vector.len() != coll.dimension {
            return Err(IndexError::InvalidDimension {
                expected: coll.dimension,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<SearchHit> = coll
            .points
            .iter()
            .map(|(id, (stored, payload))| SearchHit {
                id: *id,
                score: cosine_similarity(&vector, stored) as f32,
                payload: payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k as usize);
        Ok(hits)
    }

    async fn point_count(&self) -> Result<u64, IndexError> {
        let guard = self
            .collection
            .read()
            .map_err(|_| IndexError::CountFailed {
                collection: MEMORY_COLLECTION.to_string(),
                message: "lock poisoned".to_string(),
            })?;
        Ok(guard.as_ref().map(|c| c.points.len() as u64).unwrap_or(0))
    }
}

// ============================================================
// Verdict cache
// ============================================================

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit { verdict: Verdict, similarity: f64 },
    Miss,
    /// The backend failed; treated like a miss by the caller.
    Unavailable,
}

#[derive(Clone)]
pub struct VerdictCache {
    index: Arc<dyn VectorIndex>,
    threshold: f64,
}

impl VerdictCache {
    pub fn new(index: Arc<dyn VectorIndex>, threshold: f64) -> Self {
        Self { index, threshold }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Ensure the backing collection exists. Failure is logged and the cache
    /// keeps operating in degraded mode.
    pub async fn prepare(&self, dimension: usize) -> bool {
        match self.index.ensure_collection(dimension).await {
            Ok(()) => true,
            Err(e) => {
                warn!(index = %self.index.describe(), error = %e, "Verdict cache unavailable");
                false
            }
        }
    }

    /// Top-1 lookup. A hit requires similarity at or above the threshold and
    /// a payload that still parses into a verdict.
    pub async fn lookup(&self, embedding: &[f32]) -> CacheLookup {
        let hits = match self.index.search(embedding.to_vec(), 1).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, treating as miss");
                return CacheLookup::Unavailable;
            }
        };

        let Some(best) = hits.into_iter().next() else {
            return CacheLookup::Miss;
        };

        let similarity = best.score as f64;
        if similarity < self.threshold {
            debug!(similarity, threshold = self.threshold, "Nearest cached image below threshold");
            return CacheLookup::Miss;
        }

        match Verdict::from_cache(&best.payload) {
            Some(verdict) => CacheLookup::Hit {
                verdict,
                similarity,
            },
            None => {
                warn!(point = best.id, risk = %best.payload.risk_level, "Ignoring cached verdict with unknown risk level");
                CacheLookup::Miss
            }
        }
    }

    /// Append a record under a fresh random id.
    pub async fn store(&self, embedding: Vec<f32>, payload: CachePayload) -> Result<u64, IndexError> {
        let id: u64 = rand::random();
        self.index.upsert(id, embedding, payload).await?;
        debug!(point = id, "Cached verdict");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::verdict::RiskLevel;

    fn payload(risk: &str, trust: i64) -> CachePayload {
        CachePayload {
            is_fake: risk != "low",
            fake_probability: 0.82,
            risk_level: risk.to_string(),
            trust_score: trust,
            reasoning: "cached reasoning".to_string(),
            confidence: 0.8,
            image_digest: "deadbeef".to_string(),
            cached_at: "2026-10-16T00:00:00Z".to_string(),
        }
    }

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        fn describe(&self) -> String {
            "broken".to_string()
        }
        async fn ensure_collection(&self, _dimension: usize) -> Result<(), IndexError> {
            Err(IndexError::ConnectionFailed {
                url: "http://nowhere".into(),
                message: "refused".into(),
            })
        }
        async fn upsert(&self, _id: u64, _v: Vec<f32>, _p: CachePayload) -> Result<(), IndexError> {
            Err(IndexError::CollectionNotFound {
                collection: "x".into(),
            })
        }
        async fn search(&self, _v: Vec<f32>, _k: u64) -> Result<Vec<SearchHit>, IndexError> {
            Err(IndexError::SearchFailed {
                collection: "x".into(),
                message: "refused".into(),
            })
        }
        async fn point_count(&self) -> Result<u64, IndexError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_in_memory_search_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index.ensure_collection(2).await.unwrap();
        index.upsert(1, vec![1.0, 0.0], payload("low", 95)).await.unwrap();
        index.upsert(2, vec![0.0, 1.0], payload("high", 3)).await.unwrap();
        index.upsert(3, vec![0.7, 0.7], payload("medium", 50)).await.unwrap();

        let hits = index.search(vec![0.1, 1.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[1].id, 3);
        assert_eq!(index.point_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_in_memory_rejects_wrong_dimension() {
        let index = InMemoryIndex::new();
        index.ensure_collection(3).await.unwrap();
        let err = index.upsert(1, vec![1.0], payload("low", 90)).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidDimension { expected: 3, actual: 1 }));
    }

    #[tokio::test]
    async fn test_in_memory_requires_collection() {
        let index = InMemoryIndex::new();
        assert!(index.search(vec![1.0], 1).await.is_err());
        assert_eq!(index.point_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_hit_and_threshold() {
        let index = Arc::new(InMemoryIndex::new());
        let cache = VerdictCache::new(index.clone(), 0.90);
        assert!(cache.prepare(2).await);
        cache.store(vec![1.0, 0.0], payload("high", 4)).await.unwrap();

        match cache.lookup(&[1.0, 0.05]).await {
            CacheLookup::Hit { verdict, similarity } => {
                assert!(similarity >= 0.90);
                assert_eq!(verdict.risk_level, RiskLevel::High);
                assert_eq!(verdict.trust_score, 4);
                assert_eq!(verdict.ai_generated_score, Some(82));
            }
            other => panic!("expected hit, got {other:?}"),
        }

        // cos([1,0],[1,1]) ~ 0.707
        assert_eq!(cache.lookup(&[1.0, 1.0]).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_lookup_on_empty_cache_is_miss() {
        let cache = VerdictCache::new(Arc::new(InMemoryIndex::new()), 0.90);
        cache.prepare(2).await;
        assert_eq!(cache.lookup(&[1.0, 0.0]).await, CacheLookup::Miss);
    }

    #[tokio::test]
    async fn test_broken_backend_degrades() {
        let cache = VerdictCache::new(Arc::new(BrokenIndex), 0.90);
        assert!(!cache.prepare(2).await);
        assert_eq!(cache.lookup(&[1.0, 0.0]).await, CacheLookup::Unavailable);
        assert!(cache.store(vec![1.0, 0.0], payload("low", 90)).await.is_err());
    }

    #[tokio::test]
    async fn test_writes_are_append_only() {
        let index = Arc::new(InMemoryIndex::new());
        let cache = VerdictCache::new(index.clone(), 0.90);
        cache.prepare(2).await;
        let a = cache.store(vec![1.0, 0.0], payload("low", 90)).await.unwrap();
        let b = cache.store(vec![1.0, 0.0], payload("low", 91)).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(index.point_count().await.unwrap(), 2);
    }
}
