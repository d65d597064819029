// Qdrant-backed similarity index for the verdict cache.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    CountPointsBuilder, CreateCollectionBuilder, Distance, PointStruct, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use tracing::info;

use super::cache::{IndexError, SearchHit, VectorIndex};
use super::verdict::CachePayload;

pub struct QdrantIndex {
    client: Qdrant,
    url: String,
    collection: String,
}

impl QdrantIndex {
    pub fn connect(url: &str, collection: &str) -> Result<Self, IndexError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| IndexError::ConnectionFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
            collection: collection.to_string(),
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn describe(&self) -> String {
        format!("qdrant {} ({})", self.url, self.collection)
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<(), IndexError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| IndexError::ConnectionFailed {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        if exists {
            return Ok(());
        }

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| IndexError::CreateCollectionFailed {
                collection: self.collection.clone(),
                message: e.to_string(),
            })?;

        info!(collection = %self.collection, dimension, "Created Qdrant collection");
        Ok(())
    }

    async fn upsert(&self, id: u64, vector: Vec<f32>, payload: CachePayload) -> Result<(), IndexError> {
        let point = PointStruct::new(id, vector, payload_to_qdrant(&payload));

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(|e| IndexError::UpsertFailed {
                collection: self.collection.clone(),
                message: e.to_string(),
            })?;

        Ok(())
    }

    async fn search(&self, vector: Vec<f32>, top_k: u64) -> Result<Vec<SearchHit>, IndexError> {
        let response = self
            .client
            .search_points(SearchPointsBuilder::new(&self.collection, vector, top_k).with_payload(true))
            .await
            .map_err(|e| IndexError::SearchFailed {
                collection: self.collection.clone(),
                message: e.to_string(),
            })?;

        Ok(response
            .result
            .into_iter()
            .filter_map(hit_from_scored_point)
            .collect())
    }

    async fn point_count(&self) -> Result<u64, IndexError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await
            .map_err(|e| IndexError::CountFailed {
                collection: self.collection.clone(),
                message: e.to_string(),
            })?;

        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

fn payload_to_qdrant(payload: &CachePayload) -> HashMap<String, Value> {
    let mut map: HashMap<String, Value> = HashMap::new();
    map.insert("is_fake".to_string(), payload.is_fake.into());
    map.insert("fake_probability".to_string(), payload.fake_probability.into());
    map.insert("risk_level".to_string(), payload.risk_level.clone().into());
    map.insert("trust_score".to_string(), payload.trust_score.into());
    map.insert("reasoning".to_string(), payload.reasoning.clone().into());
    map.insert("confidence".to_string(), payload.confidence.into());
    map.insert("image_digest".to_string(), payload.image_digest.clone().into());
    map.insert("cached_at".to_string(), payload.cached_at.clone().into());
    map
}

/// Points without a numeric id or a risk label are skipped.
fn hit_from_scored_point(point: ScoredPoint) -> Option<SearchHit> {
    let id = match point.id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Num(n)) => n,
        _ => return None,
    };

    let payload = payload_from_qdrant(&point.payload)?;
    Some(SearchHit {
        id,
        score: point.score,
        payload,
    })
}

fn payload_from_qdrant(map: &HashMap<String, Value>) -> Option<CachePayload> {
    let text = |key: &str| {
        map.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_default()
    };
    let number = |key: &str| {
        map.get(key)
            .and_then(|v| v.as_double().or_else(|| v.as_integer().map(|i| i as f64)))
    };

    let risk_level = map.get("risk_level").and_then(|v| v.as_str())?.to_string();

    Some(CachePayload {
        is_fake: map.get("is_fake").and_then(|v| v.as_bool()).unwrap_or(false),
        fake_probability: number("fake_probability").unwrap_or(0.0),
        risk_level,
        trust_score: number("trust_score").map(|t| t.round() as i64).unwrap_or(0),
        reasoning: text("reasoning"),
        confidence: number("confidence").unwrap_or(0.0),
        image_digest: text("image_digest"),
        cached_at: text("cached_at"),
    })
}
