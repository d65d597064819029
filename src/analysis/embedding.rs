// Visual embeddings for the verdict cache, using the CLIP ViT-B/32 vision tower.
//
// Near-duplicate images (re-encodes, crops, light edits) land close together
// in CLIP space, so a cosine lookup finds prior verdicts for reposted media.
// Output vectors are L2-normalized, which makes cosine similarity a dot product.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::preprocess::{prepare_image, Normalization};
use super::traits::ImageEmbedder;

/// Embedding dimension of the CLIP ViT-B/32 image projection.
pub const EMBEDDING_DIM: usize = 512;

/// Model file name under the model directory.
pub const CLIP_MODEL_FILE: &str = "clip_vision.onnx";

const CLIP_INPUT_SIZE: u32 = 224;

pub struct ClipImageEmbedder {
    session: Arc<Mutex<Session>>,
}

impl ClipImageEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join(CLIP_MODEL_FILE);
        if !model_path.exists() {
            anyhow::bail!(
                "Embedding model not found: {}\nRun `sentinel download-model` to download it.",
                model_path.display()
            );
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| {
                format!(
                    "Failed to load embedding model from {}",
                    model_path.display()
                )
            })?;

        debug!("Loaded CLIP vision model from {}", model_dir.display());

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }
}

#[async_trait]
impl ImageEmbedder for ClipImageEmbedder {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed(&self, image: Arc<[u8]>) -> Result<Vec<f32>> {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || embed_sync(&session, &image))
            .await
            .context("spawn_blocking panicked")?
    }
}

fn embed_sync(session: &Arc<Mutex<Session>>, image: &[u8]) -> Result<Vec<f32>> {
    let prepared = prepare_image(image, CLIP_INPUT_SIZE, CLIP_INPUT_SIZE, Normalization::CLIP)?;
    let input = Tensor::from_array((prepared.shape, prepared.data))
        .context("Failed to create pixel tensor")?;

    let raw = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;
        let outputs = session
            .run(ort::inputs! { "pixel_values" => input })
            .context("Embedding ONNX inference failed")?;

        // image_embeds: [1, 512], the projected (pre-normalization) embedding
        let (_shape, data) = outputs["image_embeds"]
            .try_extract_tensor::<f32>()
            .context("Failed to extract image_embeds")?;
        data.to_vec()
    };

    if raw.len() != EMBEDDING_DIM {
        anyhow::bail!(
            "Embedding model returned {} values, expected {}",
            raw.len(),
            EMBEDDING_DIM
        );
    }

    debug!(dim = EMBEDDING_DIM, "Computed image embedding");
    Ok(l2_normalize(raw))
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut mag_a = 0.0_f64;
    let mut mag_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b) {
        dot += x as f64 * y as f64;
        mag_a += x as f64 * x as f64;
        mag_b += y as f64 * y as f64;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
