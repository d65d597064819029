// Capability traits for the analysis pipeline.
//
// Each detector is an opaque "image bytes in, number out" capability. The
// default implementations run local ONNX models (see onnx.rs and
// embedding.rs); tests and degraded deployments swap in other impls without
// touching the pipeline.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

/// A binary real-vs-generated image classifier.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Probability (0.0 to 1.0) that the image is synthetic.
    async fn fake_probability(&self, image: Arc<[u8]>) -> Result<f64>;
}

/// Counts human faces in an image. Gates the GAN/deepfake-face classifier.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn count_faces(&self, image: Arc<[u8]>) -> Result<u32>;
}

/// Maps image bytes to a fixed-dimension visual embedding.
///
/// Must be deterministic for identical bytes; the verdict cache depends on it.
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, image: Arc<[u8]>) -> Result<Vec<f32>>;
}

/// Downloads the image under analysis.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Stand-in for a model whose files aren't installed.
/// Every call fails, so the pipeline applies its per-stage fallback.
pub struct UnavailableModel {
    name: String,
}

impl UnavailableModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ImageClassifier for UnavailableModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fake_probability(&self, _image: Arc<[u8]>) -> Result<f64> {
        anyhow::bail!("{} model is not installed; run `sentinel download-model`", self.name)
    }
}

#[async_trait]
impl FaceDetector for UnavailableModel {
    async fn count_faces(&self, _image: Arc<[u8]>) -> Result<u32> {
        anyhow::bail!("{} model is not installed; run `sentinel download-model`", self.name)
    }
}

#[async_trait]
impl ImageEmbedder for UnavailableModel {
    fn dimension(&self) -> usize {
        super::embedding::EMBEDDING_DIM
    }

    async fn embed(&self, _image: Arc<[u8]>) -> Result<Vec<f32>> {
        anyhow::bail!("{} model is not installed; run `sentinel download-model`", self.name)
    }
}
