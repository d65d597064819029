// Multi-detector ensemble.
//
// Runs metadata extraction, the diffusion classifier, and the face detector
// concurrently. The GAN face classifier only runs when at least one face was
// found. A failing detector never fails the ensemble: classifiers degrade to
// Signal::Unknown and the face count to None.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::metadata::{extract_metadata, MetadataReport};
use super::traits::{FaceDetector, ImageClassifier};
use super::verdict::{Signal, SubScores};

/// Decision thresholds for `is_fake`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleThresholds {
    pub diffusion: f64,
    pub gan: f64,
    /// Applied to the mean of the two classifier values
    pub mean: f64,
}

impl Default for EnsembleThresholds {
    fn default() -> Self {
        Self {
            diffusion: 0.3,
            gan: 0.3,
            mean: 0.25,
        }
    }
}

impl EnsembleThresholds {
    /// Strict comparisons: a score exactly at a threshold is not fake.
    pub fn is_fake(&self, scores: &SubScores) -> bool {
        let d = scores.diffusion_probability.value();
        let g = scores.gan_probability.value();
        d > self.diffusion || g > self.gan || (d + g) / 2.0 > self.mean
    }
}

/// Everything the ensemble learned about one image.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleOutcome {
    pub sub_scores: SubScores,
    pub is_fake: bool,
    pub metadata: MetadataReport,
}

pub struct Ensemble {
    diffusion: Arc<dyn ImageClassifier>,
    gan_face: Arc<dyn ImageClassifier>,
    faces: Arc<dyn FaceDetector>,
    permits: Arc<Semaphore>,
    thresholds: EnsembleThresholds,
}

impl Ensemble {
    /// `inference_workers` bounds how many model calls run at once across
    /// every request sharing this ensemble.
    pub fn new(
        diffusion: Arc<dyn ImageClassifier>,
        gan_face: Arc<dyn ImageClassifier>,
        faces: Arc<dyn FaceDetector>,
        inference_workers: usize,
        thresholds: EnsembleThresholds,
    ) -> Self {
        Self {
            diffusion,
            gan_face,
            faces,
            permits: Arc::new(Semaphore::new(inference_workers.max(1))),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &EnsembleThresholds {
        &self.thresholds
    }

    pub async fn run(&self, image: Arc<[u8]>) -> EnsembleOutcome {
        let (metadata, diffusion, face_count) = tokio::join!(
            self.read_metadata(Arc::clone(&image)),
            self.classify(self.diffusion.as_ref(), Arc::clone(&image)),
            self.count_faces(Arc::clone(&image)),
        );

        let gan = match face_count {
            Some(n) if n > 0 => self.classify(self.gan_face.as_ref(), image).await,
            _ => Signal::Skipped,
        };

        let sub_scores = SubScores {
            diffusion_probability: diffusion,
            gan_probability: gan,
            face_count,
            exif_present: Some(metadata.present),
        };
        let is_fake = self.thresholds.is_fake(&sub_scores);

        debug!(
            diffusion = ?sub_scores.diffusion_probability,
            gan = ?sub_scores.gan_probability,
            faces = ?sub_scores.face_count,
            exif = metadata.present,
            is_fake,
            "Ensemble finished"
        );

        EnsembleOutcome {
            sub_scores,
            is_fake,
            metadata,
        }
    }

    async fn classify(&self, classifier: &dyn ImageClassifier, image: Arc<[u8]>) -> Signal {
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(model = classifier.name(), "Inference semaphore closed");
                return Signal::Unknown;
            }
        };

        match classifier.fake_probability(image).await {
            Ok(p) => Signal::measured(p),
            Err(e) => {
                warn!(model = classifier.name(), error = %e, "Classifier failed, using neutral score");
                Signal::Unknown
            }
        }
    }

    async fn count_faces(&self, image: Arc<[u8]>) -> Option<u32> {
        let _permit = self.permits.acquire().await.ok()?;
        match self.faces.count_faces(image).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "Face detector failed, skipping GAN check");
                None
            }
        }
    }

    async fn read_metadata(&self, image: Arc<[u8]>) -> MetadataReport {
        match tokio::task::spawn_blocking(move || extract_metadata(&image)).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Metadata extraction panicked");
                MetadataReport::default()
            }
        }
    }
}
