// Local ONNX detectors: the two fake-image classifiers and the face detector.
//
// Each model is loaded once at startup. Sessions sit behind Arc<Mutex> because
// ort::Session::run takes &mut self and inference runs on spawn_blocking
// threads, which require 'static handles.
//
// Classifiers are Hugging Face image-classification models exported with a
// single `pixel_values` input and a `logits` output. The face detector is
// UltraFace (version-RFB-320), which emits per-anchor scores and boxes.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::preprocess::{prepare_image, Normalization};
use super::traits::{FaceDetector, ImageClassifier};

/// How to feed and read one exported classifier.
#[derive(Debug, Clone)]
pub struct ClassifierSpec {
    /// Log name
    pub name: &'static str,
    /// File name under the model directory
    pub file: &'static str,
    pub input_name: &'static str,
    pub input_size: u32,
    pub normalization: Normalization,
    /// Which logit is the "generated" class
    pub fake_index: usize,
}

impl ClassifierSpec {
    /// General diffusion/GAN detector (labels: artificial, human).
    pub const DIFFUSION: ClassifierSpec = ClassifierSpec {
        name: "diffusion",
        file: "diffusion_detector.onnx",
        input_name: "pixel_values",
        input_size: 224,
        normalization: Normalization::IMAGENET,
        fake_index: 0,
    };

    /// Face-swap / GAN face detector (labels: real, fake).
    pub const GAN_FACE: ClassifierSpec = ClassifierSpec {
        name: "gan_face",
        file: "gan_face_detector.onnx",
        input_name: "pixel_values",
        input_size: 224,
        normalization: Normalization::IMAGENET,
        fake_index: 1,
    };
}

/// UltraFace model file name.
pub const FACE_MODEL_FILE: &str = "version-RFB-320.onnx";

const FACE_INPUT_WIDTH: u32 = 320;
const FACE_INPUT_HEIGHT: u32 = 240;
const FACE_SCORE_THRESHOLD: f32 = 0.7;
const FACE_IOU_THRESHOLD: f32 = 0.3;

fn load_session(model_dir: &Path, file: &str) -> Result<Session> {
    let model_path = model_dir.join(file);
    if !model_path.exists() {
        anyhow::bail!(
            "Model file not found: {}\nRun `sentinel download-model` for instructions.",
            model_path.display()
        );
    }

    Session::builder()
        .context("Failed to create ONNX session builder")?
        .commit_from_file(&model_path)
        .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))
}

pub struct OnnxImageClassifier {
    session: Arc<Mutex<Session>>,
    spec: ClassifierSpec,
}

impl OnnxImageClassifier {
    pub fn load(model_dir: &Path, spec: ClassifierSpec) -> Result<Self> {
        let session = load_session(model_dir, spec.file)?;
        debug!(model = spec.name, "Loaded ONNX classifier from {}", model_dir.display());
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            spec,
        })
    }
}

#[async_trait]
impl ImageClassifier for OnnxImageClassifier {
    fn name(&self) -> &str {
        self.spec.name
    }

    async fn fake_probability(&self, image: Arc<[u8]>) -> Result<f64> {
        let session = Arc::clone(&self.session);
        let spec = self.spec.clone();

        tokio::task::spawn_blocking(move || {
            let prepared = prepare_image(
                &image,
                spec.input_size,
                spec.input_size,
                spec.normalization,
            )?;
            let input = Tensor::from_array((prepared.shape, prepared.data))
                .context("Failed to create pixel tensor")?;

            let logits = {
                let mut session = session
                    .lock()
                    .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;
                let outputs = session
                    .run(ort::inputs! { spec.input_name => input })
                    .context("ONNX inference failed")?;
                let (_shape, data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .context("Failed to extract logits")?;
                data.to_vec()
            };

            let p = fake_probability_from_logits(&logits, spec.fake_index)?;
            debug!(model = spec.name, fake_probability = p, "Classifier scored image");
            Ok(p)
        })
        .await
        .context("spawn_blocking panicked")?
    }
}

/// Convert raw classifier logits to the probability of the fake class.
///
/// A single logit is treated as a binary sigmoid head; otherwise softmax.
fn fake_probability_from_logits(logits: &[f32], fake_index: usize) -> Result<f64> {
    match logits.len() {
        0 => anyhow::bail!("Classifier returned no logits"),
        1 => Ok(sigmoid(logits[0] as f64)),
        n if fake_index >= n => {
            anyhow::bail!("Classifier returned {n} logits, expected index {fake_index}")
        }
        _ => Ok(softmax(logits)[fake_index]),
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

pub struct OnnxFaceDetector {
    session: Arc<Mutex<Session>>,
}

impl OnnxFaceDetector {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let session = load_session(model_dir, FACE_MODEL_FILE)?;
        debug!("Loaded face detector from {}", model_dir.display());
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }
}

#[async_trait]
impl FaceDetector for OnnxFaceDetector {
    async fn count_faces(&self, image: Arc<[u8]>) -> Result<u32> {
        let session = Arc::clone(&self.session);

        tokio::task::spawn_blocking(move || {
            let prepared = prepare_image(
                &image,
                FACE_INPUT_WIDTH,
                FACE_INPUT_HEIGHT,
                Normalization::ULTRAFACE,
            )?;
            let input = Tensor::from_array((prepared.shape, prepared.data))
                .context("Failed to create face input tensor")?;

            let (scores, boxes) = {
                let mut session = session
                    .lock()
                    .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;
                let outputs = session
                    .run(ort::inputs! { "input" => input })
                    .context("Face detector inference failed")?;

                // scores: [1, N, 2] (background, face); boxes: [1, N, 4] normalized corners
                let (_, scores) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .context("Failed to extract face scores")?;
                let (_, boxes) = outputs[1]
                    .try_extract_tensor::<f32>()
                    .context("Failed to extract face boxes")?;
                (scores.to_vec(), boxes.to_vec())
            };

            let candidates = face_candidates(&scores, &boxes, FACE_SCORE_THRESHOLD);
            let faces = non_max_suppression(candidates, FACE_IOU_THRESHOLD).len() as u32;
            debug!(faces, "Face detector finished");
            Ok(faces)
        })
        .await
        .context("spawn_blocking panicked")?
    }
}

/// A scored detection box with normalized corner coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub score: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Detection) -> f32 {
        let w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = w * h;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// Pair UltraFace's flat score and box outputs, keeping anchors above `threshold`.
fn face_candidates(scores: &[f32], boxes: &[f32], threshold: f32) -> Vec<Detection> {
    scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(s, _)| s[1] > threshold)
        .map(|(s, b)| Detection {
            score: s[1],
            x1: b[0],
            y1: b[1],
            x2: b[2],
            y2: b[3],
        })
        .collect()
}

/// Greedy NMS: keep the highest-scoring box, drop everything overlapping it
/// by more than `iou_threshold`, repeat.
pub fn non_max_suppression(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}
