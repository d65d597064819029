// Verdict and sub-score types: the pipeline's closed output schema.
//
// Every analysis ends in exactly one Verdict. Constructors clamp trust and
// confidence into range so no caller can build an out-of-bounds verdict.

use serde::{Deserialize, Serialize};

/// Risk level attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    /// Parse a risk label, case-insensitively. Unknown labels yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" | "moderate" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }

    /// Trust scores an external reasoner may assign within this band.
    pub fn trust_range(&self) -> (u8, u8) {
        match self {
            RiskLevel::High => (0, 35),
            RiskLevel::Medium => (30, 69),
            RiskLevel::Low => (70, 100),
        }
    }

    /// Suggested next step for a reader of this verdict.
    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskLevel::High => "Treat as likely AI-generated or manipulated. Do not share without independent verification.",
            RiskLevel::Medium => "Some signs of synthetic content. Verify the source before sharing.",
            RiskLevel::Low => "No strong signs of AI generation were found.",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single classifier.
///
/// `Unknown` (the classifier failed) is deliberately distinct from a
/// measured zero: it contributes the neutral mid-value to the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Signal {
    Measured(f64),
    Unknown,
    /// Not run because its precondition failed (e.g. GAN check on a faceless image).
    Skipped,
}

impl Signal {
    /// Value substituted for a classifier that failed.
    pub const NEUTRAL: f64 = 0.5;

    pub fn measured(p: f64) -> Self {
        Signal::Measured(p.clamp(0.0, 1.0))
    }

    /// The probability this signal contributes to the ensemble.
    pub fn value(&self) -> f64 {
        match self {
            Signal::Measured(p) => *p,
            Signal::Unknown => Self::NEUTRAL,
            Signal::Skipped => 0.0,
        }
    }

    pub fn as_measured(&self) -> Option<f64> {
        match self {
            Signal::Measured(p) => Some(*p),
            _ => None,
        }
    }
}

/// Individual detector outputs behind a fresh verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub diffusion_probability: Signal,
    pub gan_probability: Signal,
    /// `None` when the face detector failed.
    pub face_count: Option<u32>,
    /// `None` when metadata extraction wasn't attempted.
    pub exif_present: Option<bool>,
}

impl SubScores {
    /// The strongest fake signal. The local risk bands key on this.
    pub fn dominant(&self) -> f64 {
        self.diffusion_probability
            .value()
            .max(self.gan_probability.value())
    }

    /// The strongest score a classifier actually produced. `None` when every
    /// classifier failed or was skipped.
    pub fn measured_max(&self) -> Option<f64> {
        [self.diffusion_probability, self.gan_probability]
            .iter()
            .filter_map(Signal::as_measured)
            .reduce(f64::max)
    }

    /// Number of detectors that failed: classifiers that fell back to the
    /// neutral value, plus the face detector.
    pub fn unknown_count(&self) -> usize {
        let classifiers = [self.diffusion_probability, self.gan_probability]
            .iter()
            .filter(|s| matches!(s, Signal::Unknown))
            .count();
        classifiers + usize::from(self.face_count.is_none())
    }
}

/// Where a verdict's reasoning came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Copied from a near-identical cached image
    Cache,
    /// External reasoner produced the summary
    Fresh,
    /// Deterministic local bands produced the summary
    Fallback,
}

/// The pipeline's terminal output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub risk_level: RiskLevel,
    /// 0 (no trust) to 100 (fully trusted)
    pub trust_score: u8,
    pub reasoning_summary: String,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub is_fake: bool,
    /// Fake probability as a 0-100 score; `None` when no media was analyzed.
    pub ai_generated_score: Option<u8>,
    /// Present only for fresh analyses.
    pub sub_scores: Option<SubScores>,
    pub provenance: Provenance,
}

impl Verdict {
    /// Build a verdict, clamping trust and confidence into range.
    pub fn new(
        risk_level: RiskLevel,
        trust_score: f64,
        reasoning_summary: impl Into<String>,
        confidence: f64,
        provenance: Provenance,
    ) -> Self {
        Self {
            risk_level,
            trust_score: clamp_trust(trust_score),
            reasoning_summary: reasoning_summary.into(),
            confidence: clamp_confidence(confidence),
            is_fake: false,
            ai_generated_score: None,
            sub_scores: None,
            provenance,
        }
    }

    /// The fixed neutral verdict for requests without media.
    pub fn no_media() -> Self {
        Verdict::new(
            RiskLevel::Low,
            100.0,
            "No media provided",
            1.0,
            Provenance::Fallback,
        )
    }

    /// Rebuild a verdict from a cache hit's stored payload.
    ///
    /// Returns `None` if the stored risk label is unrecognized, in which
    /// case the caller treats the hit as a miss.
    pub fn from_cache(payload: &CachePayload) -> Option<Self> {
        let risk_level = RiskLevel::parse(&payload.risk_level)?;
        let mut verdict = Verdict::new(
            risk_level,
            payload.trust_score as f64,
            payload.reasoning.clone(),
            payload.confidence,
            Provenance::Cache,
        );
        verdict.is_fake = payload.is_fake;
        verdict.ai_generated_score = Some(probability_to_score(payload.fake_probability));
        Some(verdict)
    }

    /// Fake probability the verdict was based on, if known.
    pub fn fake_probability(&self) -> Option<f64> {
        match &self.sub_scores {
            Some(scores) => Some(scores.dominant()),
            None => self.ai_generated_score.map(|s| s as f64 / 100.0),
        }
    }

    /// Project this verdict into the payload stored alongside its embedding.
    pub fn to_payload(&self, image_digest: &str) -> CachePayload {
        CachePayload {
            is_fake: self.is_fake,
            fake_probability: self.fake_probability().unwrap_or(0.0),
            risk_level: self.risk_level.as_str().to_string(),
            trust_score: self.trust_score as i64,
            reasoning: self.reasoning_summary.clone(),
            confidence: self.confidence,
            image_digest: image_digest.to_string(),
            cached_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// What the similarity index stores next to each embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePayload {
    pub is_fake: bool,
    pub fake_probability: f64,
    pub risk_level: String,
    pub trust_score: i64,
    pub reasoning: String,
    pub confidence: f64,
    /// SHA-256 of the analyzed image bytes (hex)
    pub image_digest: String,
    pub cached_at: String,
}

/// Convert a 0-1 probability into a 0-100 integer score.
pub fn probability_to_score(p: f64) -> u8 {
    (p.clamp(0.0, 1.0) * 100.0).round() as u8
}

fn clamp_trust(trust: f64) -> u8 {
    if trust.is_nan() {
        return 0;
    }
    trust.round().clamp(0.0, 100.0) as u8
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return 0.0;
    }
    confidence.clamp(0.0, 1.0)
}
