// Reasoning synthesis: turn ensemble sub-scores into a risk level, trust
// score, and a human-readable summary.
//
// The risk level always comes from the deterministic local bands below. An
// optional external reasoner (any OpenAI-compatible chat completions API)
// may write the summary and pick a trust score inside the band. Only numeric
// sub-scores and a short text excerpt are ever sent to it, never image bytes.
// Every reasoner problem (timeout, HTTP error, malformed JSON) falls back to
// the local assessment.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::metadata::MetadataReport;
use super::verdict::{probability_to_score, Provenance, RiskLevel, Signal, SubScores};

/// Hard bound on one reasoner call, including time spent queued on the lock.
pub const DEFAULT_REASONER_TIMEOUT: Duration = Duration::from_secs(25);

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_REASONER_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_REASONER_MODEL: &str = "gpt-4o-mini";

/// Max characters of post text forwarded to the reasoner.
const CONTEXT_CHARS: usize = 500;
const QUESTION_CHARS: usize = 280;

const HIGH_BAND: f64 = 0.7;
const MEDIUM_BAND: f64 = 0.35;
const CONFIDENCE_PENALTY: f64 = 0.15;

/// What the reasoner gets to see.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningInput {
    pub sub_scores: SubScores,
    pub is_fake: bool,
    pub metadata: MetadataReport,
    /// Post text and author, already flattened into one string
    pub context: String,
    pub question: Option<String>,
}

/// The reasoner's JSON answer. Unknown fields are ignored; every field is
/// optional so a partial answer can still be judged rather than rejected
/// at parse time.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReasonerReply {
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub trust_score: Option<f64>,
    #[serde(default)]
    pub reasoning_summary: Option<String>,
}

/// Result of reasoning synthesis, before it is folded into a Verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub risk_level: RiskLevel,
    pub trust_score: u8,
    pub summary: String,
    pub confidence: f64,
    pub provenance: Provenance,
}

/// An external reasoning service.
#[async_trait]
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &str;

    async fn assess(&self, input: &ReasoningInput) -> Result<ReasonerReply>;
}

// ============================================================
// Local deterministic assessment
// ============================================================

/// Map the dominant fake probability to a risk band and trust score.
pub fn local_band(dominant: f64, is_fake: bool) -> (RiskLevel, u8) {
    let dominant = dominant.clamp(0.0, 1.0);
    if dominant >= HIGH_BAND {
        let trust = (20.0 * (1.0 - dominant)).round();
        (RiskLevel::High, trust as u8)
    } else if dominant >= MEDIUM_BAND || is_fake {
        let trust = (100.0 * (1.0 - dominant)).round().clamp(30.0, 65.0);
        (RiskLevel::Medium, trust as u8)
    } else {
        let trust = (90.0 + (10.0 * (1.0 - dominant / MEDIUM_BAND)).round()).clamp(90.0, 100.0);
        (RiskLevel::Low, trust as u8)
    }
}

/// Distance of the dominant score from the undecided midpoint, minus a
/// penalty for each classifier that had to be substituted.
pub fn confidence(scores: &SubScores) -> f64 {
    let base = 0.5 + (scores.dominant() - 0.5).abs();
    let penalty = CONFIDENCE_PENALTY * scores.unknown_count() as f64;
    (base - penalty).clamp(0.0, 1.0)
}

pub fn local_assessment(input: &ReasoningInput) -> Assessment {
    let scores = &input.sub_scores;
    let (risk_level, trust_score) = local_band(scores.dominant(), input.is_fake);

    Assessment {
        risk_level,
        trust_score,
        summary: local_summary(risk_level, input),
        confidence: confidence(scores),
        provenance: Provenance::Fallback,
    }
}

fn local_summary(risk: RiskLevel, input: &ReasoningInput) -> String {
    let scores = &input.sub_scores;
    let headline = match risk {
        RiskLevel::High => "Strong signs of AI generation",
        RiskLevel::Medium => "Some signs of synthetic content",
        RiskLevel::Low => "No strong signs of AI generation",
    };

    let mut findings = Vec::new();
    if let Some(d) = scores.diffusion_probability.as_measured() {
        findings.push(format!("diffusion detector {}%", probability_to_score(d)));
    }
    match scores.gan_probability {
        Signal::Measured(g) => findings.push(format!("face deepfake check {}%", probability_to_score(g))),
        Signal::Skipped if scores.face_count == Some(0) => {
            findings.push("no faces found".to_string())
        }
        _ => {}
    }

    let mut summary = if findings.is_empty() {
        format!("{headline}.")
    } else {
        format!("{headline} ({}).", findings.join(", "))
    };

    if input.metadata.generator_hint {
        if let Some(software) = &input.metadata.software {
            summary.push_str(&format!(" Metadata names a generator: {software}."));
        }
    } else if input.metadata.present {
        summary.push_str(" Camera metadata is present.");
    } else {
        summary.push_str(" No camera metadata found.");
    }

    if scores.unknown_count() > 0 {
        summary.push_str(" Some detectors were unavailable.");
    }

    summary
}

// ============================================================
// Reconciling an external answer with the local bands
// ============================================================

/// Fold a reasoner reply into the local assessment.
///
/// The local risk band wins. The reasoner's trust score is clamped into that
/// band's range. Returns `None` when the reply carries no usable summary.
pub fn reconcile(local: &Assessment, reply: &ReasonerReply) -> Option<Assessment> {
    let summary = reply
        .reasoning_summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())?;

    if let Some(label) = &reply.risk_level {
        if RiskLevel::parse(label) != Some(local.risk_level) {
            debug!(
                reasoner = %label,
                local = %local.risk_level,
                "Discarding reasoner risk label"
            );
        }
    }

    let (lo, hi) = local.risk_level.trust_range();
    let trust_score = match reply.trust_score {
        Some(t) if t.is_finite() => t.round().clamp(lo as f64, hi as f64) as u8,
        _ => local.trust_score.clamp(lo, hi),
    };

    Some(Assessment {
        risk_level: local.risk_level,
        trust_score,
        summary: summary.to_string(),
        confidence: local.confidence,
        provenance: Provenance::Fresh,
    })
}

// ============================================================
// Synthesizer: serialized, time-boxed reasoner calls
// ============================================================

pub struct ReasoningSynthesizer {
    reasoner: Arc<dyn Reasoner>,
    lock: Mutex<()>,
    timeout: Duration,
}

impl ReasoningSynthesizer {
    pub fn new(reasoner: Arc<dyn Reasoner>, timeout: Duration) -> Self {
        Self {
            reasoner,
            lock: Mutex::new(()),
            timeout,
        }
    }

    /// Always yields an assessment; the external reasoner is best-effort.
    pub async fn synthesize(&self, input: &ReasoningInput) -> Assessment {
        let local = local_assessment(input);

        let call = async {
            let _guard = self.lock.lock().await;
            self.reasoner.assess(input).await
        };

        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => match reconcile(&local, &reply) {
                Some(assessment) => assessment,
                None => {
                    warn!(reasoner = self.reasoner.name(), "Reasoner reply had no summary, using local fallback");
                    local
                }
            },
            Ok(Err(e)) => {
                warn!(reasoner = self.reasoner.name(), error = %e, "Reasoner failed, using local fallback");
                local
            }
            Err(_) => {
                warn!(
                    reasoner = self.reasoner.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Reasoner timed out, using local fallback"
                );
                local
            }
        }
    }
}

// ============================================================
// Reasoner implementations
// ============================================================

/// Used when no reasoner API key is configured.
pub struct DisabledReasoner;

#[async_trait]
impl Reasoner for DisabledReasoner {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn assess(&self, _input: &ReasoningInput) -> Result<ReasonerReply> {
        anyhow::bail!("No reasoner configured (set REASONER_API_KEY)")
    }
}

const SYSTEM_PROMPT: &str = "You are an image forensics analyst. You receive detector scores \
for one image and a short excerpt of the post it appeared in. Respond with a JSON object \
with exactly these keys: \"risk_level\" (\"low\", \"medium\" or \"high\"), \"trust_score\" \
(integer 0-100, higher means more trustworthy), and \"reasoning_summary\" (one or two plain \
sentences, under 200 characters, for a general audience). Base the verdict on the scores; \
use the post text only for context. If a user question is given, answer it in the summary.";

/// Build the user message sent to the reasoner.
pub fn build_prompt(input: &ReasoningInput) -> String {
    let scores = &input.sub_scores;
    let payload = serde_json::json!({
        "diffusion_probability": scores.diffusion_probability,
        "gan_face_probability": scores.gan_probability,
        "face_count": scores.face_count,
        "exif_present": scores.exif_present,
        "metadata_software": input.metadata.software,
        "ensemble_is_fake": input.is_fake,
        "post_context": crate::reply::truncate_chars(&input.context, CONTEXT_CHARS),
        "user_question": input
            .question
            .as_deref()
            .map(|q| crate::reply::truncate_chars(q, QUESTION_CHARS)),
    });
    format!("Detector results:\n{payload}")
}

pub struct OpenAiReasoner {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiReasoner {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    fn name(&self) -> &str {
        &self.model
    }

    async fn assess(&self, input: &ReasoningInput) -> Result<ReasonerReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(input),
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            temperature: 0.2,
        };

        debug!(model = %self.model, "Reasoner request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to call reasoner API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Reasoner API returned {}: {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse reasoner response")?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Reasoner returned no content"))?;

        parse_reply(&content)
    }
}

/// Parse the model's message content, tolerating a fenced code block.
fn parse_reply(content: &str) -> Result<ReasonerReply> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(json.trim()).context("Reasoner reply was not valid JSON")
}

// --- Chat completions wire types ---

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
