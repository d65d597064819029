// Request and response shapes for one analysis, shared by the poller, the
// `analyze` CLI command, and the HTTP API.

use serde::{Deserialize, Serialize};

use super::verdict::{Provenance, RiskLevel, SubScores, Verdict};

/// Input to the trust pipeline. Unknown JSON fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Further candidate media, in platform order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_display_name: Option<String>,
    /// What the asker wants to know about the post
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl AnalysisRequest {
    pub fn for_image(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.post_text = Some(text.into());
        self
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    /// The asker's question, if any non-blank one was given.
    pub fn question(&self) -> Option<&str> {
        self.question.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    /// The image to analyze: `image_url` if set, else the first media URL.
    /// Blank strings don't count.
    pub fn primary_url(&self) -> Option<&str> {
        self.image_url
            .iter()
            .chain(self.media_urls.iter())
            .map(|u| u.trim())
            .find(|u| !u.is_empty())
    }

    /// Flatten author and post text into the short context line given to
    /// the reasoner.
    pub fn context_text(&self) -> String {
        let author = match (&self.profile_username, &self.profile_display_name) {
            (Some(user), Some(name)) if !name.is_empty() => format!("{name} (@{user})"),
            (Some(user), _) => format!("@{user}"),
            (None, Some(name)) => name.clone(),
            (None, None) => String::new(),
        };
        let text = self.post_text.as_deref().unwrap_or("").trim();

        match (author.is_empty(), text.is_empty()) {
            (true, true) => String::new(),
            (true, false) => text.to_string(),
            (false, true) => author,
            (false, false) => format!("{author}: {text}"),
        }
    }
}

/// JSON body returned by `POST /analyze` and `sentinel analyze --json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub risk_level: RiskLevel,
    pub trust_score: u8,
    pub reasoning_summary: String,
    pub confidence: f64,
    pub recommendation: String,
    pub ai_generated_score: Option<u8>,
    pub is_fake: bool,
    pub breakdown: Option<SubScores>,
    pub provenance: Provenance,
    pub input: AnalysisRequest,
}

impl AnalyzeResponse {
    pub fn new(verdict: Verdict, input: AnalysisRequest) -> Self {
        Self {
            recommendation: verdict.risk_level.recommendation().to_string(),
            risk_level: verdict.risk_level,
            trust_score: verdict.trust_score,
            reasoning_summary: verdict.reasoning_summary,
            confidence: verdict.confidence,
            ai_generated_score: verdict.ai_generated_score,
            is_fake: verdict.is_fake,
            breakdown: verdict.sub_scores,
            provenance: verdict.provenance,
            input,
        }
    }
}
