// Media/context resolution: decide what a mention is asking about.
//
// A mention that replies to another post is asking about that parent: its
// text, author, and media become the subject, and the mention's own text
// (minus the bot handle) becomes the question. Otherwise the mention itself
// is the subject. Parent lookup failures are logged and never fatal.

use regex_lite::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::analysis::AnalysisRequest;
use crate::platform::{Post, PostId, SocialPlatform};

/// Question used when the mention contains nothing but the bot handle.
pub const DEFAULT_QUESTION: &str = "What is the analysis of this post?";

/// Everything the pipeline and reply composer need about one mention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisContext {
    /// The post being judged (the parent, or the mention itself)
    pub subject_post_id: PostId,
    pub subject_text: String,
    pub author_username: String,
    pub author_display_name: String,
    pub question: String,
    /// Candidate image URLs in platform order; the first is the primary image
    pub media_urls: Vec<String>,
}

impl AnalysisContext {
    pub fn primary_media(&self) -> Option<&str> {
        self.media_urls.first().map(String::as_str)
    }

    pub fn to_request(&self) -> AnalysisRequest {
        AnalysisRequest {
            image_url: self.media_urls.first().cloned(),
            media_urls: self.media_urls.clone(),
            post_text: Some(self.subject_text.clone()),
            profile_username: Some(self.author_username.clone()),
            profile_display_name: Some(self.author_display_name.clone()),
            question: Some(self.question.clone()),
        }
    }
}

/// Resolve a mention into an analysis context.
pub async fn resolve_context(
    platform: &dyn SocialPlatform,
    mention: &Post,
    bot_username: &str,
) -> AnalysisContext {
    let question = clean_question(&mention.text, bot_username);

    let parent = match mention.replied_to() {
        Some(parent_id) => match platform.get_post(parent_id).await {
            Ok(Some(post)) => Some(post),
            Ok(None) => {
                warn!(mention_id = %mention.id, parent_id = %parent_id, "Parent post not found, using mention");
                None
            }
            Err(e) => {
                warn!(mention_id = %mention.id, parent_id = %parent_id, error = %e, "Parent fetch failed, using mention");
                None
            }
        },
        None => None,
    };

    let subject = parent.as_ref().unwrap_or(mention);
    let mut media_urls = subject.media_urls();

    // The user may have attached the image to the mention itself.
    if media_urls.is_empty() && parent.is_some() {
        media_urls = mention.media_urls();
        if !media_urls.is_empty() {
            debug!(mention_id = %mention.id, "Parent has no media, using the mention's attachments");
        }
    }

    AnalysisContext {
        subject_post_id: subject.id,
        subject_text: subject.text.clone(),
        author_username: subject.author.username.clone(),
        author_display_name: subject.author.name.clone(),
        question,
        media_urls,
    }
}

/// Strip every `@bot` handle (case-insensitive, whole handle only) and
/// collapse whitespace. Empty results become the default question.
pub fn clean_question(text: &str, bot_username: &str) -> String {
    let handle = bot_username.trim_start_matches('@');
    let stripped = if handle.is_empty() {
        text.to_string()
    } else {
        match Regex::new(&format!(r"(?i)@{}\b", regex_lite::escape(handle))) {
            Ok(re) => re.replace_all(text, " ").into_owned(),
            Err(_) => text.to_string(),
        }
    };

    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        DEFAULT_QUESTION.to_string()
    } else {
        collapsed
    }
}
