use thiserror::Error;

/// Errors that end an analysis request without a verdict.
///
/// Everything else (classifiers, cache, reasoner) degrades to a fallback
/// value, so the only terminal failure is not having an image to look at.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The image could not be downloaded.
    #[error("failed to fetch image '{url}': {message}")]
    Fetch {
        /// Image URL.
        url: String,
        /// Error message.
        message: String,
    },
}
