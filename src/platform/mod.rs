// Social platform access: mentions, posts with attachments, replies.
//
// The SocialPlatform trait is the seam the poller and resolver depend on.
// XApiClient implements it over the X API v2; tests substitute in-memory
// platforms.

pub mod client;
pub mod traits;
pub mod types;

pub use client::XApiClient;
pub use traits::SocialPlatform;
pub use types::{Account, MediaAttachment, MediaKind, Post, PostId, PostReference};
