// Social platform trait, the seam between Sentinel and the X API.

use anyhow::Result;
use async_trait::async_trait;

use super::types::{Account, Post, PostId};

/// The platform operations Sentinel needs. Implementations must be async
/// because every real provider is an HTTP API.
#[async_trait]
pub trait SocialPlatform: Send + Sync {
    /// Resolve the authenticated account. Failure here is fatal for the poller.
    async fn me(&self) -> Result<Account>;

    /// Mentions of `user_id` newer than `since`, at most `limit` of them.
    /// Order is whatever the platform returns; callers sort.
    async fn mentions_since(
        &self,
        user_id: &str,
        since: Option<PostId>,
        limit: u32,
    ) -> Result<Vec<Post>>;

    /// Fetch a single post with its author and attachments.
    async fn get_post(&self, id: PostId) -> Result<Option<Post>>;

    /// Reply to a post. Returns the new post's id.
    async fn post_reply(&self, in_reply_to: PostId, text: &str) -> Result<PostId>;
}
