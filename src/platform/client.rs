// X API v2 client: a thin reqwest wrapper with typed wire structs.
//
// Authenticates with an OAuth 2.0 user-context access token so the same
// credential can read mentions and post replies. Every response is converted
// into the platform-neutral types in types.rs before leaving this module.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::SocialPlatform;
use super::types::{Account, MediaAttachment, MediaKind, Post, PostId, PostReference};

/// Default X API endpoint.
pub const DEFAULT_X_API_URL: &str = "https://api.x.com";

/// The mentions endpoint rejects max_results outside this range.
const MIN_MENTION_PAGE: u32 = 5;
const MAX_MENTION_PAGE: u32 = 100;

/// Expansions and fields requested for every post lookup so attachments
/// and authors come back in a single round trip.
const POST_QUERY: [(&str, &str); 4] = [
    (
        "expansions",
        "author_id,attachments.media_keys,referenced_tweets.id",
    ),
    ("tweet.fields", "text,author_id,attachments,referenced_tweets"),
    ("user.fields", "name,username"),
    ("media.fields", "type,url,preview_image_url"),
];

/// Authenticated HTTP client for the X API v2.
pub struct XApiClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl XApiClient {
    /// Create a client for `base_url` using a user-context access token.
    pub fn new(base_url: &str, access_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("sentinel/0.1 (media-authenticity-bot)")
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// GET an API path and deserialize the JSON response.
    async fn get_json<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);

        debug!(path = path, "X API GET request");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(params)
            .send()
            .await
            .with_context(|| format!("X API request failed: {path}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("X API {path} returned {status}: {body}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to deserialize {path} response"))
    }
}

#[async_trait]
impl SocialPlatform for XApiClient {
    async fn me(&self) -> Result<Account> {
        let resp: SingleResponse<UserData> = self
            .get_json("/2/users/me", &[("user.fields", "name,username")])
            .await
            .context("Failed to resolve authenticated user")?;

        let user = resp
            .data
            .ok_or_else(|| anyhow::anyhow!("X API returned no user for /2/users/me"))?;
        Ok(user.into())
    }

    async fn mentions_since(
        &self,
        user_id: &str,
        since: Option<PostId>,
        limit: u32,
    ) -> Result<Vec<Post>> {
        let path = format!("/2/users/{user_id}/mentions");
        let max_results = limit.clamp(MIN_MENTION_PAGE, MAX_MENTION_PAGE).to_string();
        let since_id = since.map(|id| id.to_string());

        let mut params: Vec<(&str, &str)> = POST_QUERY.to_vec();
        params.push(("max_results", &max_results));
        if let Some(ref id) = since_id {
            params.push(("since_id", id));
        }

        let resp: ListResponse = self
            .get_json(&path, &params)
            .await
            .context("Failed to fetch mentions")?;

        let mut posts = resp.into_posts();
        // The API floor is 5 results; honour smaller caller limits here.
        posts.truncate(limit as usize);

        debug!(count = posts.len(), since = ?since, "Fetched mentions");
        Ok(posts)
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        let path = format!("/2/tweets/{id}");
        let resp: SingleResponse<TweetData> = self
            .get_json(&path, &POST_QUERY)
            .await
            .with_context(|| format!("Failed to fetch post {id}"))?;

        Ok(resp.into_post())
    }

    async fn post_reply(&self, in_reply_to: PostId, text: &str) -> Result<PostId> {
        let url = format!("{}/2/tweets", self.base_url);
        let request = CreateTweetRequest {
            text,
            reply: ReplySettings {
                in_reply_to_tweet_id: in_reply_to.to_string(),
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .context("Failed to post reply")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("X API /2/tweets returned {status}: {body}");
        }

        let created: SingleResponse<CreatedTweet> = response
            .json()
            .await
            .context("Failed to parse reply response")?;

        let data = created
            .data
            .ok_or_else(|| anyhow::anyhow!("X API returned no data for created reply"))?;
        data.id
            .parse()
            .with_context(|| format!("Invalid post id in reply response: {}", data.id))
    }
}

// -- Wire types --

/// Response carrying a single `data` object plus expansions.
#[derive(Debug, Deserialize)]
pub struct SingleResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub includes: Includes,
}

impl SingleResponse<TweetData> {
    /// Convert a single-post lookup into a `Post`, resolving expansions.
    pub fn into_post(self) -> Option<Post> {
        let includes = self.includes;
        self.data.and_then(|tweet| tweet.into_post(&includes))
    }
}

/// Response carrying a list of posts (mentions timeline).
#[derive(Debug, Deserialize)]
pub struct ListResponse {
    /// Absent entirely when there are no results.
    #[serde(default)]
    pub data: Vec<TweetData>,
    #[serde(default)]
    pub includes: Includes,
}

impl ListResponse {
    /// Convert every post, dropping any with an unparseable id.
    pub fn into_posts(self) -> Vec<Post> {
        let includes = self.includes;
        self.data
            .into_iter()
            .filter_map(|t| t.into_post(&includes))
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<UserData>,
    #[serde(default)]
    pub media: Vec<MediaData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserData {
    pub id: String,
    pub username: String,
    pub name: String,
}

impl From<UserData> for Account {
    fn from(u: UserData) -> Self {
        Account {
            id: u.id,
            username: u.username,
            name: u.name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaData {
    pub media_key: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: Option<String>,
    pub preview_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TweetData {
    pub id: String,
    pub text: String,
    pub author_id: Option<String>,
    pub attachments: Option<Attachments>,
    #[serde(default)]
    pub referenced_tweets: Vec<ReferencedTweet>,
}

#[derive(Debug, Deserialize)]
pub struct Attachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReferencedTweet {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl TweetData {
    /// Resolve author and media expansions against `includes`.
    ///
    /// Media keys are looked up in attachment order so platform ordering
    /// survives; keys missing from `includes` are skipped.
    fn into_post(self, includes: &Includes) -> Option<Post> {
        let id: PostId = match self.id.parse() {
            Ok(id) => id,
            Err(_) => {
                debug!(id = %self.id, "Skipping post with non-numeric id");
                return None;
            }
        };

        let users: HashMap<&str, &UserData> =
            includes.users.iter().map(|u| (u.id.as_str(), u)).collect();
        let author = self
            .author_id
            .as_deref()
            .and_then(|aid| users.get(aid))
            .map(|u| Account::from((*u).clone()))
            .unwrap_or_else(Account::unknown);

        let media = self
            .attachments
            .map(|a| a.media_keys)
            .unwrap_or_default()
            .iter()
            .filter_map(|key| includes.media.iter().find(|m| &m.media_key == key))
            .map(|m| MediaAttachment {
                kind: MediaKind::from_api(&m.kind),
                url: m.url.clone(),
                preview_image_url: m.preview_image_url.clone(),
            })
            .collect();

        let references = self
            .referenced_tweets
            .into_iter()
            .filter_map(|r| {
                r.id.parse().ok().map(|id| PostReference { kind: r.kind, id })
            })
            .collect();

        Some(Post {
            id,
            text: self.text,
            author,
            references,
            media,
        })
    }
}

#[derive(Serialize)]
struct CreateTweetRequest<'a> {
    text: &'a str,
    reply: ReplySettings,
}

#[derive(Serialize)]
struct ReplySettings {
    in_reply_to_tweet_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatedTweet {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mentions_response() {
        let json = r#"{"meta": {"result_count": 0}}"#;
        let resp: ListResponse = serde_json::from_str(json).unwrap();
        assert!(resp.into_posts().is_empty());
    }

    #[test]
    fn test_mentions_resolve_authors_and_media() {
        let json = r#"{
            "data": [
                {
                    "id": "1002",
                    "text": "@sentinel is this real?",
                    "author_id": "42",
                    "referenced_tweets": [{"type": "replied_to", "id": "1001"}]
                },
                {
                    "id": "1003",
                    "text": "@sentinel check this",
                    "author_id": "43",
                    "attachments": {"media_keys": ["3_b", "7_a"]}
                }
            ],
            "includes": {
                "users": [
                    {"id": "42", "username": "alice", "name": "Alice"},
                    {"id": "43", "username": "bob", "name": "Bob"}
                ],
                "media": [
                    {"media_key": "7_a", "type": "video", "preview_image_url": "https://pbs/frame.jpg"},
                    {"media_key": "3_b", "type": "photo", "url": "https://pbs/photo.jpg"}
                ]
            },
            "meta": {"result_count": 2, "newest_id": "1003"}
        }"#;

        let resp: ListResponse = serde_json::from_str(json).unwrap();
        let posts = resp.into_posts();
        assert_eq!(posts.len(), 2);

        assert_eq!(posts[0].id, PostId(1002));
        assert_eq!(posts[0].author.username, "alice");
        assert_eq!(posts[0].replied_to(), Some(PostId(1001)));
        assert!(posts[0].media.is_empty());

        // Attachment order, not includes order
        assert_eq!(
            posts[1].media_urls(),
            vec!["https://pbs/photo.jpg", "https://pbs/frame.jpg"]
        );
    }

    #[test]
    fn test_missing_author_expansion_falls_back() {
        let json = r#"{"data": {"id": "7", "text": "hi", "author_id": "99"}}"#;
        let resp: SingleResponse<TweetData> = serde_json::from_str(json).unwrap();
        let post = resp.into_post().unwrap();
        assert_eq!(post.author.username, "unknown");
    }

    #[test]
    fn test_single_lookup_without_data() {
        let json = r#"{"errors": [{"detail": "Could not find tweet"}]}"#;
        let resp: SingleResponse<TweetData> = serde_json::from_str(json).unwrap();
        assert!(resp.into_post().is_none());
    }

    #[test]
    fn test_reply_request_shape() {
        let req = CreateTweetRequest {
            text: "hello",
            reply: ReplySettings {
                in_reply_to_tweet_id: "123".to_string(),
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["reply"]["in_reply_to_tweet_id"], "123");
        assert_eq!(value["text"], "hello");
    }
}
