// Platform-neutral post and media types.
//
// These are the only shapes the rest of Sentinel sees. The X API wire types
// live in client.rs and are converted into these at the boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A post identifier. X post ids are snowflakes, so numeric order is
/// arrival order. The poller's cursor relies on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PostId(pub u64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PostId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(PostId)
    }
}

impl TryFrom<String> for PostId {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PostId> for String {
    fn from(id: PostId) -> Self {
        id.to_string()
    }
}

/// The authenticated account (the bot itself) or a post author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub name: String,
}

impl Account {
    /// Placeholder used when the platform didn't expand the author.
    pub fn unknown() -> Self {
        Self {
            id: String::new(),
            username: "unknown".to_string(),
            name: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    AnimatedGif,
    Video,
    Other,
}

impl MediaKind {
    pub fn from_api(kind: &str) -> Self {
        match kind {
            "photo" => MediaKind::Photo,
            "animated_gif" => MediaKind::AnimatedGif,
            "video" => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

/// A media attachment on a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub kind: MediaKind,
    /// Direct URL (photos; sometimes absent for videos)
    pub url: Option<String>,
    /// Preview frame for videos and GIFs
    pub preview_image_url: Option<String>,
}

impl MediaAttachment {
    /// The still image to analyze for this attachment, if any.
    ///
    /// Photos and GIFs are used directly. Videos are only ever represented
    /// by their preview frame; video streams are never analyzed.
    pub fn analyzable_url(&self) -> Option<&str> {
        match self.kind {
            MediaKind::Photo | MediaKind::AnimatedGif => self
                .url
                .as_deref()
                .or(self.preview_image_url.as_deref()),
            MediaKind::Video => self.preview_image_url.as_deref(),
            MediaKind::Other => None,
        }
    }
}

/// A reference from one post to another ("replied_to", "quoted", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostReference {
    pub kind: String,
    pub id: PostId,
}

/// A post (a mention is just a post that names the bot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub author: Account,
    pub references: Vec<PostReference>,
    pub media: Vec<MediaAttachment>,
}

impl Post {
    /// The post this one replies to, if any.
    pub fn replied_to(&self) -> Option<PostId> {
        self.references
            .iter()
            .find(|r| r.kind == "replied_to")
            .map(|r| r.id)
    }

    /// Analyzable image URLs in platform order.
    pub fn media_urls(&self) -> Vec<String> {
        self.media
            .iter()
            .filter_map(|m| m.analyzable_url())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(kind: MediaKind, url: Option<&str>, preview: Option<&str>) -> MediaAttachment {
        MediaAttachment {
            kind,
            url: url.map(String::from),
            preview_image_url: preview.map(String::from),
        }
    }

    #[test]
    fn test_post_id_orders_numerically() {
        let small: PostId = "999".parse().unwrap();
        let large: PostId = "1000".parse().unwrap();
        assert!(small < large, "string order would say otherwise");
    }

    #[test]
    fn test_post_id_serde_as_string() {
        let id = PostId(1789012345678901234);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1789012345678901234\"");
        let back: PostId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_video_uses_preview_frame_only() {
        let video = attachment(
            MediaKind::Video,
            Some("https://video.example/clip.mp4"),
            Some("https://pbs.example/frame.jpg"),
        );
        assert_eq!(video.analyzable_url(), Some("https://pbs.example/frame.jpg"));

        let no_preview = attachment(MediaKind::Video, Some("https://video.example/clip.mp4"), None);
        assert_eq!(no_preview.analyzable_url(), None);
    }

    #[test]
    fn test_media_urls_preserve_order_and_skip_unknown() {
        let post = Post {
            id: PostId(1),
            text: "look".to_string(),
            author: Account::unknown(),
            references: vec![],
            media: vec![
                attachment(MediaKind::AnimatedGif, Some("https://a/1.gif"), None),
                attachment(MediaKind::Other, Some("https://a/2.bin"), None),
                attachment(MediaKind::Photo, Some("https://a/3.jpg"), None),
            ],
        };
        assert_eq!(post.media_urls(), vec!["https://a/1.gif", "https://a/3.jpg"]);
    }

    #[test]
    fn test_replied_to_ignores_quotes() {
        let post = Post {
            id: PostId(5),
            text: String::new(),
            author: Account::unknown(),
            references: vec![
                PostReference { kind: "quoted".to_string(), id: PostId(3) },
                PostReference { kind: "replied_to".to_string(), id: PostId(4) },
            ],
            media: vec![],
        };
        assert_eq!(post.replied_to(), Some(PostId(4)));
    }
}
