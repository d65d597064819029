// Shared in-process stubs for the integration tests.
//
// Every external capability (platform, fetcher, models, reasoner) has a
// deterministic stand-in here so the tests never touch the network or need
// model files on disk.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use sentinel::analysis::reasoning::{ReasonerReply, ReasoningInput};
use sentinel::analysis::{
    AnalysisSettings, FaceDetector, ImageClassifier, ImageEmbedder, ImageFetcher, InMemoryIndex,
    PipelineServices, Reasoner, TrustPipeline, VectorIndex,
};
use sentinel::platform::{
    Account, MediaAttachment, MediaKind, Post, PostId, PostReference, SocialPlatform,
};

pub const DIM: usize = 4;

// ============================================================
// Analysis stubs
// ============================================================

/// Serves canned bytes per URL; unknown URLs fail like a 404.
#[derive(Default)]
pub struct StubFetcher {
    images: HashMap<String, Vec<u8>>,
    pub calls: AtomicUsize,
}

impl StubFetcher {
    pub fn with(mut self, url: &str, bytes: &[u8]) -> Self {
        self.images.insert(url.to_string(), bytes.to_vec());
        self
    }
}

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("HTTP 404 for {url}"))
    }
}

/// Maps known byte strings to fixed vectors. Unknown bytes fail, which the
/// pipeline treats as "no embedding".
#[derive(Default)]
pub struct StubEmbedder {
    vectors: HashMap<Vec<u8>, Vec<f32>>,
}

impl StubEmbedder {
    pub fn with(mut self, bytes: &[u8], vector: [f32; DIM]) -> Self {
        self.vectors.insert(bytes.to_vec(), vector.to_vec());
        self
    }
}

#[async_trait]
impl ImageEmbedder for StubEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    async fn embed(&self, image: Arc<[u8]>) -> Result<Vec<f32>> {
        self.vectors
            .get(&image[..])
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("embedder has no vector for these bytes"))
    }
}

/// Returns a fixed probability, or fails when `p` is `None`.
pub struct FixedClassifier {
    p: Option<f64>,
    pub calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(p: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            p,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageClassifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fake_probability(&self, _image: Arc<[u8]>) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.p.ok_or_else(|| anyhow::anyhow!("classifier offline"))
    }
}

pub struct FixedFaces(pub Option<u32>);

#[async_trait]
impl FaceDetector for FixedFaces {
    async fn count_faces(&self, _image: Arc<[u8]>) -> Result<u32> {
        self.0.ok_or_else(|| anyhow::anyhow!("face detector offline"))
    }
}

/// Reasoner behaviours the tests need.
pub enum ReasonerMode {
    /// Answers after this delay
    Slow(Duration),
    Fails,
    Answers(ReasonerReply),
}

/// Every call holds the reasoner for `STUB_REASONER_LATENCY`, long enough
/// for an unserialized second caller to overlap it.
const STUB_REASONER_LATENCY: Duration = Duration::from_millis(5);

pub struct StubReasoner {
    mode: ReasonerMode,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    inputs: Mutex<Vec<ReasoningInput>>,
}

impl StubReasoner {
    pub fn new(mode: ReasonerMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Inputs seen so far, in call order.
    pub fn inputs(&self) -> Vec<ReasoningInput> {
        self.inputs.lock().unwrap().clone()
    }
}

/// Decrements the in-flight count even when the call is cancelled by a timeout.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Reasoner for StubReasoner {
    fn name(&self) -> &str {
        "stub"
    }

    async fn assess(&self, input: &ReasoningInput) -> Result<ReasonerReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(STUB_REASONER_LATENCY).await;

        match &self.mode {
            ReasonerMode::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(ReasonerReply {
                    risk_level: Some("low".to_string()),
                    trust_score: Some(99.0),
                    reasoning_summary: Some("too late".to_string()),
                })
            }
            ReasonerMode::Fails => anyhow::bail!("reasoner unreachable"),
            ReasonerMode::Answers(reply) => Ok(reply.clone()),
        }
    }
}

/// A pipeline wired to stubs, with handles to the probes tests assert on.
pub struct TestPipeline {
    pub pipeline: Arc<TrustPipeline>,
    pub fetcher: Arc<StubFetcher>,
    pub diffusion: Arc<FixedClassifier>,
    pub gan_face: Arc<FixedClassifier>,
    pub reasoner: Arc<StubReasoner>,
    pub index: Arc<InMemoryIndex>,
}

pub struct PipelineBuilder {
    pub fetcher: StubFetcher,
    pub embedder: StubEmbedder,
    pub diffusion: Option<f64>,
    pub gan: Option<f64>,
    pub faces: Option<u32>,
    pub reasoner: ReasonerMode,
    pub reasoner_timeout: Duration,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            fetcher: StubFetcher::default(),
            embedder: StubEmbedder::default(),
            diffusion: Some(0.1),
            gan: Some(0.1),
            faces: Some(0),
            reasoner: ReasonerMode::Fails,
            reasoner_timeout: Duration::from_millis(200),
        }
    }
}

impl PipelineBuilder {
    pub async fn build(self) -> TestPipeline {
        let fetcher = Arc::new(self.fetcher);
        let diffusion = FixedClassifier::new(self.diffusion);
        let gan_face = FixedClassifier::new(self.gan);
        let reasoner = StubReasoner::new(self.reasoner);
        let index = Arc::new(InMemoryIndex::new());

        let services = PipelineServices {
            fetcher: fetcher.clone(),
            embedder: Arc::new(self.embedder),
            diffusion: diffusion.clone(),
            gan_face: gan_face.clone(),
            faces: Arc::new(FixedFaces(self.faces)),
            index: index.clone() as Arc<dyn VectorIndex>,
            reasoner: reasoner.clone(),
        };
        let settings = AnalysisSettings {
            reasoner_timeout: self.reasoner_timeout,
            ..AnalysisSettings::default()
        };

        let pipeline = Arc::new(TrustPipeline::new(services, settings));
        assert!(pipeline.prepare().await, "in-memory index should always prepare");

        TestPipeline {
            pipeline,
            fetcher,
            diffusion,
            gan_face,
            reasoner,
            index,
        }
    }
}

// ============================================================
// Platform stub
// ============================================================

pub fn bot() -> Account {
    Account {
        id: "42".to_string(),
        username: "sentinel".to_string(),
        name: "Sentinel".to_string(),
    }
}

pub fn user(name: &str) -> Account {
    Account {
        id: format!("id-{name}"),
        username: name.to_string(),
        name: name.to_uppercase(),
    }
}

pub fn photo(url: &str) -> MediaAttachment {
    MediaAttachment {
        kind: MediaKind::Photo,
        url: Some(url.to_string()),
        preview_image_url: None,
    }
}

pub fn post(id: u64, author: Account, text: &str) -> Post {
    Post {
        id: PostId(id),
        text: text.to_string(),
        author,
        references: vec![],
        media: vec![],
    }
}

pub fn reply_to(mut mention: Post, parent: u64) -> Post {
    mention.references.push(PostReference {
        kind: "replied_to".to_string(),
        id: PostId(parent),
    });
    mention
}

/// In-memory platform. Each fetch returns the oldest `limit` pending
/// mentions, newest-first like the X API.
#[derive(Default)]
pub struct StubPlatform {
    pub auth_fails: bool,
    pub mentions: Mutex<Vec<Post>>,
    pub posts: HashMap<PostId, Post>,
    pub failing_posts: Vec<PostId>,
    /// Replies to these mention ids fail
    pub reply_failures: Vec<PostId>,
    /// Fail the next N mention fetches
    pub mention_fetch_failures: AtomicUsize,
    pub replies: Mutex<Vec<(PostId, String)>>,
    pub next_reply_id: AtomicUsize,
}

impl StubPlatform {
    pub fn with_mentions(mentions: Vec<Post>) -> Self {
        Self {
            mentions: Mutex::new(mentions),
            ..Self::default()
        }
    }

    pub fn push_mention(&self, mention: Post) {
        self.mentions.lock().unwrap().push(mention);
    }

    pub fn replies(&self) -> Vec<(PostId, String)> {
        self.replies.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocialPlatform for StubPlatform {
    async fn me(&self) -> Result<Account> {
        if self.auth_fails {
            anyhow::bail!("401 Unauthorized");
        }
        Ok(bot())
    }

    async fn mentions_since(
        &self,
        _user_id: &str,
        since: Option<PostId>,
        limit: u32,
    ) -> Result<Vec<Post>> {
        let pending = self.mention_fetch_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.mention_fetch_failures.store(pending - 1, Ordering::SeqCst);
            anyhow::bail!("503 Service Unavailable");
        }

        let mut newer: Vec<Post> = self
            .mentions
            .lock()
            .unwrap()
            .iter()
            .filter(|m| since.is_none_or(|s| m.id > s))
            .cloned()
            .collect();
        // Oldest pending first, then handed back newest-first.
        newer.sort_by_key(|m| m.id);
        newer.truncate(limit as usize);
        newer.reverse();
        Ok(newer)
    }

    async fn get_post(&self, id: PostId) -> Result<Option<Post>> {
        if self.failing_posts.contains(&id) {
            anyhow::bail!("500 while fetching {id}");
        }
        Ok(self.posts.get(&id).cloned())
    }

    async fn post_reply(&self, in_reply_to: PostId, text: &str) -> Result<PostId> {
        if self.reply_failures.contains(&in_reply_to) {
            anyhow::bail!("403 duplicate content");
        }
        self.replies
            .lock()
            .unwrap()
            .push((in_reply_to, text.to_string()));
        let n = self.next_reply_id.fetch_add(1, Ordering::SeqCst) as u64;
        Ok(PostId(9_000_000 + n))
    }
}
