// Composition tests: verifying that the stages chain together correctly.
//
// These tests exercise the data flow between modules:
//   Mention -> Resolver -> AnalysisRequest -> Pipeline -> Verdict -> Reply
// and the interchangeability of the cursor backends, without any network
// calls or model files.

mod common;

use std::sync::Arc;

use common::{
    photo, post, reply_to, user, PipelineBuilder, ReasonerMode, StubEmbedder, StubFetcher,
    StubPlatform,
};
use sentinel::analysis::{AnalyzeResponse, Provenance, RiskLevel};
use sentinel::cursor::{CursorStore, FileCursorStore};
use sentinel::platform::{MediaAttachment, MediaKind, PostId};
use sentinel::reply::{compose_reply, MAX_REPLY_CHARS};
use sentinel::resolver::{resolve_context, DEFAULT_QUESTION};

// ============================================================
// Chain: Resolver -> Pipeline -> Reply
// ============================================================

#[tokio::test]
async fn parent_image_flows_through_to_reply() {
    let url = "https://pbs.example/parent.jpg";
    let mut parent = post(70, user("poster"), "Breaking: look at this");
    parent.media.push(photo(url));
    let mention = reply_to(post(71, user("asker"), "@SENTINEL   real?"), 70);

    let mut platform = StubPlatform::default();
    platform.posts.insert(PostId(70), parent);

    let context = resolve_context(&platform, &mention, "sentinel").await;
    assert_eq!(context.subject_post_id, PostId(70));
    assert_eq!(context.author_username, "poster");
    assert_eq!(context.question, "real?");
    assert_eq!(context.primary_media(), Some(url));

    let request = context.to_request();
    assert_eq!(request.context_text(), "POSTER (@poster): Breaking: look at this");
    assert_eq!(request.question(), Some("real?"));

    let t = PipelineBuilder {
        fetcher: StubFetcher::default().with(url, b"parent-bytes"),
        embedder: StubEmbedder::default().with(b"parent-bytes", [0.0, 0.0, 1.0, 0.0]),
        diffusion: Some(0.9),
        reasoner: ReasonerMode::Fails,
        ..PipelineBuilder::default()
    }
    .build()
    .await;

    let verdict = t.pipeline.analyze(&request).await.unwrap();
    assert_eq!(verdict.risk_level, RiskLevel::High);
    assert_eq!(verdict.trust_score, 2);

    // The asker's question reaches the reasoner next to the subject post.
    let seen = t.reasoner.inputs();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].question.as_deref(), Some("real?"));
    assert_eq!(seen[0].context, "POSTER (@poster): Breaking: look at this");

    let reply = compose_reply(&verdict, "[ref:zz00]");
    assert!(reply.chars().count() <= MAX_REPLY_CHARS);
    assert!(reply.contains("Diffusion 90%"));
    assert!(reply.contains("Strong signs of AI generation"));
}

#[tokio::test]
async fn mention_attachment_used_when_parent_has_none() {
    let url = "https://pbs.example/attached.jpg";
    let parent = post(80, user("poster"), "text only");
    let mut mention = reply_to(post(81, user("asker"), "@sentinel"), 80);
    mention.media.push(photo(url));

    let mut platform = StubPlatform::default();
    platform.posts.insert(PostId(80), parent);

    let context = resolve_context(&platform, &mention, "sentinel").await;
    assert_eq!(context.subject_post_id, PostId(80));
    assert_eq!(context.question, DEFAULT_QUESTION);
    assert_eq!(context.media_urls, vec![url.to_string()]);
}

#[tokio::test]
async fn video_contributes_only_its_preview_frame() {
    let mut mention = post(90, user("asker"), "@sentinel check the clip");
    mention.media.push(MediaAttachment {
        kind: MediaKind::Video,
        url: None,
        preview_image_url: Some("https://pbs.example/frame.jpg".to_string()),
    });
    mention.media.push(photo("https://pbs.example/second.jpg"));

    let context = resolve_context(&StubPlatform::default(), &mention, "sentinel").await;
    assert_eq!(
        context.media_urls,
        vec![
            "https://pbs.example/frame.jpg".to_string(),
            "https://pbs.example/second.jpg".to_string()
        ]
    );
    assert_eq!(context.to_request().primary_url(), Some("https://pbs.example/frame.jpg"));
}

#[tokio::test]
async fn unreachable_parent_falls_back_to_mention() {
    let platform = StubPlatform {
        failing_posts: vec![PostId(500)],
        ..StubPlatform::default()
    };
    let mention = reply_to(post(501, user("asker"), "@sentinel hm"), 500);

    let context = resolve_context(&platform, &mention, "sentinel").await;
    assert_eq!(context.subject_post_id, PostId(501));
    assert!(context.media_urls.is_empty());
}

// ============================================================
// Chain: Pipeline -> AnalyzeResponse
// ============================================================

#[tokio::test]
async fn analyze_response_carries_recommendation_and_input() {
    let t = PipelineBuilder::default().build().await;
    let request = sentinel::analysis::AnalysisRequest::default().with_text("hello");

    let verdict = t.pipeline.analyze(&request).await.unwrap();
    let response = AnalyzeResponse::new(verdict, request.clone());

    assert_eq!(response.provenance, Provenance::Fallback);
    assert_eq!(response.recommendation, RiskLevel::Low.recommendation());
    assert_eq!(response.input, request);

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["risk_level"], "low");
    assert_eq!(json["trust_score"], 100);
    assert!(json["breakdown"].is_null());
}

// ============================================================
// Cursor backends are interchangeable
// ============================================================

async fn exercise_store(store: Arc<dyn CursorStore>) {
    assert_eq!(store.load().await.unwrap(), None);
    store.save(PostId(1_800_000_000_000_000_001)).await.unwrap();
    store.save(PostId(1_800_000_000_000_000_002)).await.unwrap();
    assert_eq!(
        store.load().await.unwrap(),
        Some(PostId(1_800_000_000_000_000_002))
    );

    store.record_poll("2026-10-16 12:00:00").await.unwrap();
    assert_eq!(
        store.last_poll().await.unwrap().as_deref(),
        Some("2026-10-16 12:00:00")
    );
}

#[tokio::test]
async fn file_cursor_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise_store(Arc::new(FileCursorStore::new(dir.path().join("cursor.txt")))).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_cursor_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentinel.db");
    let store = sentinel::cursor::SqliteCursorStore::open(path.to_str().unwrap()).unwrap();
    exercise_store(Arc::new(store)).await;
}
