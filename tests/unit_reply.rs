// Reply composer tests: the 280-char bound across a wide spread of
// verdicts, plus line layout for the shapes the poller actually sends.

use sentinel::analysis::{Provenance, RiskLevel, Signal, SubScores, Verdict};
use sentinel::reply::{compose_reply, fetch_failure_reply, fit_reply, random_token, MAX_REPLY_CHARS};

fn verdict(risk: RiskLevel, trust: f64, summary: &str, scores: Option<SubScores>) -> Verdict {
    let mut v = Verdict::new(risk, trust, summary, 0.7, Provenance::Fresh);
    if let Some(s) = &scores {
        v.ai_generated_score = Some((s.dominant() * 100.0).round() as u8);
        v.is_fake = s.dominant() > 0.3;
    }
    v.sub_scores = scores;
    v
}

fn scores(d: Signal, g: Signal, faces: Option<u32>, exif: Option<bool>) -> SubScores {
    SubScores {
        diffusion_probability: d,
        gan_probability: g,
        face_count: faces,
        exif_present: exif,
    }
}

// ============================================================
// Length bound
// ============================================================

#[test]
fn composed_reply_never_exceeds_limit() {
    let summaries = [
        String::new(),
        "Short.".to_string(),
        "word ".repeat(100),
        "ñ".repeat(400),
        "🙂 emoji heavy ".repeat(40),
        "line\nbreaks\n\nand\ttabs ".repeat(30),
    ];
    let score_sets = [
        None,
        Some(scores(Signal::measured(0.8), Signal::Skipped, Some(0), Some(false))),
        Some(scores(Signal::Unknown, Signal::Unknown, None, None)),
        Some(scores(Signal::measured(0.123), Signal::measured(0.999), Some(4_000_000), Some(true))),
    ];
    let risks = [
        (RiskLevel::Low, 100.0),
        (RiskLevel::Medium, 45.0),
        (RiskLevel::High, 0.0),
    ];

    for summary in &summaries {
        for set in &score_sets {
            for (risk, trust) in risks {
                let v = verdict(risk, trust, summary, set.clone());
                let reply = compose_reply(&v, &random_token());
                assert!(
                    reply.chars().count() <= MAX_REPLY_CHARS,
                    "reply of {} chars for summary {:?}",
                    reply.chars().count(),
                    summary.chars().take(20).collect::<String>()
                );
            }
        }
    }
}

#[test]
fn fit_reply_respects_arbitrary_limits() {
    let header = "Risk: HIGH | Trust: 4/100 | AI-gen: 80%";
    let breakdown = "Diffusion 80% · Faces 0 · EXIF no";
    let reasoning = "Strong signs of AI generation. ".repeat(20);
    for max in [0, 1, 10, 11, 12, 30, 60, 100, 280, 500] {
        let reply = fit_reply(header, Some(breakdown), &reasoning, "[ref:ab12]", max);
        assert!(reply.chars().count() <= max, "max={max} got {}", reply.chars().count());
    }
}

// ============================================================
// Layout
// ============================================================

#[test]
fn token_is_always_the_last_line() {
    let v = verdict(
        RiskLevel::Medium,
        60.0,
        "Some signs of synthetic content.",
        Some(scores(Signal::measured(0.4), Signal::Skipped, Some(0), Some(false))),
    );
    let reply = compose_reply(&v, "[ref:q1w2]");
    assert_eq!(reply.lines().last(), Some("[ref:q1w2]"));
    assert!(reply.starts_with("Risk: MEDIUM | Trust: 60/100 | AI-gen: 40%\n"));
}

#[test]
fn cached_verdict_has_no_breakdown_line() {
    let mut v = Verdict::new(RiskLevel::High, 10.0, "Seen before.", 0.9, Provenance::Cache);
    v.ai_generated_score = Some(91);
    let reply = compose_reply(&v, "[ref:aaaa]");
    let lines: Vec<&str> = reply.lines().collect();
    assert_eq!(lines, vec!["Risk: HIGH | Trust: 10/100 | AI-gen: 91%", "Seen before.", "[ref:aaaa]"]);
}

#[test]
fn consecutive_replies_differ_by_token() {
    let v = Verdict::no_media();
    let replies: std::collections::HashSet<String> =
        (0..20).map(|_| compose_reply(&v, &random_token())).collect();
    assert!(replies.len() > 1);
}

#[test]
fn fetch_failure_notice_is_bounded() {
    let reply = fetch_failure_reply(&random_token());
    assert!(reply.chars().count() <= MAX_REPLY_CHARS);
    assert!(reply.lines().last().unwrap().starts_with("[ref:"));
}
