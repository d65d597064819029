// Reply composition: Verdict → a single post that fits the platform limit.
//
// Line order is fixed: header, optional breakdown, reasoning, reference token.
// The reference token is random per reply so the platform never rejects two
// identical replies as duplicates. Lengths are counted in chars, not bytes.

use rand::Rng;

use crate::analysis::{Signal, Verdict};

/// X's post length limit.
pub const MAX_REPLY_CHARS: usize = 280;

const ELLIPSIS: char = '…';
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 4;

/// Truncate to at most `max_chars` chars, ending in "…" when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else if max_chars == 0 {
        String::new()
    } else {
        let truncated: String = text.chars().take(max_chars - 1).collect();
        format!("{truncated}{ELLIPSIS}")
    }
}

/// `[ref:ab12]` with four random lowercase alphanumerics.
pub fn random_token() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();
    format!("[ref:{suffix}]")
}

/// `Risk: HIGH | Trust: 4/100 | AI-gen: 80%`
pub fn header_line(verdict: &Verdict) -> String {
    let mut header = format!(
        "Risk: {} | Trust: {}/100",
        verdict.risk_level.as_str().to_uppercase(),
        verdict.trust_score
    );
    if let Some(ai) = verdict.ai_generated_score {
        header.push_str(&format!(" | AI-gen: {ai}%"));
    }
    header
}

/// Measured detector scores plus face count and EXIF presence when known.
/// `None` for cached or no-media verdicts.
pub fn breakdown_line(verdict: &Verdict) -> Option<String> {
    let scores = verdict.sub_scores.as_ref()?;
    let mut parts = Vec::new();

    if let Signal::Measured(d) = scores.diffusion_probability {
        parts.push(format!("Diffusion {}%", percent(d)));
    }
    if let Signal::Measured(g) = scores.gan_probability {
        parts.push(format!("GAN {}%", percent(g)));
    }
    if let Some(faces) = scores.face_count {
        parts.push(format!("Faces {faces}"));
    }
    if let Some(exif) = scores.exif_present {
        parts.push(format!("EXIF {}", if exif { "yes" } else { "no" }));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" · "))
    }
}

fn percent(p: f64) -> u8 {
    crate::analysis::verdict::probability_to_score(p)
}

/// Assemble reply lines within `max_len` chars.
///
/// Header, breakdown and token are reserved first; reasoning gets whatever
/// remains and is truncated with "…". If the reserved parts alone don't fit,
/// the breakdown is dropped, then the header is truncated.
pub fn fit_reply(
    header: &str,
    breakdown: Option<&str>,
    reasoning: &str,
    token: &str,
    max_len: usize,
) -> String {
    let len = |s: &str| s.chars().count();
    let token_len = len(token);
    if token_len >= max_len {
        return truncate_chars(token, max_len);
    }

    let mut header = header.trim().to_string();
    let mut breakdown = breakdown
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string);

    // Each line is followed by a newline except the token.
    let reserved = |h: &str, b: &Option<String>| {
        len(h) + 1 + b.as_deref().map(|b| len(b) + 1).unwrap_or(0) + token_len
    };

    if reserved(&header, &breakdown) > max_len {
        breakdown = None;
    }
    if reserved(&header, &breakdown) > max_len {
        header = truncate_chars(&header, max_len - token_len - 1);
    }

    let reasoning = reasoning.split_whitespace().collect::<Vec<_>>().join(" ");
    let budget = max_len.saturating_sub(reserved(&header, &breakdown) + 1);

    let mut lines = vec![header];
    lines.extend(breakdown);
    if !reasoning.is_empty() && budget > 0 {
        lines.push(truncate_chars(&reasoning, budget));
    }
    lines.push(token.to_string());
    lines.join("\n")
}

/// Compose the reply for a verdict with the given reference token.
pub fn compose_reply(verdict: &Verdict, token: &str) -> String {
    fit_reply(
        &header_line(verdict),
        breakdown_line(verdict).as_deref(),
        &verdict.reasoning_summary,
        token,
        MAX_REPLY_CHARS,
    )
}

/// Reply sent when the image could not be downloaded.
pub fn fetch_failure_reply(token: &str) -> String {
    fit_reply(
        "Sorry, I couldn't fetch the media in that post.",
        None,
        "Please try again later, or reply with the image attached directly.",
        token,
        MAX_REPLY_CHARS,
    )
}
