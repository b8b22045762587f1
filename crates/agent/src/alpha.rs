//! Text-only estimate of the lexical/semantic blend.
//!
//! Alpha is the weight given to semantic ranking: 0.0 is pure keyword
//! matching, 1.0 pure semantic similarity. Short, code-like or quoted
//! queries lean lexical; descriptive requests lean semantic.

use aisle_core::text::{normalize_text, tokenize};

const NEUTRAL_ALPHA: f64 = 0.5;
const MIN_ALPHA: f64 = 0.1;
const MAX_ALPHA: f64 = 0.9;

const DESCRIPTIVE_CUES: &[&str] = &[
    "something", "anything", "similar", "like", "ideas", "healthy", "cheap", "best", "good",
    "for", "alternative", "alternatives", "recommend", "suggest", "gift", "party",
];

pub fn estimate_alpha(text: &str) -> f64 {
    let normalized = normalize_text(text);
    let tokens = tokenize(&normalized);
    if tokens.is_empty() {
        return NEUTRAL_ALPHA;
    }

    let mut alpha = NEUTRAL_ALPHA;

    if tokens.len() <= 2 {
        alpha -= 0.2;
    } else if tokens.len() >= 6 {
        alpha += 0.1;
    }

    let code_like = tokens.iter().filter(|token| token.chars().any(|ch| ch.is_ascii_digit())).count();
    alpha -= 0.1 * code_like.min(2) as f64;

    if text.contains('"') {
        alpha -= 0.2;
    }

    let cues = tokens.iter().filter(|token| DESCRIPTIVE_CUES.contains(&token.as_str())).count();
    alpha += 0.1 * cues.min(3) as f64;

    round_to_hundredths(alpha.clamp(MIN_ALPHA, MAX_ALPHA))
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
